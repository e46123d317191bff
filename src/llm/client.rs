//! The AI client: one question in, one answer out.
//!
//! Wraps a [`LlmProvider`] with a per-attempt timeout, retries with exponential
//! backoff, an answer cache and a static fallback. It never returns a hard
//! error to the caller; when every attempt fails the caller gets [`Degraded`]
//! carrying the fallback text. Conversation history is read, never written.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::cache::{ResponseCache, cache_key};
use super::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider};
use super::retry::RetryPolicy;
use crate::config::AiSettings;
use crate::conversation::{Turn, TurnRole};
use crate::error::LlmError;

/// Shown to the user when the model cannot be reached.
pub const FALLBACK_ANSWER: &str = "😔 Sorry, the AI assistant is temporarily unavailable. \
Please try again in a few minutes or contact our support team:\n\n\
📧 support@speakflow-english.com\n\
📱 +7 495 123 45 67\n\n\
We're available Mon–Fri, 10:00–19:00 (Moscow time).";

const SYSTEM_PROMPT: &str = "You are a helpful assistant for SpeakFlow English, an online English school. \
Answer questions ONLY using the knowledge base provided below. \
If the answer is not in the knowledge base, politely say you don't have that information \
and suggest contacting support directly.\n\
Reply in the same language the user writes in.\n\
Be friendly, professional and helpful.";

/// Knowledge retrieved for a question, plus the tag it is cached under.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub tag: String,
    pub snippets: Vec<String>,
}

impl QueryContext {
    pub fn new(tag: impl Into<String>, snippets: Vec<String>) -> Self {
        Self {
            tag: tag.into(),
            snippets,
        }
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    Model,
    Cache,
}

/// A successful answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
}

/// Every attempt failed; `fallback` is what the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degraded {
    pub fallback: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Knobs for a single completion call.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&AiSettings> for ClientSettings {
    fn from(settings: &AiSettings) -> Self {
        Self {
            retry: RetryPolicy::new(settings.retry_attempts),
            request_timeout: settings.request_timeout,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }
}

/// Resilient front for the completion API.
pub struct AiClient {
    provider: Arc<dyn LlmProvider>,
    cache: Arc<ResponseCache>,
    settings: ClientSettings,
}

impl AiClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        cache: Arc<ResponseCache>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            provider,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Answer `query` using the retrieved context and prior turns.
    pub async fn answer(
        &self,
        query: &str,
        context: &QueryContext,
        history: &[Turn],
    ) -> Result<Answer, Degraded> {
        let key = cache_key(&context.tag, query);
        if let Some(text) = self.cache.get(&key).await {
            debug!(tag = %context.tag, "Cache hit");
            return Ok(Answer {
                text,
                source: AnswerSource::Cache,
            });
        }
        debug!(tag = %context.tag, "Cache miss");

        let request = build_request(query, context, history)
            .with_max_tokens(self.settings.max_tokens)
            .with_temperature(self.settings.temperature);

        let started = Instant::now();
        let policy = self.settings.retry;
        let mut attempt: u32 = 0;

        loop {
            match self.attempt(request.clone()).await {
                Ok(response) => {
                    info!(
                        model = %self.provider.model_name(),
                        attempt = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        output_tokens = response.output_tokens,
                        "AI answer received"
                    );
                    self.cache.put(key, response.content.clone()).await;
                    return Ok(Answer {
                        text: response.content,
                        source: AnswerSource::Model,
                    });
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = policy.attempts,
                        error = %e,
                        "AI request attempt failed"
                    );

                    if !e.is_retryable() || !policy.should_retry(attempt) {
                        error!(
                            attempts = attempt + 1,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            error = %e,
                            "AI unavailable, answering with fallback"
                        );
                        return Err(Degraded {
                            fallback: FALLBACK_ANSWER.to_string(),
                            attempts: attempt + 1,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = policy.with_jitter(policy.delay_for(attempt, e.retry_after()));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One bounded call. Blank completions count as invalid responses.
    async fn attempt(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let timeout = self.settings.request_timeout;
        let response = tokio::time::timeout(timeout, self.provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.provider.model_name().to_string(),
                timeout,
            })??;

        if response.content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.model_name().to_string(),
                reason: "empty completion".to_string(),
            });
        }
        Ok(response)
    }
}

/// System prompt with the knowledge snippets inlined.
pub fn build_system_prompt(snippets: &[String]) -> String {
    let knowledge = if snippets.is_empty() {
        "No knowledge base loaded.".to_string()
    } else {
        snippets.join("\n\n")
    };
    format!("{SYSTEM_PROMPT}\n\n=== KNOWLEDGE BASE ===\n{knowledge}\n=== END OF KNOWLEDGE BASE ===")
}

fn build_request(query: &str, context: &QueryContext, history: &[Turn]) -> CompletionRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(build_system_prompt(&context.snippets)));
    messages.extend(history.iter().map(|turn| match turn.role {
        TurnRole::User => ChatMessage::user(&turn.text),
        TurnRole::Assistant => ChatMessage::assistant(&turn.text),
    }));
    messages.push(ChatMessage::user(query));
    CompletionRequest::new(messages)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::llm::provider::{FinishReason, Role};

    #[derive(Clone)]
    enum Step {
        Reply(&'static str),
        Transport,
        Auth,
    }

    /// Replays a script of outcomes; repeats the last one when exhausted.
    struct ScriptedLlm {
        script: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
        last_request: Mutex<Option<CompletionRequest>>,
        delay: Duration,
    }

    impl ScriptedLlm {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                last_request: Mutex::new(None),
                delay: Duration::ZERO,
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    script.front().cloned().unwrap()
                }
            };
            match next {
                Step::Reply(content) => Ok(CompletionResponse {
                    content: content.to_string(),
                    input_tokens: 10,
                    output_tokens: 5,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
                Step::Transport => Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "connection reset".into(),
                }),
                Step::Auth => Err(LlmError::AuthFailed {
                    provider: "scripted".into(),
                }),
            }
        }
    }

    fn fast_settings(attempts: u32) -> ClientSettings {
        ClientSettings {
            retry: RetryPolicy::new(attempts)
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
            request_timeout: Duration::from_secs(5),
            max_tokens: 256,
            temperature: 0.7,
        }
    }

    fn client(llm: Arc<ScriptedLlm>, settings: ClientSettings) -> AiClient {
        let cache = Arc::new(ResponseCache::new(
            Arc::new(ManualClock::default()),
            Duration::from_secs(900),
            100,
        ));
        AiClient::new(llm, cache, settings)
    }

    fn ctx() -> QueryContext {
        QueryContext::new("prices", vec!["Group lessons cost 900 RUB.".into()])
    }

    #[tokio::test]
    async fn success_is_cached_and_second_call_skips_provider() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Reply("900 RUB per lesson")]));
        let client = client(llm.clone(), fast_settings(3));

        let first = client.answer("How much?", &ctx(), &[]).await.unwrap();
        assert_eq!(first.source, AnswerSource::Model);
        assert_eq!(first.text, "900 RUB per lesson");

        let second = client.answer("  how   MUCH? ", &ctx(), &[]).await.unwrap();
        assert_eq!(second.source, AnswerSource::Cache);
        assert_eq!(second.text, "900 RUB per lesson");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Step::Transport,
            Step::Transport,
            Step::Reply("third time lucky"),
        ]));
        let client = client(llm.clone(), fast_settings(3));

        let answer = client.answer("hi", &ctx(), &[]).await.unwrap();
        assert_eq!(answer.text, "third time lucky");
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_without_caching() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Transport]));
        let client = client(llm.clone(), fast_settings(3));

        let degraded = client.answer("hi", &ctx(), &[]).await.unwrap_err();
        assert_eq!(degraded.fallback, FALLBACK_ANSWER);
        assert_eq!(degraded.attempts, 3);
        assert!(degraded.last_error.contains("connection reset"));
        assert_eq!(llm.calls(), 3);
        assert!(client.cache().is_empty().await);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Auth]));
        let client = client(llm.clone(), fast_settings(3));

        let degraded = client.answer("hi", &ctx(), &[]).await.unwrap_err();
        assert_eq!(degraded.attempts, 1);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn empty_completion_counts_as_failure() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Reply("   "), Step::Reply("real answer")]));
        let client = client(llm.clone(), fast_settings(3));

        let answer = client.answer("hi", &ctx(), &[]).await.unwrap();
        assert_eq!(answer.text, "real answer");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn slow_provider_times_out_per_attempt() {
        let llm = Arc::new(
            ScriptedLlm::new(vec![Step::Reply("too late")]).slow(Duration::from_millis(200)),
        );
        let mut settings = fast_settings(2);
        settings.request_timeout = Duration::from_millis(20);
        let client = client(llm.clone(), settings);

        let degraded = client.answer("hi", &ctx(), &[]).await.unwrap_err();
        assert_eq!(degraded.attempts, 2);
        assert!(degraded.last_error.contains("timed out"));
    }

    #[tokio::test]
    async fn different_tags_do_not_share_cache() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Reply("a"), Step::Reply("b")]));
        let client = client(llm.clone(), fast_settings(1));

        client.answer("tell me more", &ctx(), &[]).await.unwrap();
        let other = QueryContext::new("teachers", vec![]);
        let answer = client.answer("tell me more", &other, &[]).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Model);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn request_carries_prompt_history_and_original_casing() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Reply("ok")]));
        let client = client(llm.clone(), fast_settings(1));
        let history = vec![
            Turn::new(TurnRole::User, "Hello", chrono::Utc::now()),
            Turn::new(TurnRole::Assistant, "Hi! How can I help?", chrono::Utc::now()),
        ];

        client.answer("How Much Is IELTS?", &ctx(), &history).await.unwrap();

        let request = llm.last_request.lock().unwrap().clone().unwrap();
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert!(request.messages[0].content.contains("Group lessons cost 900 RUB."));
        assert_eq!(request.messages[3].content, "How Much Is IELTS?");
        assert_eq!(request.max_tokens, Some(256));
    }

    #[test]
    fn system_prompt_without_snippets() {
        let prompt = build_system_prompt(&[]);
        assert!(prompt.contains("No knowledge base loaded."));
        assert!(prompt.starts_with("You are a helpful assistant for SpeakFlow English"));
    }
}
