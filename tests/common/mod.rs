//! Shared fixtures: a scripted model and a fully wired router.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use speakflow_bot::booking::{BookingManager, BookingRecord, Catalog};
use speakflow_bot::clock::ManualClock;
use speakflow_bot::conversation::ConversationStore;
use speakflow_bot::error::LlmError;
use speakflow_bot::knowledge::{FileKnowledgeBase, Section};
use speakflow_bot::llm::{
    AiClient, ClientSettings, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    ResponseCache, RetryPolicy, Role,
};
use speakflow_bot::notify::ChannelNotifier;
use speakflow_bot::router::{RouterSettings, SessionRouter};

pub const BOOKING_TIMEOUT: Duration = Duration::from_secs(600);

/// Answers "answer to: <question>", or fails every call.
pub struct FakeLlm {
    fail: bool,
    /// Questions containing this word take `slow_delay` to answer.
    slow_word: Option<(&'static str, Duration)>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeLlm {
    pub fn answering() -> Self {
        Self {
            fail: false,
            slow_word: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::answering()
        }
    }

    pub fn slow_on(mut self, word: &'static str, delay: Duration) -> Self {
        self.slow_word = Some((word, delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for FakeLlm {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let question = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if let Some((word, delay)) = self.slow_word {
            if question.contains(word) {
                tokio::time::sleep(delay).await;
            }
        }

        if self.fail {
            return Err(LlmError::RequestFailed {
                provider: "fake".into(),
                reason: "connection refused".into(),
            });
        }

        Ok(CompletionResponse {
            content: format!("answer to: {question}"),
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

pub struct Harness {
    pub router: Arc<SessionRouter>,
    pub clock: Arc<ManualClock>,
    pub llm: Arc<FakeLlm>,
    pub bookings: mpsc::UnboundedReceiver<BookingRecord>,
}

pub fn harness(llm: FakeLlm) -> Harness {
    harness_with(llm, RouterSettings::default())
}

pub fn harness_with(llm: FakeLlm, settings: RouterSettings) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let llm = Arc::new(llm);

    let cache = Arc::new(ResponseCache::new(
        clock.clone(),
        Duration::from_secs(3600),
        100,
    ));
    let ai = Arc::new(AiClient::new(
        llm.clone(),
        cache,
        ClientSettings {
            retry: RetryPolicy::new(2).with_base_delay(Duration::from_millis(1)),
            request_timeout: Duration::from_secs(5),
            max_tokens: 256,
            temperature: 0.7,
        },
    ));

    let (notifier, bookings) = ChannelNotifier::new();
    let booking = Arc::new(BookingManager::new(
        Catalog::school_default(),
        clock.clone(),
        BOOKING_TIMEOUT,
        Arc::new(notifier),
    ));

    let knowledge = FileKnowledgeBase::from_sections([
        (
            Section::Pricing,
            "💰 Group lessons: 900 RUB. Individual lessons: 2000 RUB.".to_string(),
        ),
        (
            Section::Courses,
            "📚 General English A1-A2, B1-B2, Business English, IELTS prep.".to_string(),
        ),
        (
            Section::Teachers,
            "👨‍🏫 All teachers hold CELTA or DELTA certificates.".to_string(),
        ),
    ]);

    let router = Arc::new(SessionRouter::new(
        Arc::new(ConversationStore::new(50)),
        booking,
        ai,
        Arc::new(knowledge),
        settings,
    ));

    Harness {
        router,
        clock,
        llm,
        bookings,
    }
}
