//! Telegram channel: long-polls the Bot API for messages and button presses.
//!
//! Reply options are rendered as an inline keyboard; a press comes back as a
//! `callback_query` whose data is the option id.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;
use crate::router::ReplyOption;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Buttons per inline keyboard row.
const KEYBOARD_ROW_WIDTH: usize = 2;

const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// Check if a username or numeric id is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        check_user_allowed(&self.allowed_users, [username])
    }

    /// Send plain text to a chat we have not necessarily heard from in this
    /// process, e.g. the admin chat.
    pub async fn send_to(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        self.send_message(chat_id, text, &[]).await
    }

    /// Send a text message, split to fit Telegram's limit. The keyboard goes
    /// on the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let keyboard = if i == last && !options.is_empty() {
                Some(inline_keyboard(options))
            } else {
                None
            };
            self.send_message_chunk(chat_id, chunk, keyboard).await?;
        }
        Ok(())
    }

    /// Send a single chunk, Markdown-first with a plain-text fallback.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<Value>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = keyboard;
        }

        let markdown_resp = self.post("sendMessage", &body).await?;
        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        let plain_resp = self.post("sendMessage", &body).await?;
        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {}, plain: {})",
                    markdown_status, plain_err
                ),
            });
        }
        Ok(())
    }

    async fn post(&self, method: &str, body: &Value) -> Result<reqwest::Response, ChannelError> {
        self.client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let bot_token = self.bot_token.clone();
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client
                    .post(api_url(&bot_token, "getUpdates"))
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(parsed) = parse_update(update) else {
                        continue;
                    };

                    // Stop the client-side spinner whether or not we act on it.
                    if let Some(callback_id) = &parsed.callback_id {
                        let answered = client
                            .post(api_url(&bot_token, "answerCallbackQuery"))
                            .json(&json!({ "callback_query_id": callback_id }))
                            .send()
                            .await;
                        if let Err(e) = answered {
                            tracing::debug!("answerCallbackQuery failed: {e}");
                        }
                    }

                    if !check_user_allowed(&allowed_users, parsed.identities()) {
                        tracing::warn!(
                            "Telegram: ignoring update from unauthorized user: \
                             username={}, user_id={}",
                            parsed.username.as_deref().unwrap_or("unknown"),
                            parsed.message.user_id
                        );
                        continue;
                    }

                    if tx.send(parsed.message).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = chat_id_of(msg).ok_or_else(|| ChannelError::SendFailed {
            name: "telegram".into(),
            reason: "No chat_id in message metadata".into(),
        })?;

        self.send_message(chat_id, &response.content, &response.options)
            .await
    }

    async fn send_status(&self, status: StatusUpdate, metadata: &Value) -> Result<(), ChannelError> {
        let Some(chat_id) = metadata.get("chat_id").and_then(Value::as_str) else {
            return Ok(());
        };
        match status {
            StatusUpdate::Thinking(_) => {
                let _ = self
                    .post(
                        "sendChatAction",
                        &json!({ "chat_id": chat_id, "action": "typing" }),
                    )
                    .await;
            }
            StatusUpdate::Status(ref msg) if !msg.is_empty() => {
                let _ = self.send_to(chat_id, &format!("ℹ️ {msg}")).await;
            }
            StatusUpdate::Status(_) => {}
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: format!("telegram (getMe returned {})", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(bot_token: &str, method: &str) -> String {
    format!("https://api.telegram.org/bot{bot_token}/{method}")
}

fn chat_id_of(msg: &IncomingMessage) -> Option<&str> {
    msg.metadata.get("chat_id").and_then(Value::as_str)
}

/// An update we can act on.
#[derive(Debug)]
struct ParsedUpdate {
    message: IncomingMessage,
    username: Option<String>,
    /// Set for button presses, which must be acknowledged.
    callback_id: Option<String>,
}

impl ParsedUpdate {
    fn identities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.message.user_id.as_str()).chain(self.username.as_deref())
    }
}

/// Turn a raw update into an incoming message. Updates without text or
/// callback data are ignored.
fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    if let Some(callback) = update.get("callback_query") {
        let data = callback.get("data").and_then(Value::as_str)?;
        let from = callback.get("from")?;
        let chat = callback.get("message").and_then(|m| m.get("chat"));
        let callback_id = callback.get("id").and_then(Value::as_str).map(String::from);
        let mut parsed = build(from, chat, data)?;
        parsed.message = parsed.message.as_button();
        parsed.callback_id = callback_id;
        return Some(parsed);
    }

    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    build(message.get("from")?, message.get("chat"), text)
}

fn build(from: &Value, chat: Option<&Value>, content: &str) -> Option<ParsedUpdate> {
    let user_id = from.get("id").and_then(Value::as_i64)?.to_string();
    let username = from
        .get("username")
        .and_then(Value::as_str)
        .map(String::from);
    let chat_id = chat
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_else(|| user_id.clone());
    let first_name = from.get("first_name").and_then(Value::as_str);

    let mut message = IncomingMessage::new("telegram", &user_id, content).with_metadata(json!({
        "chat_id": chat_id,
        "username": username,
    }));
    if let Some(name) = first_name.or(username.as_deref()) {
        message = message.with_user_name(name);
    }

    Some(ParsedUpdate {
        message,
        username,
        callback_id: None,
    })
}

/// Lay options out as an inline keyboard, a few buttons per row.
fn inline_keyboard(options: &[ReplyOption]) -> Value {
    let rows: Vec<Value> = options
        .chunks(KEYBOARD_ROW_WIDTH)
        .map(|row| {
            Value::Array(
                row.iter()
                    .map(|o| json!({ "text": o.label, "callback_data": o.id }))
                    .collect(),
            )
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte offset of the max_len-th character.
        let limit = remaining
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MessageKind;

    fn channel(allowed: &[&str]) -> TelegramChannel {
        TelegramChannel::new(
            "test-token".into(),
            allowed.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn telegram_channel_name() {
        assert_eq!(channel(&["*"]).name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        assert_eq!(
            channel(&[]).api_url("getUpdates"),
            "https://api.telegram.org/bottest-token/getUpdates"
        );
    }

    #[test]
    fn telegram_user_allowed_wildcard() {
        assert!(channel(&["*"]).is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_allowed_specific() {
        let ch = channel(&["alice", "123456"]);
        assert!(ch.is_user_allowed("alice"));
        assert!(ch.is_user_allowed("123456"));
        assert!(!ch.is_user_allowed("bob"));
    }

    #[test]
    fn telegram_user_denied_empty() {
        assert!(!channel(&[]).is_user_allowed("alice"));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        assert!(!channel(&["alice"]).is_user_allowed("alice_bot"));
    }

    #[test]
    fn parse_text_message() {
        let update = json!({
            "update_id": 1,
            "message": {
                "text": "/start",
                "from": { "id": 42, "username": "alice", "first_name": "Alice" },
                "chat": { "id": 4242 }
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.message.user_id, "42");
        assert_eq!(parsed.message.content, "/start");
        assert_eq!(parsed.message.kind, MessageKind::Text);
        assert_eq!(parsed.message.user_name.as_deref(), Some("Alice"));
        assert_eq!(chat_id_of(&parsed.message), Some("4242"));
        assert!(parsed.callback_id.is_none());
        assert_eq!(parsed.identities().collect::<Vec<_>>(), vec!["42", "alice"]);
    }

    #[test]
    fn parse_callback_query() {
        let update = json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb-1",
                "data": "book_it",
                "from": { "id": 42 },
                "message": { "chat": { "id": 4242 } }
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.message.kind, MessageKind::Button);
        assert_eq!(parsed.message.content, "book_it");
        assert_eq!(parsed.callback_id.as_deref(), Some("cb-1"));
        assert_eq!(chat_id_of(&parsed.message), Some("4242"));
    }

    #[test]
    fn parse_ignores_non_text_updates() {
        let sticker = json!({
            "update_id": 3,
            "message": { "sticker": {}, "from": { "id": 1 }, "chat": { "id": 1 } }
        });
        assert!(parse_update(&sticker).is_none());
        assert!(parse_update(&json!({ "update_id": 4 })).is_none());
    }

    #[test]
    fn keyboard_rows_hold_two_buttons() {
        let options = vec![
            ReplyOption::new("a", "A"),
            ReplyOption::new("b", "B"),
            ReplyOption::new("c", "C"),
        ];
        let keyboard = inline_keyboard(&options);
        let rows = keyboard["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1]["callback_data"], "b");
        assert_eq!(rows[1][0]["text"], "C");
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4096);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_counts_characters_not_bytes() {
        let msg = "ж".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4096);
        assert_eq!(chunks[1].chars().count(), 904);
    }
}
