//! Channel trait and the message types that cross it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChannelError;
use crate::router::{InboundEvent, Payload, ReplyOption, Response, ResponseKind};

/// Stream of messages produced by a started channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// How the user produced the message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    /// A press on one of the options we offered; `content` is the option id.
    Button,
}

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Name of the channel it came from.
    pub channel: String,
    /// Stable per-user identifier within the channel.
    pub user_id: String,
    pub user_name: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub received_at: DateTime<Utc>,
    /// Channel-specific routing data, e.g. the Telegram chat id.
    pub metadata: serde_json::Value,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            user_id: user_id.into(),
            user_name: None,
            content: content.into(),
            kind: MessageKind::Text,
            received_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn as_button(mut self) -> Self {
        self.kind = MessageKind::Button;
        self
    }

    /// Key that identifies the sender across every channel.
    pub fn sender_key(&self) -> String {
        format!("{}:{}", self.channel, self.user_id)
    }

    /// The router's view of this message.
    pub fn to_event(&self) -> InboundEvent {
        let payload = match self.kind {
            MessageKind::Text => Payload::Text(self.content.clone()),
            MessageKind::Button => Payload::Button(self.content.clone()),
        };
        InboundEvent {
            user_id: self.sender_key(),
            payload,
            timestamp: self.received_at,
        }
    }
}

/// A reply to send back through a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingResponse {
    pub content: String,
    pub options: Vec<ReplyOption>,
    pub kind: Option<ResponseKind>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            options: Vec::new(),
            kind: None,
        }
    }

    pub fn with_options(mut self, options: Vec<ReplyOption>) -> Self {
        self.options = options;
        self
    }
}

impl From<Response> for OutgoingResponse {
    fn from(response: Response) -> Self {
        Self {
            content: response.text,
            options: response.options,
            kind: Some(response.kind),
        }
    }
}

/// Progress shown while a reply is being produced.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Thinking(String),
    Status(String),
}

/// A source of user messages and a sink for replies.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Reply to `msg`.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    /// Show progress. Channels without a way to do so ignore it.
    async fn send_status(
        &self,
        _status: StatusUpdate,
        _metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_key_includes_channel() {
        let msg = IncomingMessage::new("telegram", "42", "hello");
        let event = msg.to_event();
        assert_eq!(event.user_id, "telegram:42");
        assert_eq!(event.payload, Payload::Text("hello".into()));
        assert_eq!(event.timestamp, msg.received_at);
    }

    #[test]
    fn button_message_becomes_button_payload() {
        let event = IncomingMessage::new("telegram", "42", "book_it")
            .as_button()
            .to_event();
        assert_eq!(event.payload, Payload::Button("book_it".into()));
    }

    #[test]
    fn response_keeps_options_and_kind() {
        let response = Response::new(ResponseKind::Menu, "Hi")
            .with_options(vec![ReplyOption::new("menu_book", "Book")]);
        let out = OutgoingResponse::from(response);
        assert_eq!(out.content, "Hi");
        assert_eq!(out.options.len(), 1);
        assert_eq!(out.kind, Some(ResponseKind::Menu));
    }
}
