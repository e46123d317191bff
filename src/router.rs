//! Session router: turns one inbound event into one response.
//!
//! Commands are handled first. Otherwise, if the user has an open booking the
//! event goes to the booking manager; if not, the text is answered by the AI
//! client with knowledge retrieved for its topic, and both sides of the
//! exchange are recorded in the conversation store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::booking::{BookingManager, BookingOutcome, prompts};
use crate::config::BotConfig;
use crate::conversation::{ConversationStore, Turn};
use crate::knowledge::{KnowledgeBase, Topic, classify_topic};
use crate::llm::{AiClient, AnswerSource, QueryContext};
use crate::validation::sanitize_input;

/// Longest user text forwarded to the model, in characters.
pub const MAX_INPUT_CHARS: usize = 2000;

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    /// A button press, carrying the option id.
    Button(String),
}

impl Payload {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(s) | Self::Button(s) => s,
        }
    }
}

/// One event from one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub user_id: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn text(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            payload: Payload::Text(text.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn button(user_id: impl Into<String>, option_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            payload: Payload::Button(option_id.into()),
            timestamp: Utc::now(),
        }
    }
}

/// A selectable option attached to a response. Channels decide how to show it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOption {
    pub id: String,
    pub label: String,
}

impl ReplyOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// What kind of reply this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Answer,
    CachedAnswer,
    /// The AI was unreachable; the text is the static fallback.
    Fallback,
    Menu,
    Info,
    BookingStep,
    BookingRejected,
    BookingConfirmed,
    BookingCancelled,
    BookingExpired,
    Reset,
}

/// The reply to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub kind: ResponseKind,
    pub options: Vec<ReplyOption>,
}

impl Response {
    pub fn new(kind: ResponseKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<ReplyOption>) -> Self {
        self.options = options;
        self
    }
}

/// A recognised command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Book,
    Cancel,
    Reset,
    Chat,
    Info(Topic),
}

/// Parses slash commands, menu button ids and a few plain phrases.
pub struct CommandParser;

impl CommandParser {
    pub fn parse(content: &str) -> Option<Command> {
        let lower = content.trim().to_lowercase();
        // "/start@SpeakFlowBot" → "/start"
        let lower = match lower.split_once('@') {
            Some((command, _)) if command.starts_with('/') => command.to_string(),
            _ => lower,
        };

        let command = match lower.as_str() {
            "/start" | "/menu" | "menu_main" | "back_to_menu" => Command::Start,
            "/help" | "/?" | "menu_help" => Command::Help,
            "/book" | "start booking" | "menu_book" => Command::Book,
            "/cancel" | "cancel" | "cancel_booking" => Command::Cancel,
            "/reset" => Command::Reset,
            "/chat" | "menu_chat" => Command::Chat,
            "/courses" | "menu_courses" => Command::Info(Topic::Courses),
            "/prices" | "menu_prices" => Command::Info(Topic::Prices),
            "/teachers" | "menu_teachers" => Command::Info(Topic::Teachers),
            "/reviews" | "menu_reviews" => Command::Info(Topic::Reviews),
            "/schedule" | "menu_schedule" => Command::Info(Topic::Schedule),
            "/faq" | "menu_faq" => Command::Info(Topic::Faq),
            "/contact" | "menu_contact" => Command::Info(Topic::Contact),
            _ => return None,
        };
        Some(command)
    }
}

/// Feature switches.
#[derive(Debug, Clone, Copy)]
pub struct RouterSettings {
    pub booking_enabled: bool,
    pub ai_chat_enabled: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            booking_enabled: true,
            ai_chat_enabled: true,
        }
    }
}

impl From<&BotConfig> for RouterSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            booking_enabled: config.booking_enabled,
            ai_chat_enabled: config.ai_chat_enabled,
        }
    }
}

/// Top-level per-event orchestrator.
pub struct SessionRouter {
    conversations: Arc<ConversationStore>,
    booking: Arc<BookingManager>,
    ai: Arc<AiClient>,
    knowledge: Arc<dyn KnowledgeBase>,
    settings: RouterSettings,
    /// One async lock per user, held for the whole of `handle`.
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionRouter {
    pub fn new(
        conversations: Arc<ConversationStore>,
        booking: Arc<BookingManager>,
        ai: Arc<AiClient>,
        knowledge: Arc<dyn KnowledgeBase>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            conversations,
            booking,
            ai,
            knowledge,
            settings,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn booking(&self) -> &Arc<BookingManager> {
        &self.booking
    }

    fn gate(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.entry(user_id.to_string()).or_default().clone()
    }

    /// Handle one event. Events for the same user are processed one at a time.
    pub async fn handle(&self, event: InboundEvent) -> Response {
        let gate = self.gate(&event.user_id);
        let _guard = gate.lock().await;
        let user_id = event.user_id.as_str();

        if let Some(command) = CommandParser::parse(event.payload.as_str()) {
            info!(user_id, ?command, "Command executed");
            return self.run_command(user_id, command).await;
        }

        if self.booking.take_expiry(user_id).await {
            return prompts::expired(self.booking.timeout());
        }

        if self.booking.has_session(user_id).await {
            return self.continue_booking(user_id, event.payload.as_str()).await;
        }

        match &event.payload {
            // Buttons only mean something inside a booking.
            Payload::Button(id) => {
                debug!(user_id, option = %id, "Stale button press");
                prompts::no_session()
            }
            Payload::Text(text) => self.chat(user_id, text, event.timestamp).await,
        }
    }

    async fn run_command(&self, user_id: &str, command: Command) -> Response {
        let expired = command != Command::Reset && self.booking.take_expiry(user_id).await;
        let response = match command {
            Command::Reset => return self.reset(user_id).await,
            Command::Start => main_menu(),
            Command::Help => help(),
            Command::Chat => Response::new(
                ResponseKind::Info,
                if self.settings.ai_chat_enabled {
                    "💬 Ask me anything about SpeakFlow English: courses, prices, teachers, schedule."
                } else {
                    "AI chat is turned off right now. Please use the menu: /menu"
                },
            ),
            Command::Info(topic) => self.info(topic),
            Command::Book if !self.settings.booking_enabled => Response::new(
                ResponseKind::Info,
                "Online booking is unavailable right now. Please contact us: \
                 support@speakflow-english.com, +7 495 123 45 67.",
            ),
            Command::Book => {
                let session = self.booking.start(user_id).await;
                prompts::step_prompt(&session, self.booking.catalog())
            }
            Command::Cancel => {
                if self.booking.cancel(user_id).await {
                    prompts::cancelled()
                } else {
                    prompts::no_session()
                }
            }
        };

        if expired {
            let notice = prompts::expired(self.booking.timeout());
            Response {
                text: format!("{}\n\n{}", notice.text, response.text),
                ..response
            }
        } else {
            response
        }
    }

    async fn reset(&self, user_id: &str) -> Response {
        self.conversations.clear(user_id).await;
        self.booking.reset(user_id).await;
        info!(user_id, "Conversation reset");
        Response::new(
            ResponseKind::Reset,
            "🔄 Done! I've cleared our conversation and any booking in progress.",
        )
        .with_options(main_menu().options)
    }

    async fn continue_booking(&self, user_id: &str, input: &str) -> Response {
        let catalog = self.booking.catalog();
        match self.booking.handle(user_id, input).await {
            BookingOutcome::Step(session) => prompts::step_prompt(&session, catalog),
            BookingOutcome::Rejected { reason, session } => {
                prompts::reprompt(&reason, &session, catalog)
            }
            BookingOutcome::Confirmed(record) => prompts::confirmed(&record),
            BookingOutcome::Cancelled => prompts::cancelled(),
            BookingOutcome::Expired => prompts::expired(self.booking.timeout()),
            BookingOutcome::NoSession => prompts::no_session(),
        }
    }

    async fn chat(&self, user_id: &str, raw: &str, at: DateTime<Utc>) -> Response {
        if !self.settings.ai_chat_enabled {
            return Response::new(
                ResponseKind::Info,
                "AI chat is turned off right now. Use /menu to browse courses, prices and more.",
            )
            .with_options(main_menu().options);
        }

        let text = sanitize_input(raw, MAX_INPUT_CHARS);
        if text.is_empty() {
            return Response::new(ResponseKind::Info, "Please send your question as text.");
        }

        let topic = classify_topic(&text);
        let context = QueryContext::new(topic.as_str(), self.knowledge.context_for(topic));
        let history = self.conversations.history(user_id).await;
        self.conversations.append(user_id, Turn::user(&text, at)).await;

        match self.ai.answer(&text, &context, &history).await {
            Ok(answer) => {
                self.conversations
                    .append(user_id, Turn::assistant(&answer.text, Utc::now()))
                    .await;
                let kind = match answer.source {
                    AnswerSource::Model => ResponseKind::Answer,
                    AnswerSource::Cache => ResponseKind::CachedAnswer,
                };
                Response::new(kind, answer.text)
            }
            Err(degraded) => Response::new(ResponseKind::Fallback, degraded.fallback),
        }
    }

    fn info(&self, topic: Topic) -> Response {
        let snippets = self.knowledge.context_for(topic);
        let text = match snippets.first() {
            Some(primary) => primary.clone(),
            None => format!(
                "Sorry, information about {topic} isn't available right now. \
                 Ask me a question or contact support@speakflow-english.com."
            ),
        };
        let mut options = Vec::new();
        if self.settings.booking_enabled {
            options.push(ReplyOption::new("menu_book", "📝 Book a trial lesson"));
        }
        options.push(ReplyOption::new("menu_main", "⬅️ Menu"));
        Response::new(ResponseKind::Info, text).with_options(options)
    }
}

fn main_menu() -> Response {
    Response::new(
        ResponseKind::Menu,
        "👋 Welcome to SpeakFlow English!\n\n\
         I can tell you about our courses, prices and teachers, answer your questions, \
         and book you a free trial lesson. What would you like to do?",
    )
    .with_options(vec![
        ReplyOption::new("menu_courses", "📚 Courses"),
        ReplyOption::new("menu_prices", "💰 Prices"),
        ReplyOption::new("menu_teachers", "👨‍🏫 Teachers"),
        ReplyOption::new("menu_schedule", "📅 Schedule"),
        ReplyOption::new("menu_reviews", "⭐ Reviews"),
        ReplyOption::new("menu_faq", "❓ FAQ"),
        ReplyOption::new("menu_book", "📝 Book a lesson"),
        ReplyOption::new("menu_contact", "📞 Contact"),
        ReplyOption::new("menu_chat", "💬 Ask the AI"),
    ])
}

fn help() -> Response {
    Response::new(
        ResponseKind::Info,
        "Available commands:\n\n\
         /start, /menu: main menu\n\
         /courses: our courses\n\
         /prices: prices and packages\n\
         /teachers: our teachers\n\
         /reviews: student reviews\n\
         /faq: frequently asked questions\n\
         /contact: how to reach us\n\
         /book: book a free trial lesson\n\
         /cancel: cancel a booking in progress\n\
         /reset: clear our conversation\n\n\
         Or just type your question!",
    )
}
