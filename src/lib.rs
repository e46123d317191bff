//! SpeakFlow English support bot: AI answers, trial-lesson booking.

pub mod booking;
pub mod channels;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod notify;
pub mod router;
pub mod validation;
