//! LLM integration for the support bot.
//!
//! - [`provider`]: provider-neutral request/response types and the `LlmProvider` trait
//! - [`openrouter`]: the production provider (OpenRouter over reqwest)
//! - [`retry`], [`cache`]: backoff schedule and answer cache
//! - [`client`]: `AiClient`, which ties the above together behind one `answer` call

pub mod cache;
pub mod client;
pub mod openrouter;
pub mod provider;
pub mod retry;

pub use cache::{ResponseCache, spawn_cache_sweep};
pub use client::{AiClient, Answer, AnswerSource, ClientSettings, Degraded, QueryContext};
pub use openrouter::OpenRouterProvider;
pub use provider::*;
pub use retry::RetryPolicy;

use std::sync::Arc;

use crate::config::AiSettings;
use crate::error::LlmError;

/// Create the production LLM provider from configuration.
pub fn create_provider(
    settings: &AiSettings,
    app_title: &str,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    Ok(Arc::new(OpenRouterProvider::new(settings, app_title)?))
}
