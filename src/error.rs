//! Error types for the SpeakFlow support bot.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Knowledge base error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors. Fatal at startup only.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel health check failed: {name}")]
    HealthCheckFailed { name: String },
}

/// Completion API errors.
///
/// Everything except `AuthFailed` is treated as transient by the AI client and
/// retried before degrading to the fallback answer.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthFailed { .. })
    }

    /// Server-provided hint for how long to wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Knowledge base loading errors.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("Knowledge directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Booking notification delivery errors. Logged, never surfaced to users.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notifier {sink} failed: {reason}")]
    DeliveryFailed { sink: String, reason: String },
}

impl NotifyError {
    pub(crate) fn delivery(sink: &str, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            sink: sink.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_is_not_retryable() {
        let err = LlmError::AuthFailed {
            provider: "openrouter".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_failures_are_retryable() {
        let errors = [
            LlmError::Timeout {
                provider: "openrouter".into(),
                timeout: Duration::from_secs(30),
            },
            LlmError::RateLimited {
                provider: "openrouter".into(),
                retry_after: None,
            },
            LlmError::RequestFailed {
                provider: "openrouter".into(),
                reason: "connection reset".into(),
            },
            LlmError::InvalidResponse {
                provider: "openrouter".into(),
                reason: "empty choices".into(),
            },
        ];
        for err in errors {
            assert!(err.is_retryable(), "{err} should be retryable");
        }
    }

    #[test]
    fn retry_after_only_from_rate_limit() {
        let limited = LlmError::RateLimited {
            provider: "openrouter".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));

        let failed = LlmError::RequestFailed {
            provider: "openrouter".into(),
            reason: "boom".into(),
        };
        assert_eq!(failed.retry_after(), None);
    }

    #[test]
    fn config_error_converts_into_top_level() {
        let err: Error = ConfigError::MissingEnvVar("OPENROUTER_API_KEY".into()).into();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }
}
