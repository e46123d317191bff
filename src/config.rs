//! Configuration types.
//!
//! Everything is read from environment variables (optionally seeded from a
//! `.env` file). `BotConfig::from_lookup` takes an arbitrary key lookup so the
//! parsing rules can be exercised without touching the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Default OpenRouter model.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Default OpenRouter API base URL.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Settings for the completion API and the resilience layer around it.
#[derive(Debug, Clone)]
pub struct AiSettings {
    /// OpenRouter API key.
    pub api_key: SecretString,
    /// Model identifier passed to the API.
    pub model: String,
    /// API base URL (OpenAI-compatible).
    pub base_url: String,
    /// Sampling temperature, 0–2.
    pub temperature: f32,
    /// Maximum tokens in a completion.
    pub max_tokens: u32,
    /// Total attempts per question before falling back.
    pub retry_attempts: u32,
    /// How long a cached answer stays fresh.
    pub cache_ttl: Duration,
    /// Cached answers kept before the oldest are evicted.
    pub cache_max_entries: usize,
    /// Upper bound on a single outbound attempt.
    pub request_timeout: Duration,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_key: SecretString::from(String::new()),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            retry_attempts: 3,
            cache_ttl: Duration::from_secs(900), // 15 minutes
            cache_max_entries: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// When set, logs also go to a daily rolling file in this directory.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            dir: None,
        }
    }
}

/// SMTP settings for emailing confirmed bookings to the school.
#[derive(Debug, Clone)]
pub struct BookingEmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub to_address: String,
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Display name, sent to the API as the `X-Title` header.
    pub bot_name: String,
    /// Telegram bot token. Without it only the CLI channel runs.
    pub telegram_token: Option<String>,
    /// Telegram usernames or numeric ids allowed to talk to the bot (`*` = everyone).
    pub allowed_users: Vec<String>,
    /// Completion API settings.
    pub ai: AiSettings,
    /// Turns of conversation kept per user.
    pub max_history_turns: usize,
    /// Idle time after which an open booking is abandoned.
    pub booking_timeout: Duration,
    /// How often the session and cache sweeps run.
    pub sweep_interval: Duration,
    pub booking_enabled: bool,
    pub ai_chat_enabled: bool,
    /// Directory holding the knowledge base text files.
    pub knowledge_dir: PathBuf,
    /// Telegram chat that receives confirmed bookings.
    pub admin_chat_id: Option<String>,
    pub booking_email: Option<BookingEmailConfig>,
    pub log: LogConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_name: "SpeakFlow English Support".to_string(),
            telegram_token: None,
            allowed_users: vec!["*".to_string()],
            ai: AiSettings::default(),
            max_history_turns: 20,
            booking_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
            booking_enabled: true,
            ai_chat_enabled: true,
            knowledge_dir: PathBuf::from("./knowledge"),
            admin_chat_id: None,
            booking_email: None,
            log: LogConfig::default(),
        }
    }
}

impl BotConfig {
    /// Build the configuration from the process environment, loading `.env`
    /// first if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup and validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENROUTER_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".into()))?;

        let ai = AiSettings {
            api_key: SecretString::from(api_key),
            model: get("OPENROUTER_MODEL").unwrap_or(defaults.ai.model),
            base_url: get("OPENROUTER_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.ai.base_url),
            temperature: parse_or(&get, "AI_TEMPERATURE", defaults.ai.temperature)?,
            max_tokens: parse_or(&get, "AI_MAX_TOKENS", defaults.ai.max_tokens)?,
            retry_attempts: parse_or(&get, "AI_RETRY_ATTEMPTS", defaults.ai.retry_attempts)?,
            cache_ttl: secs_or(&get, "AI_CACHE_TTL", defaults.ai.cache_ttl)?,
            cache_max_entries: parse_or(
                &get,
                "AI_CACHE_MAX_ENTRIES",
                defaults.ai.cache_max_entries,
            )?,
            request_timeout: secs_or(&get, "AI_REQUEST_TIMEOUT_SECS", defaults.ai.request_timeout)?,
        };

        let booking_timeout_minutes: u64 = parse_or(
            &get,
            "BOOKING_TIMEOUT_MINUTES",
            defaults.booking_timeout.as_secs() / 60,
        )?;

        let allowed_users = get("TELEGRAM_ALLOWED_USERS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.allowed_users);

        let log = LogConfig {
            level: get("LOG_LEVEL")
                .map(|l| l.to_lowercase())
                .unwrap_or(defaults.log.level),
            format: match get("LOG_FORMAT") {
                Some(raw) => raw
                    .parse()
                    .map_err(|e: String| ConfigError::invalid("LOG_FORMAT", e))?,
                None => defaults.log.format,
            },
            dir: get("LOG_DIR").map(PathBuf::from),
        };

        let config = Self {
            bot_name: get("BOT_NAME").unwrap_or(defaults.bot_name),
            telegram_token: get("TELEGRAM_BOT_TOKEN"),
            allowed_users,
            ai,
            max_history_turns: parse_or(&get, "MAX_HISTORY_MESSAGES", defaults.max_history_turns)?,
            booking_timeout: Duration::from_secs(booking_timeout_minutes.saturating_mul(60)),
            sweep_interval: secs_or(&get, "SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            booking_enabled: bool_or(&get, "ENABLE_BOOKING", defaults.booking_enabled)?,
            ai_chat_enabled: bool_or(&get, "ENABLE_AI_CHAT", defaults.ai_chat_enabled)?,
            knowledge_dir: get("KNOWLEDGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.knowledge_dir),
            admin_chat_id: get("ADMIN_CHAT_ID"),
            booking_email: booking_email_from(&get)?,
            log,
        };

        config.validate()?;
        Ok(config)
    }

    /// Range checks. Options have no interdependencies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ai.api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("OPENROUTER_API_KEY".into()));
        }
        if self.ai.model.trim().is_empty() {
            return Err(ConfigError::invalid("OPENROUTER_MODEL", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::invalid(
                "AI_TEMPERATURE",
                format!("must be between 0 and 2, got {}", self.ai.temperature),
            ));
        }
        if self.ai.max_tokens < 1 {
            return Err(ConfigError::invalid("AI_MAX_TOKENS", "must be at least 1"));
        }
        if self.ai.retry_attempts < 1 {
            return Err(ConfigError::invalid("AI_RETRY_ATTEMPTS", "must be at least 1"));
        }
        if self.ai.cache_max_entries < 1 {
            return Err(ConfigError::invalid("AI_CACHE_MAX_ENTRIES", "must be at least 1"));
        }
        if self.ai.request_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "AI_REQUEST_TIMEOUT_SECS",
                "must be at least 1",
            ));
        }
        if self.max_history_turns < 1 {
            return Err(ConfigError::invalid("MAX_HISTORY_MESSAGES", "must be at least 1"));
        }
        if self.booking_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "BOOKING_TIMEOUT_MINUTES",
                "must be at least 1",
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("SWEEP_INTERVAL_SECS", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}

fn bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(key, format!("'{raw}' is not a boolean"))),
        },
        None => Ok(default),
    }
}

/// Returns `None` when `BOOKING_EMAIL_SMTP_HOST` is unset (email notifications off).
fn booking_email_from<G>(get: &G) -> Result<Option<BookingEmailConfig>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(smtp_host) = get("BOOKING_EMAIL_SMTP_HOST") else {
        return Ok(None);
    };
    let to_address = get("BOOKING_EMAIL_TO")
        .ok_or_else(|| ConfigError::MissingEnvVar("BOOKING_EMAIL_TO".into()))?;
    let username = get("BOOKING_EMAIL_USERNAME").unwrap_or_default();
    Ok(Some(BookingEmailConfig {
        smtp_port: parse_or(get, "BOOKING_EMAIL_SMTP_PORT", 587)?,
        smtp_host,
        password: SecretString::from(get("BOOKING_EMAIL_PASSWORD").unwrap_or_default()),
        from_address: get("BOOKING_EMAIL_FROM").unwrap_or_else(|| username.clone()),
        username,
        to_address,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_only_api_key() {
        let config = BotConfig::from_lookup(lookup(&[("OPENROUTER_API_KEY", "sk-or-test")]))
            .unwrap();
        assert_eq!(config.ai.retry_attempts, 3);
        assert_eq!(config.ai.cache_ttl, Duration::from_secs(900));
        assert_eq!(config.max_history_turns, 20);
        assert_eq!(config.booking_timeout, Duration::from_secs(600));
        assert_eq!(config.ai.max_tokens, 1024);
        assert!((config.ai.temperature - 0.7).abs() < f32::EPSILON);
        assert!(config.booking_enabled);
        assert!(config.ai_chat_enabled);
        assert!(config.telegram_token.is_none());
        assert!(config.booking_email.is_none());
        assert_eq!(config.allowed_users, vec!["*".to_string()]);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = BotConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENROUTER_API_KEY"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = BotConfig::from_lookup(lookup(&[("OPENROUTER_API_KEY", "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = BotConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("AI_RETRY_ATTEMPTS", "5"),
            ("AI_CACHE_TTL", "60"),
            ("MAX_HISTORY_MESSAGES", "8"),
            ("BOOKING_TIMEOUT_MINUTES", "2"),
            ("AI_TEMPERATURE", "1.5"),
            ("ENABLE_BOOKING", "false"),
            ("ENABLE_AI_CHAT", "0"),
            ("OPENROUTER_BASE_URL", "http://localhost:8080/v1/"),
            ("TELEGRAM_ALLOWED_USERS", "alice, 12345 ,"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.ai.retry_attempts, 5);
        assert_eq!(config.ai.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.max_history_turns, 8);
        assert_eq!(config.booking_timeout, Duration::from_secs(120));
        assert!(!config.booking_enabled);
        assert!(!config.ai_chat_enabled);
        assert_eq!(config.ai.base_url, "http://localhost:8080/v1");
        assert_eq!(config.allowed_users, vec!["alice", "12345"]);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let err = BotConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("AI_TEMPERATURE", "2.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AI_TEMPERATURE"));
    }

    #[test]
    fn zero_retry_attempts_rejected() {
        let err = BotConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("AI_RETRY_ATTEMPTS", "0"),
        ]))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AI_RETRY_ATTEMPTS")
        );
    }

    #[test]
    fn malformed_number_rejected() {
        let err = BotConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("AI_MAX_TOKENS", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AI_MAX_TOKENS"));
    }

    #[test]
    fn malformed_bool_rejected() {
        let err = BotConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("ENABLE_BOOKING", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ENABLE_BOOKING"));
    }

    #[test]
    fn booking_email_requires_recipient() {
        let err = BotConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("BOOKING_EMAIL_SMTP_HOST", "smtp.example.com"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "BOOKING_EMAIL_TO"));
    }

    #[test]
    fn booking_email_parsed() {
        let config = BotConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("BOOKING_EMAIL_SMTP_HOST", "smtp.example.com"),
            ("BOOKING_EMAIL_TO", "school@example.com"),
            ("BOOKING_EMAIL_USERNAME", "bot@example.com"),
        ]))
        .unwrap();
        let email = config.booking_email.unwrap();
        assert_eq!(email.smtp_port, 587);
        assert_eq!(email.from_address, "bot@example.com");
        assert_eq!(email.to_address, "school@example.com");
    }

    #[test]
    fn log_format_parse() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!(" Json ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
