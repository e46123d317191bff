use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use speakflow_bot::booking::{self, BookingManager, Catalog};
use speakflow_bot::channels::{ChannelManager, CliChannel, TelegramChannel};
use speakflow_bot::clock::{Clock, SystemClock};
use speakflow_bot::config::{BotConfig, LogConfig, LogFormat};
use speakflow_bot::conversation::ConversationStore;
use speakflow_bot::dispatcher::{DEFAULT_IDLE_AFTER, Dispatcher};
use speakflow_bot::knowledge::FileKnowledgeBase;
use speakflow_bot::llm::{self, AiClient, ClientSettings, ResponseCache};
use speakflow_bot::notify::{
    BookingNotifier, ChannelNotifier, EmailNotifier, FanoutNotifier, LogNotifier, format_booking,
};
use speakflow_bot::router::{RouterSettings, SessionRouter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export OPENROUTER_API_KEY=sk-or-...");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(&config.log);

    eprintln!("🎓 {} v{}", config.bot_name, env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.ai.model);

    // ── Knowledge ────────────────────────────────────────────────────────
    let knowledge = match FileKnowledgeBase::load(&config.knowledge_dir).await {
        Ok(kb) => kb,
        Err(e) => {
            tracing::warn!(error = %e, "Knowledge base unavailable, answering without it");
            FileKnowledgeBase::default()
        }
    };
    eprintln!(
        "   Knowledge: {}{}",
        config.knowledge_dir.display(),
        if knowledge.is_empty() { " (empty)" } else { "" }
    );

    // ── AI ───────────────────────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider = llm::create_provider(&config.ai, &config.bot_name)?;
    let cache = Arc::new(ResponseCache::new(
        clock.clone(),
        config.ai.cache_ttl,
        config.ai.cache_max_entries,
    ));
    let _cache_sweep = llm::spawn_cache_sweep(cache.clone(), config.sweep_interval);
    let ai = Arc::new(AiClient::new(
        provider,
        cache,
        ClientSettings::from(&config.ai),
    ));

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();
    channels.add(Arc::new(CliChannel::new()));

    let telegram = config
        .telegram_token
        .clone()
        .map(|token| Arc::new(TelegramChannel::new(token, config.allowed_users.clone())));
    if let Some(telegram) = &telegram {
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if config.allowed_users.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else {
                config.allowed_users.join(", ")
            }
        );
        channels.add(telegram.clone());
    }

    // ── Booking ──────────────────────────────────────────────────────────
    let mut sinks: Vec<Arc<dyn BookingNotifier>> = vec![Arc::new(LogNotifier)];
    if let Some(email) = config.booking_email.clone() {
        eprintln!("   Booking email: {} via {}", email.to_address, email.smtp_host);
        sinks.push(Arc::new(EmailNotifier::new(email)));
    }
    if let (Some(telegram), Some(admin_chat)) = (telegram.clone(), config.admin_chat_id.clone()) {
        let (relay, mut bookings) = ChannelNotifier::new();
        sinks.push(Arc::new(relay));
        tokio::spawn(async move {
            while let Some(record) = bookings.recv().await {
                if let Err(e) = telegram.send_to(&admin_chat, &format_booking(&record)).await {
                    tracing::warn!(booking_id = %record.id, error = %e, "Admin notification failed");
                }
            }
        });
    }

    let booking = Arc::new(BookingManager::new(
        Catalog::school_default(),
        clock,
        config.booking_timeout,
        Arc::new(FanoutNotifier::new(sinks)),
    ));
    let _booking_sweep = booking::spawn_sweep_task(booking.clone(), config.sweep_interval);
    eprintln!(
        "   Booking: {} (timeout {} min)",
        if config.booking_enabled { "enabled" } else { "disabled" },
        config.booking_timeout.as_secs() / 60
    );

    // ── Router ───────────────────────────────────────────────────────────
    let router = Arc::new(SessionRouter::new(
        Arc::new(ConversationStore::new(config.max_history_turns)),
        booking,
        ai,
        Arc::new(knowledge),
        RouterSettings::from(&config),
    ));

    let channels = Arc::new(channels);
    eprintln!("   Channels: {}\n", channels.names().join(", "));

    let stream = channels.start_all().await?;
    let dispatcher = Arc::new(Dispatcher::new(router, channels.clone(), DEFAULT_IDLE_AFTER));
    dispatcher.run(stream).await;

    channels.shutdown_all().await?;
    Ok(())
}

/// Text or JSON to stderr, or to a daily rolling file when a log directory
/// is configured. `RUST_LOG` overrides the configured level.
fn init_tracing(log: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let (writer, guard) = match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "speakflow-bot.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(log.dir.is_none())
        .with_writer(writer);

    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    guard
}
