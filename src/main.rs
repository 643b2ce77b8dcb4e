use std::path::PathBuf;
use std::sync::Arc;

use teloxide::Bot;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use askchannel::bot::lifecycle::install_signal_handler;
use askchannel::bot::telegram::describe_recipient;
use askchannel::bot::{Lifecycle, MessageRouter, Publisher, RouterSettings, TelegramApi, TelegramClient};
use askchannel::completion::Client as CompletionClient;
use askchannel::config::Config;
use askchannel::telegram_log::TelegramLogLayer;
use askchannel::transport;

#[tokio::main]
async fn main() {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match Config::from_env(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.bot_token);
    let telegram: Arc<dyn TelegramApi> = Arc::new(TelegramClient::new(bot));

    // Held for the life of the process so buffered file logs get flushed.
    let _log_guard = init_logging(&config, telegram.clone());

    std::panic::set_hook(Box::new(|panic| {
        error!("💥 {panic}");
    }));

    info!("🚀 Starting askchannel in {} mode", config.mode.as_str());
    info!("Publishing to channel {}", describe_recipient(&config.channel));
    if config.admin_id.is_none() {
        warn!("ADMIN_ID not set, operator commands are disabled");
    }

    let identity = match telegram.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username);
            me
        }
        Err(e) => {
            error!("Cannot reach Telegram with the configured token: {e}");
            std::process::exit(1);
        }
    };

    let completer = match CompletionClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.openai_model.clone(),
        config.openai_max_tokens,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build completion client: {e}");
            std::process::exit(1);
        }
    };

    let lifecycle = Lifecycle::new();
    let router = Arc::new(MessageRouter::new(
        telegram.clone(),
        completer,
        Publisher::new(telegram.clone(), config.channel.clone()),
        lifecycle.clone(),
        RouterSettings {
            bot_id: identity.id,
            bot_username: identity.username,
            admin_id: config.admin_id,
            mode: config.mode.clone(),
        },
    ));

    install_signal_handler(lifecycle);

    let source = transport::select_source(&config, telegram);

    if let Err(e) = transport::run(source, router, config.port, config.shutdown_grace).await {
        error!("HTTP server failed: {e}");
        std::process::exit(1);
    }
}

/// Stdout always; `askchannel.log` under `log_dir` and the operator chat when configured.
fn init_logging(
    config: &Config,
    telegram: Arc<dyn TelegramApi>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let stdout = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(filter());

    let log_file = config.log_dir.as_ref().and_then(|dir| {
        std::fs::create_dir_all(dir).ok();
        let path = dir.join("askchannel.log");
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Cannot open log file {}: {e}", path.display());
                None
            }
        }
    });

    let (file, guard) = match log_file {
        Some(log_file) => {
            let (writer, guard) = tracing_appender::non_blocking(log_file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let telegram_layer = config
        .log_chat_id
        .map(|chat_id| TelegramLogLayer::new(telegram, chat_id).with_filter(filter()));

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .with(telegram_layer)
        .init();

    guard
}
