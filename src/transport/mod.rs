//! Update delivery. One source runs per process, chosen from config at startup.

pub mod polling;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::bot::{MessageRouter, TelegramApi};
use crate::config::{Config, DeployMode};

pub use polling::PollingSource;
pub use webhook::{HttpState, WebhookSource};

/// Budget for handling one webhook update end to end.
pub const WEBHOOK_DISPATCH_TIMEOUT: Duration = Duration::from_secs(25);

/// How updates reach the router: pushed by Telegram or pulled by us.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Route the HTTP server must expose for this source, if any.
    fn webhook_path(&self) -> Option<String> {
        None
    }

    /// Deliver updates until the lifecycle starts draining.
    async fn run(&self, router: Arc<MessageRouter>);

    /// Undo any registration with Telegram. Called after draining.
    async fn shutdown(&self);
}

pub fn select_source(config: &Config, telegram: Arc<dyn TelegramApi>) -> Box<dyn UpdateSource> {
    match &config.mode {
        DeployMode::Webhook { base_url } => {
            let path = config.webhook_path();
            Box::new(WebhookSource::new(telegram, format!("{base_url}{path}"), path))
        }
        DeployMode::Polling => Box::new(PollingSource::new(telegram)),
    }
}

/// Serve HTTP, run the update source, then drain and tear down once a
/// termination signal arrives.
pub async fn run(
    source: Box<dyn UpdateSource>,
    router: Arc<MessageRouter>,
    port: u16,
    grace: Duration,
) -> std::io::Result<()> {
    let lifecycle = router.lifecycle().clone();

    let state = Arc::new(HttpState {
        router: router.clone(),
        dispatch_timeout: WEBHOOK_DISPATCH_TIMEOUT,
    });
    let app = webhook::http_router(state, source.webhook_path());
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("🌐 HTTP server listening on port {port}");

    let stopped = lifecycle.stopped_token();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(stopped.cancelled_owned())
            .await
    });

    info!("📡 Receiving updates via {}", source.name());
    source.run(router).await;

    lifecycle.drain(grace).await;
    source.shutdown().await;
    lifecycle.finish();

    match server.await {
        Ok(result) => result?,
        Err(e) => error!("HTTP server task failed: {e}"),
    }
    info!("👋 Stopped");
    Ok(())
}
