//! Webhook delivery: HTTP endpoints plus registration upkeep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::get,
};
use teloxide::types::Update;
use tracing::{debug, error, info, warn};

use crate::bot::{MessageRouter, TelegramApi};
use crate::transport::UpdateSource;

/// How often the registered webhook URL is checked against the expected one.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub struct HttpState {
    pub router: Arc<MessageRouter>,
    pub dispatch_timeout: Duration,
}

/// `/` and `/health` always; the webhook route only when `webhook_path` is set.
pub fn http_router(state: Arc<HttpState>, webhook_path: Option<String>) -> Router {
    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health));

    if let Some(path) = webhook_path {
        app = app.route(&path, get(webhook_alive).post(receive_update));
    }

    app.with_state(state)
}

async fn root() -> &'static str {
    "askchannel bot is running"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn webhook_alive() -> &'static str {
    "Webhook is alive. Telegram delivers updates with POST."
}

async fn receive_update(State(state): State<Arc<HttpState>>, body: Bytes) -> StatusCode {
    if state.router.lifecycle().is_draining() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    if is_keepalive(&body) {
        debug!("Empty webhook body, nothing to dispatch");
        return StatusCode::OK;
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            error!("Failed to parse webhook update: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    match tokio::time::timeout(state.dispatch_timeout, state.router.handle_update(update)).await {
        Ok(()) => StatusCode::OK,
        Err(_) => {
            error!(
                "Webhook update not handled within {}s",
                state.dispatch_timeout.as_secs()
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Empty body or `{}`.
fn is_keepalive(body: &[u8]) -> bool {
    let body = body.trim_ascii();
    body.is_empty()
        || serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(body)
            .is_ok_and(|map| map.is_empty())
}

/// Re-register the webhook if Telegram reports a different URL.
/// Returns `true` when a re-registration happened.
pub async fn ensure_webhook(telegram: &dyn TelegramApi, expected: &str) -> Result<bool, String> {
    let current = telegram.webhook_info().await?.url;
    if current.as_deref() == Some(expected) {
        debug!("Webhook registration is current");
        return Ok(false);
    }

    warn!("Webhook registration drifted (registered: {}), re-registering", current.is_some());
    telegram.set_webhook(expected).await?;
    Ok(true)
}

pub struct WebhookSource {
    telegram: Arc<dyn TelegramApi>,
    endpoint: String,
    path: String,
    reconcile_every: Duration,
}

impl WebhookSource {
    pub fn new(telegram: Arc<dyn TelegramApi>, endpoint: String, path: String) -> Self {
        Self {
            telegram,
            endpoint,
            path,
            reconcile_every: RECONCILE_INTERVAL,
        }
    }

    pub fn with_reconcile_interval(mut self, every: Duration) -> Self {
        self.reconcile_every = every;
        self
    }
}

#[async_trait]
impl UpdateSource for WebhookSource {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn webhook_path(&self) -> Option<String> {
        Some(self.path.clone())
    }

    async fn run(&self, router: Arc<MessageRouter>) {
        match self.telegram.set_webhook(&self.endpoint).await {
            Ok(()) => info!("✅ Webhook registered"),
            Err(e) => error!("Webhook registration failed, will retry on next check: {e}"),
        }

        let draining = router.lifecycle().draining_token();
        let mut interval = tokio::time::interval(self.reconcile_every);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = draining.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = ensure_webhook(self.telegram.as_ref(), &self.endpoint).await {
                        warn!("Webhook check failed: {e}");
                    }
                }
            }
        }
    }

    async fn shutdown(&self) {
        if self.telegram.delete_webhook().await.is_ok() {
            info!("Webhook deregistered");
        }
    }
}
