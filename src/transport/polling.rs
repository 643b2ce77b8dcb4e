//! Long-polling delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bot::{MessageRouter, TelegramApi};
use crate::transport::UpdateSource;

/// Long-poll wait. Must stay below the HTTP client's request timeout.
pub const POLL_TIMEOUT_SECS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct PollingSource {
    telegram: Arc<dyn TelegramApi>,
    retry_delay: Duration,
}

impl PollingSource {
    pub fn new(telegram: Arc<dyn TelegramApi>) -> Self {
        Self {
            telegram,
            retry_delay: RETRY_DELAY,
        }
    }
}

#[async_trait]
impl UpdateSource for PollingSource {
    fn name(&self) -> &'static str {
        "polling"
    }

    async fn run(&self, router: Arc<MessageRouter>) {
        // getUpdates is rejected while a webhook is registered.
        if let Err(e) = self.telegram.delete_webhook().await {
            warn!("Could not clear webhook before polling: {e}");
        }

        let draining = router.lifecycle().draining_token();
        let mut offset: Option<i32> = None;

        loop {
            let batch = tokio::select! {
                _ = draining.cancelled() => break,
                batch = self.telegram.fetch_updates(offset, POLL_TIMEOUT_SECS) => batch,
            };

            match batch {
                Ok(updates) => {
                    if !updates.is_empty() {
                        debug!("Fetched {} updates", updates.len());
                    }
                    for update in updates {
                        match next_offset(update.id.0) {
                            Some(next) => offset = Some(next),
                            None => warn!("Update id {} is outside the getUpdates offset range", update.id.0),
                        }
                        let router = router.clone();
                        tokio::spawn(async move { router.handle_update(update).await });
                    }
                }
                Err(e) => {
                    warn!("{e}, retrying in {}s", self.retry_delay.as_secs());
                    tokio::select! {
                        _ = draining.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!("Polling stopped");
    }

    async fn shutdown(&self) {}
}

/// Offset that acknowledges `update_id`, or `None` if it does not fit in an `i32`.
fn next_offset(update_id: u32) -> Option<i32> {
    i32::try_from(update_id).ok()?.checked_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Lifecycle;
    use crate::bot::mock::{MockCompleter, MockTelegram, test_router};
    use crate::config::DeployMode;
    use teloxide::types::Update;

    fn update(id: u32, text: &str) -> Update {
        serde_json::from_str(&serde_json::json!({
            "update_id": id,
            "message": {
                "message_id": id,
                "date": 1700000000,
                "chat": {"id": 555, "type": "private", "first_name": "Ann"},
                "from": {"id": 555, "is_bot": false, "first_name": "Ann"},
                "text": text
            }
        }).to_string())
        .unwrap()
    }

    #[test]
    fn test_next_offset() {
        assert_eq!(next_offset(0), Some(1));
        assert_eq!(next_offset(7), Some(8));
        assert_eq!(next_offset(i32::MAX as u32 - 1), Some(i32::MAX));
        assert_eq!(next_offset(i32::MAX as u32), None);
        assert_eq!(next_offset(u32::MAX), None);
    }

    #[tokio::test]
    async fn test_polls_dispatches_and_stops_on_drain() {
        let telegram = Arc::new(MockTelegram::new());
        telegram.set_registered_webhook(Some("https://old.example.com/hook"));
        telegram.queue_updates(vec![update(7, "/test"), update(8, "/start")]);
        telegram.queue_updates(vec![update(9, "/test")]);

        let lifecycle = Lifecycle::new();
        let router = Arc::new(test_router(
            telegram.clone(),
            Arc::new(MockCompleter::unreachable()),
            lifecycle.clone(),
            DeployMode::Polling,
        ));
        let source = PollingSource::new(telegram.clone());

        let running = tokio::spawn(async move { source.run(router).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        lifecycle.begin_draining();
        running.await.unwrap();

        assert_eq!(telegram.webhook_calls(), vec!["delete".to_string()]);

        let offsets = telegram.offsets();
        assert_eq!(&offsets[..3], &[None, Some(9), Some(10)]);

        let replies = telegram.sent_to(555);
        assert_eq!(replies.len(), 3);
        assert_eq!(
            replies
                .iter()
                .filter(|m| m.text == crate::bot::router::TEST_ACK)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_drain_interrupts_idle_poll() {
        let telegram = Arc::new(MockTelegram::new());
        let lifecycle = Lifecycle::new();
        lifecycle.begin_draining();
        let router = Arc::new(test_router(
            telegram.clone(),
            Arc::new(MockCompleter::unreachable()),
            lifecycle,
            DeployMode::Polling,
        ));

        let source = PollingSource::new(telegram.clone());
        tokio::time::timeout(Duration::from_secs(1), source.run(router))
            .await
            .unwrap();

        assert!(telegram.sent().is_empty());
    }
}
