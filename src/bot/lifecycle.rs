//! Process lifecycle: Running → Draining → Stopped.
//!
//! A termination signal moves the process to Draining. New work is refused
//! from then on while in-flight handlers get a grace period to finish.
//! Draining never goes back to Running.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        }
    }
}

#[derive(Default)]
pub struct Lifecycle {
    draining: CancellationToken,
    stopped: CancellationToken,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Marks one unit of in-flight work. Dropping it ends the work.
pub struct InFlight {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.lifecycle.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.lifecycle.idle.notify_waiters();
        }
    }
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn phase(&self) -> Phase {
        if self.stopped.is_cancelled() {
            Phase::Stopped
        } else if self.draining.is_cancelled() {
            Phase::Draining
        } else {
            Phase::Running
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.is_cancelled()
    }

    /// Cancelled once draining starts.
    pub fn draining_token(&self) -> CancellationToken {
        self.draining.clone()
    }

    /// Cancelled once the process is done draining.
    pub fn stopped_token(&self) -> CancellationToken {
        self.stopped.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Start a unit of work, or `None` if the process is draining.
    pub fn enter(self: &Arc<Self>) -> Option<InFlight> {
        // Count first so a concurrent drain either sees us or we see it.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight {
            lifecycle: Arc::clone(self),
        };
        if self.is_draining() {
            drop(guard);
            return None;
        }
        Some(guard)
    }

    /// Returns `true` if this call made the transition.
    pub fn begin_draining(&self) -> bool {
        if self.draining.is_cancelled() {
            return false;
        }
        self.draining.cancel();
        info!("⏳ Draining: refusing new work ({} in flight)", self.in_flight());
        true
    }

    /// Wait for in-flight work to finish, at most `grace`. Returns `true` if
    /// everything finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let wait_idle = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(grace, wait_idle).await {
            Ok(()) => {
                info!("✅ All in-flight work finished");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.in_flight(),
                    "Grace period of {}s elapsed, stopping anyway",
                    grace.as_secs()
                );
                false
            }
        }
    }

    pub fn finish(&self) {
        self.draining.cancel();
        self.stopped.cancel();
        debug!("Lifecycle stopped");
    }
}

/// Start draining on SIGINT or SIGTERM.
pub fn install_signal_handler(lifecycle: Arc<Lifecycle>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("🛑 Received SIGINT"),
                        _ = sigterm.recv() => info!("🛑 Received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {e}");
                    let _ = ctrl_c.await;
                    info!("🛑 Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("🛑 Received Ctrl+C");
        }

        lifecycle.begin_draining();
    });
}
