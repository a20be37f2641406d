//! Background status poller.
//!
//! Periodically polls the worker pool for every Running or Paused job, so
//! progress keeps flowing even when webhook deliveries are lost.
//!
//! ```ignore
//! let shutdown = CancellationToken::new();
//! let poller = StatusPoller::new(control.bridge().clone(), PollerConfig::default());
//! tokio::spawn(poller.run(shutdown.clone()));
//! ```

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bridge::StatusBridge;
use crate::config::PollerConfig;

pub struct StatusPoller {
    bridge: StatusBridge,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(bridge: StatusBridge, config: PollerConfig) -> Self {
        Self { bridge, config }
    }

    /// Poll until `shutdown` is cancelled. The first sweep runs immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval = ?self.config.interval, "status poller started");

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("status poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    async fn sweep(&self) {
        match self.bridge.poll_active().await {
            Ok(0) => {}
            Ok(polled) => debug!(polled, "polled active jobs"),
            Err(e) => error!(error = %e, "failed to list active jobs"),
        }
    }
}
