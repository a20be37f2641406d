//! Tuning knobs for dispatch, progress settlement and polling.

use std::time::Duration;

/// Configuration for calls to the worker pool.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on a single submit/cancel/poll call
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl DispatchConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Configuration for the background status poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between polling sweeps
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

impl PollerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Configuration shared by the control surface and its collaborators.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub dispatch: DispatchConfig,
    pub poller: PollerConfig,
    /// How often a lost compare-and-swap is re-read and retried when
    /// finalizing a job
    pub max_conflict_retries: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            poller: PollerConfig::default(),
            max_conflict_retries: 3,
        }
    }
}

impl ControlConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poller.interval = interval;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }
}
