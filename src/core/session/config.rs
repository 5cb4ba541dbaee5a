//! Session tuning options.

use std::time::Duration;

/// Default keepalive period.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// How long `close()` waits for the I/O task to flush the close frame.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for an [`AvatarSession`](super::AvatarSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Application id stamped on keepalive envelopes.
    pub app_id: String,
    /// Period between keepalive pings.
    pub keepalive_interval: Duration,
    /// Upper bound on waiting for the I/O task during `close()`.
    pub close_timeout: Duration,
}

impl SessionOptions {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}
