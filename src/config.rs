//! Tunable protocol parameters.
//!
//! One [`GbnConfig`] is handed to each side of a connection.  Defaults match
//! a small-window file transfer over a LAN: four frames in flight, 64-byte
//! payloads.

use std::time::Duration;

use crate::error::ConfigError;

/// Largest window the 8-bit wire sequence space supports unambiguously
/// (the space must hold at least `2 × W` values).
pub const MAX_WINDOW: usize = 128;

/// Hard upper bound on a single frame's payload.
pub const MAX_PAYLOAD_LIMIT: usize = 1024;

/// Parameters shared by the sender and receiver sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GbnConfig {
    /// Go-Back-N window size `W`.
    pub window_size: usize,
    /// Largest payload a single frame may carry.
    pub max_payload: usize,
    /// Base retransmission timeout.
    pub retransmit_timeout: Duration,
    /// Upper bound for the timeout after back-off.
    pub max_retransmit_timeout: Duration,
    /// Double the timeout after each consecutive expiry.
    pub backoff: bool,
    /// Consecutive timeouts tolerated before the transfer is aborted.
    pub max_retries: u32,
    /// Longest the receiver waits for any frame before giving up.
    pub idle_timeout: Duration,
    /// How long the receiver keeps re-acking after end of stream.
    ///
    /// Defaults to [`retry_window`](Self::retry_window) so the receiver
    /// outlives every retransmission of the end-of-stream marker.
    pub linger: Duration,
}

impl Default for GbnConfig {
    fn default() -> Self {
        Self {
            window_size: 4,
            max_payload: 64,
            retransmit_timeout: Duration::from_millis(200),
            max_retransmit_timeout: Duration::from_secs(2),
            backoff: true,
            max_retries: 8,
            idle_timeout: Duration::from_secs(10),
            linger: Duration::ZERO,
        }
        .with_linger_from_retries()
    }
}

impl GbnConfig {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Sets the base timeout, raising the ceiling if needed.  Recomputes
    /// `linger`.
    pub fn with_retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.retransmit_timeout = timeout;
        self.max_retransmit_timeout = self.max_retransmit_timeout.max(timeout);
        self.with_linger_from_retries()
    }

    /// Recomputes `linger`.
    pub fn with_max_retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.max_retransmit_timeout = timeout;
        self.with_linger_from_retries()
    }

    /// Recomputes `linger`.
    pub fn with_backoff(mut self, backoff: bool) -> Self {
        self.backoff = backoff;
        self.with_linger_from_retries()
    }

    /// Recomputes `linger`.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.with_linger_from_retries()
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Override the derived linger.  Call after the timeout setters.
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    fn with_linger_from_retries(mut self) -> Self {
        self.linger = self.retry_window();
        self
    }

    /// Longest a sender keeps retransmitting without progress before it
    /// aborts: every backed-off timeout up to and including the one that
    /// exceeds `max_retries`.
    pub fn retry_window(&self) -> Duration {
        let mut rto = self.retransmit_timeout;
        let mut total = Duration::ZERO;
        for attempt in 0..=self.max_retries {
            total = total.saturating_add(rto);
            let next = if self.backoff {
                rto.saturating_mul(2).min(self.max_retransmit_timeout)
            } else {
                rto
            };
            if next == rto {
                // Flat from here on.
                let remaining = self.max_retries - attempt;
                return total.saturating_add(rto.saturating_mul(remaining));
            }
            rto = next;
        }
        total
    }

    /// Reject parameter combinations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW {
            return Err(ConfigError::WindowSize(self.window_size));
        }
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD_LIMIT {
            return Err(ConfigError::MaxPayload(self.max_payload));
        }
        if self.retransmit_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("retransmit_timeout"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("idle_timeout"));
        }
        if self.max_retransmit_timeout < self.retransmit_timeout {
            return Err(ConfigError::TimeoutOrder);
        }
        Ok(())
    }
}
