//! Per-connection retransmission timer.
//!
//! [`RetransmitTimer`] is a single alarm backed by one `tokio::time::Sleep`.
//! It is owned by the sender task, so arming, restarting and cancelling are
//! serialised with ack and timeout processing by construction.
//!
//! The timeout starts at the configured base value and, when back-off is
//! enabled, doubles on each consecutive expiry up to the configured maximum.
//! Progress (an ack that advances the window) restores the base value.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep_until, Instant, Sleep};

use crate::config::GbnConfig;

/// A cancellable, restartable alarm.
#[derive(Debug)]
pub struct RetransmitTimer {
    base_rto: Duration,
    max_rto: Duration,
    backoff: bool,
    /// Timeout used the next time the timer is armed.
    current_rto: Duration,
    /// Created on first arm so the timer can be built outside a runtime.
    sleep: Option<Pin<Box<Sleep>>>,
    armed: bool,
}

impl RetransmitTimer {
    pub fn new(config: &GbnConfig) -> Self {
        Self {
            base_rto: config.retransmit_timeout,
            max_rto: config.max_retransmit_timeout,
            backoff: config.backoff,
            current_rto: config.retransmit_timeout,
            sleep: None,
            armed: false,
        }
    }

    /// Start (or restart) the countdown from now using the current timeout.
    pub fn arm(&mut self) {
        let deadline = Instant::now() + self.current_rto;
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
        self.armed = true;
    }

    /// Disarm the timer.  A pending [`expired`](Self::expired) never completes.
    pub fn cancel(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn current_rto(&self) -> Duration {
        self.current_rto
    }

    /// Double the timeout after an expiry, capped at the configured maximum.
    pub fn back_off(&mut self) {
        if self.backoff {
            self.current_rto = (self.current_rto * 2).min(self.max_rto);
        }
    }

    /// Restore the base timeout after forward progress.
    pub fn reset_backoff(&mut self) {
        self.current_rto = self.base_rto;
    }

    /// Resolve when the armed deadline passes; pend forever while disarmed.
    ///
    /// Cancel-safe: dropping the future leaves the timer untouched, so it can
    /// sit in a `tokio::select!` next to other branches.
    pub async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) if self.armed => sleep.as_mut().await,
            _ => pending::<()>().await,
        }
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GbnConfig {
        GbnConfig::default()
            .with_retransmit_timeout(Duration::from_millis(100))
            .with_max_retransmit_timeout(Duration::from_millis(350))
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout() {
        let mut timer = RetransmitTimer::new(&config());
        let start = Instant::now();
        timer.arm();
        timer.expired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_pushes_deadline_out() {
        let mut timer = RetransmitTimer::new(&config());
        let start = Instant::now();
        timer.arm();
        tokio::time::sleep(Duration::from_millis(60)).await;
        timer.arm();
        timer.expired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(160));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let mut timer = RetransmitTimer::new(&config());
        timer.arm();
        timer.cancel();
        let fired = tokio::time::timeout(Duration::from_secs(5), timer.expired()).await;
        assert!(fired.is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut timer = RetransmitTimer::new(&config());
        timer.back_off();
        assert_eq!(timer.current_rto(), Duration::from_millis(200));
        timer.back_off();
        assert_eq!(timer.current_rto(), Duration::from_millis(350));
        timer.reset_backoff();
        assert_eq!(timer.current_rto(), Duration::from_millis(100));
    }

    #[test]
    fn backoff_disabled_keeps_base() {
        let mut timer = RetransmitTimer::new(&config().with_backoff(false));
        timer.back_off();
        assert_eq!(timer.current_rto(), Duration::from_millis(100));
    }
}
