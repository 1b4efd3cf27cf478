//! Session timeout supervisor
//!
//! Owns the one-shot expiry timer of an unauthenticated session. States:
//! Disarmed → Armed (on initiate) → Disarmed (on success, reset or fire).
//!
//! Each arm/disarm bumps an epoch. A timer task that already woke up but is
//! still waiting for the controller lock when a newer epoch starts will find
//! its epoch stale and do nothing, so a superseded timer never resets a
//! fresh session.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// One-shot expiry timer with cancel-and-replace semantics.
#[derive(Debug)]
pub struct TimeoutSupervisor {
    window: Duration,
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutSupervisor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            epoch: 0,
            handle: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Arm a fresh timer, cancelling any previous one first.
    ///
    /// `on_expire` runs once, `window` after this call, with the epoch it was
    /// armed under. It must confirm the epoch with [`fired`](Self::fired)
    /// before acting. Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, on_expire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disarm();
        let epoch = self.epoch;
        let window = self.window;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            on_expire(epoch).await;
        }));
        debug!(epoch, window_secs = window.as_secs(), "session timeout armed");
        epoch
    }

    /// Cancel the pending timer, if any, and invalidate its epoch.
    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(epoch = self.epoch, "session timeout disarmed");
        }
        self.epoch += 1;
    }

    /// Claim a fire event. Returns true exactly once for the current epoch;
    /// stale or repeated fires return false.
    ///
    /// The handle is released without aborting since it belongs to the task
    /// that is calling this.
    pub fn fired(&mut self, epoch: u64) -> bool {
        if self.handle.is_none() || epoch != self.epoch {
            return false;
        }
        self.handle = None;
        self.epoch += 1;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TimeoutSupervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
