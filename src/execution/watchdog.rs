//! Timeout watchdog.
//!
//! A [`Watchdog`] is a deferred, cancellable callback: a tokio task that
//! sleeps for the deadline and then trips the handle's [`KillSwitch`].
//! It holds only a weak reference to the switch, so it never keeps a
//! handle alive, and it is aborted when dropped.

use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// How long pipes are still read after a kill before they are abandoned.
///
/// A killed child's descendants may keep its pipes open indefinitely.
pub const KILL_GRACE: Duration = Duration::from_millis(100);

/// Why a live child is being killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// The watchdog deadline expired.
    Timeout,
    /// The owner asked for the child to be killed.
    Requested,
}

/// One-shot kill request shared between a handle, its watchdog and the
/// task driving the child.
#[derive(Debug, Default)]
pub struct KillSwitch {
    reason: OnceLock<KillReason>,
    notify: Notify,
}

impl KillSwitch {
    /// Create an untripped switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a kill. Only the first reason is kept.
    ///
    /// Returns `true` if this call tripped the switch.
    pub fn trip(&self, reason: KillReason) -> bool {
        if self.reason.set(reason).is_ok() {
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// The reason the switch was tripped, if it was.
    pub fn reason(&self) -> Option<KillReason> {
        self.reason.get().copied()
    }

    /// Wait until the switch is tripped.
    pub async fn tripped(&self) -> KillReason {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking, so a concurrent trip is not missed
            notified.as_mut().enable();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }

    /// Resolve [`KILL_GRACE`] after the switch trips.
    pub async fn grace_expired(&self) {
        self.tripped().await;
        tokio::time::sleep(KILL_GRACE).await;
    }
}

/// Armed timeout timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct Watchdog {
    task: Option<JoinHandle<()>>,
    armed_at: Instant,
    timeout: Duration,
}

impl Watchdog {
    /// Arm a timer that trips `switch` with [`KillReason::Timeout`] after `timeout`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(timeout: Duration, switch: &Arc<KillSwitch>) -> Self {
        let target: Weak<KillSwitch> = Arc::downgrade(switch);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            match target.upgrade() {
                Some(switch) => {
                    if switch.trip(KillReason::Timeout) {
                        debug!(?timeout, "watchdog fired");
                    }
                }
                None => trace!("watchdog fired after handle was dropped"),
            }
        });

        trace!(?timeout, "watchdog armed");
        Self {
            task: Some(task),
            armed_at: Instant::now(),
            timeout,
        }
    }

    /// Time elapsed since the watchdog was armed.
    pub fn elapsed(&self) -> Duration {
        self.armed_at.elapsed()
    }

    /// The configured deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the timer is still pending.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the timer. Idempotent.
    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            trace!(elapsed = ?self.elapsed(), "watchdog disarmed");
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
