// ── Safety watchdog ──
//
// Bounds how long a loading state may persist. Firing does not cancel the
// underlying request; it only forces the owner out of "loading".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::CoreError;

#[derive(Debug, Default)]
pub struct SafetyWatchdog {
    armed: Mutex<Option<CancellationToken>>,
    fired: Arc<AtomicBool>,
}

impl SafetyWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `on_timeout` once `timeout` elapses unless disarmed first.
    /// Re-arming replaces the previous deadline.
    pub fn arm<F>(&self, timeout: Duration, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let previous = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cancel.clone());
        if let Some(prev) = previous {
            prev.cancel();
        }
        self.fired.store(false, Ordering::Release);

        let fired = Arc::clone(&self.fired);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let err = CoreError::WatchdogTimeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    };
                    warn!(error = %err, "forcing loading state to complete");
                    fired.store(true, Ordering::Release);
                    on_timeout();
                }
            }
        });
    }

    /// Cancel the pending deadline. No-op when not armed.
    pub fn disarm(&self) {
        if let Some(token) = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    /// Whether the most recent arm ran to its deadline.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Drop for SafetyWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
