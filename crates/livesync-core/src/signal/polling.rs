// ── Polling scheduler ──
//
// Fixed-cadence fallback. At most one timer per scheduler: `start`
// replaces the running one, `stop` is idempotent. Stopping also drops an
// action that is still running.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub struct PollingScheduler {
    timer: Mutex<Option<Timer>>,
}

#[derive(Debug)]
struct Timer {
    period: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Timer {
    fn halt(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` every `period`, first after one full period.
    /// Replaces any timer already running.
    pub fn start<F, Fut>(&self, period: Duration, action: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_task(period, cancel.clone(), action));
        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Timer {
                period,
                cancel,
                task,
            });
        if let Some(prev) = previous {
            prev.halt();
        }
        debug!(period_ms = period.as_millis(), "polling started");
    }

    pub fn stop(&self) {
        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(prev) = previous {
            prev.halt();
            debug!("polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The cadence of the running timer, if any.
    pub fn period(&self) -> Option<Duration> {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.period)
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_task<F, Fut>(period: Duration, cancel: CancellationToken, action: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                trace!("poll tick");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = action() => {}
                }
            }
        }
    }
}
