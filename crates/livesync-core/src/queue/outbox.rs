// ── Outbox: the write gateway ──
//
// Direct send first; connectivity-class failures land in the offline queue.
// A background driver drains the queue when the device comes back online
// and retries with capped exponential backoff while items remain.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{FlushReport, OfflineWriteQueue, QueueItem, WriteSender};
use crate::config::RetryPolicy;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{CoreError, ErrorKind};

/// What happened to a submitted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "id", rename_all = "snake_case")]
pub enum Submission {
    /// Acknowledged by the server.
    Sent,
    /// Parked in the offline queue under this id.
    Queued(Uuid),
}

pub struct Outbox<S> {
    queue: Arc<OfflineWriteQueue>,
    sender: Arc<S>,
    connectivity: ConnectivityMonitor,
    retry: RetryPolicy,
}

impl<S: WriteSender> Outbox<S> {
    pub fn new(
        queue: Arc<OfflineWriteQueue>,
        sender: Arc<S>,
        connectivity: ConnectivityMonitor,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            sender,
            connectivity,
            retry,
        }
    }

    pub fn queue(&self) -> &Arc<OfflineWriteQueue> {
        &self.queue
    }

    /// Send a write, queueing it if the network is unavailable.
    ///
    /// While the queue holds earlier writes, new ones are appended behind
    /// them rather than overtaking. Validation and credential failures are
    /// returned, never queued.
    pub async fn submit(
        &self,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Submission, CoreError> {
        let item = QueueItem::new(kind, payload);

        if !self.connectivity.is_online() || !self.queue.is_empty() {
            let id = self.queue.enqueue(item)?;
            return Ok(Submission::Queued(id));
        }

        match self.sender.send(&item).await {
            Ok(()) => Ok(Submission::Sent),
            Err(err) if err.is_transient() => {
                debug!(kind = %item.kind, error = %err, "direct write failed, queueing");
                let id = self.queue.enqueue(item)?;
                Ok(Submission::Queued(id))
            }
            Err(err) => Err(err),
        }
    }

    /// Manual sync: one flush pass now.
    pub async fn flush(&self) -> Result<FlushReport, CoreError> {
        self.queue.flush(&*self.sender).await
    }

    /// Spawn the background driver.
    ///
    /// Flushes on every offline → online transition, and when items are
    /// waiting while online. A transient halt schedules a retry after
    /// [`RetryPolicy::delay`]; a credential rejection waits for the next
    /// transition or a manual flush.
    pub fn spawn_driver(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(drive(Arc::clone(self), cancel))
    }
}

async fn drive<S: WriteSender>(outbox: Arc<Outbox<S>>, cancel: CancellationToken) {
    let mut online_rx = outbox.connectivity.subscribe();
    let mut len_rx = outbox.queue.subscribe();
    let mut attempt: u32 = 0;
    let mut auth_blocked = false;
    let mut retry_at = (outbox.connectivity.is_online() && !outbox.queue.is_empty())
        .then(Instant::now);

    loop {
        let deadline = retry_at.unwrap_or_else(Instant::now);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                if online {
                    attempt = 0;
                    auth_blocked = false;
                    if !outbox.queue.is_empty() {
                        info!(pending = outbox.queue.len(), "back online, flushing queue");
                        retry_at = Some(Instant::now());
                    }
                } else {
                    retry_at = None;
                }
                continue;
            }
            changed = len_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let len = *len_rx.borrow_and_update();
                if len == 0 {
                    retry_at = None;
                    attempt = 0;
                    auth_blocked = false;
                } else if retry_at.is_none() && !auth_blocked && outbox.connectivity.is_online() {
                    retry_at = Some(Instant::now() + outbox.retry.delay(attempt));
                }
                continue;
            }
            () = tokio::time::sleep_until(deadline), if retry_at.is_some() => {}
        }

        retry_at = None;
        if !outbox.connectivity.is_online() {
            continue;
        }

        let halted_kind = match outbox.flush().await {
            Ok(report) => {
                for item in &report.rejected {
                    warn!(id = %item.id, kind = %item.kind, error = ?item.last_error, "queued write dropped by server");
                }
                report.halted.map(|e| e.kind)
            }
            Err(err) => {
                warn!(error = %err, "queue flush failed");
                Some(err.kind())
            }
        };

        match halted_kind {
            None => attempt = 0,
            Some(ErrorKind::AuthRejected) => {
                warn!("credential rejected, queue paused until reconnect or manual sync");
                auth_blocked = true;
            }
            Some(_) => {
                attempt = attempt.saturating_add(1);
                let delay = outbox.retry.delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis(), "queue flush will retry");
                retry_at = Some(Instant::now() + delay);
            }
        }
    }
    debug!("outbox driver stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::queue::MemoryStore;
    use crate::queue::tests::{ScriptedSender, offline};

    fn outbox(sender: ScriptedSender, online: bool) -> Arc<Outbox<ScriptedSender>> {
        let queue = OfflineWriteQueue::open(Arc::new(MemoryStore::new()), "outbox").unwrap();
        Arc::new(Outbox::new(
            Arc::new(queue),
            Arc::new(sender),
            ConnectivityMonitor::new(online),
            RetryPolicy {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(8),
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn online_write_is_sent_directly() {
        let outbox = outbox(ScriptedSender::default(), true);
        let result = outbox.submit("crew/check-in", json!({ "crew": 1 })).await.unwrap();

        assert_eq!(result, Submission::Sent);
        assert!(outbox.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_queued() {
        let outbox = outbox(ScriptedSender::answering(vec![Err(offline())]), true);
        let result = outbox.submit("crew/check-in", json!(1)).await.unwrap();

        assert!(matches!(result, Submission::Queued(_)));
        assert_eq!(outbox.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failure_propagates_and_is_not_queued() {
        let outbox = outbox(
            ScriptedSender::answering(vec![Err(CoreError::ValidationRejected {
                message: "unknown crew".into(),
            })]),
            true,
        );
        let err = outbox.submit("crew/check-in", json!(1)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationRejected);
        assert!(outbox.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_drains_queue_in_order() {
        let outbox = outbox(ScriptedSender::default(), false);
        let cancel = CancellationToken::new();
        let driver = outbox.spawn_driver(cancel.clone());

        outbox.submit("receipts", json!(1)).await.unwrap();
        outbox.submit("receipts", json!(2)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(outbox.sender.sent().is_empty(), "sent while offline");

        outbox.connectivity.set_online();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(outbox.sender.sent(), vec![json!(1), json!(2)]);
        assert!(outbox.queue().is_empty());

        cancel.cancel();
        driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn server_outage_retries_with_backoff() {
        // Direct send fails, first retry fails, second retry succeeds.
        let outbox = outbox(
            ScriptedSender::answering(vec![Err(offline()), Err(offline())]),
            true,
        );
        let cancel = CancellationToken::new();
        let _driver = outbox.spawn_driver(cancel.clone());

        outbox.submit("invoices", json!("inv-7")).await.unwrap();
        assert_eq!(outbox.queue().len(), 1);

        // First retry after `initial` (1s) fails; next one 2s later.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(outbox.sender.sent().len(), 2);
        assert_eq!(outbox.queue().len(), 1);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(outbox.sender.sent().len(), 3);
        assert!(outbox.queue().is_empty());

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn later_writes_do_not_overtake_queued_ones() {
        let outbox = outbox(ScriptedSender::answering(vec![Err(offline())]), true);

        outbox.submit("receipts", json!("first")).await.unwrap();
        let second = outbox.submit("receipts", json!("second")).await.unwrap();
        assert!(matches!(second, Submission::Queued(_)));

        let report = outbox.flush().await.unwrap();
        assert_eq!(report.flushed, 2);
        assert_eq!(
            outbox.sender.sent(),
            vec![json!("first"), json!("first"), json!("second")]
        );
    }
}
