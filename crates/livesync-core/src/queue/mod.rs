//! Durable FIFO of writes waiting for connectivity.
//!
//! Items are appended only when a direct write fails for a connectivity
//! reason. [`OfflineWriteQueue::flush`] replays them strictly in order, one
//! at a time: item *i+1* is attempted only after item *i* resolves. The
//! whole queue is rewritten to the [`DurableStore`] on every change.

mod item;
mod outbox;
mod store;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use item::{ItemState, QueueItem};
pub use outbox::{Outbox, Submission};
pub use store::{DurableStore, FileStore, MemoryStore};

use crate::error::{CoreError, ErrorKind, SurfacedError};

/// Delivers one queued write to the server.
pub trait WriteSender: Send + Sync + 'static {
    fn send(&self, item: &QueueItem) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    /// Items acknowledged and removed.
    pub flushed: usize,
    /// Items in the queue when the pass started.
    pub total: usize,
    /// Items the server refused. Removed from the queue, flagged with the
    /// error so the caller can report them.
    pub rejected: Vec<QueueItem>,
    /// Set when the pass stopped early; the head item stays queued.
    pub halted: Option<SurfacedError>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

pub struct OfflineWriteQueue {
    store: Arc<dyn DurableStore>,
    key: String,
    items: Mutex<VecDeque<QueueItem>>,
    flush_lock: tokio::sync::Mutex<()>,
    len_tx: watch::Sender<usize>,
}

impl OfflineWriteQueue {
    /// Load the queue persisted under `key`.
    ///
    /// Items caught mid-flush by a crash (`Syncing`) or left `Failed` are
    /// restored as `Pending`.
    pub fn open(store: Arc<dyn DurableStore>, key: impl Into<String>) -> Result<Self, CoreError> {
        let key = key.into();
        let mut items: VecDeque<QueueItem> = match store.load(&key)? {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)?,
            _ => VecDeque::new(),
        };

        let before = items.len();
        items.retain(|i| i.state != ItemState::Synced);
        let mut repaired = before != items.len();
        for item in &mut items {
            if matches!(item.state, ItemState::Syncing | ItemState::Failed) {
                item.state = ItemState::Pending;
                repaired = true;
            }
        }

        let (len_tx, _rx) = watch::channel(items.len());
        let queue = Self {
            store,
            key,
            items: Mutex::new(items),
            flush_lock: tokio::sync::Mutex::new(()),
            len_tx,
        };
        if repaired {
            queue.persist()?;
        }
        info!(key = %queue.key, pending = queue.len(), "offline queue loaded");
        Ok(queue)
    }

    /// Append `item` at the tail and persist.
    pub fn enqueue(&self, mut item: QueueItem) -> Result<Uuid, CoreError> {
        item.state = ItemState::Pending;
        let id = item.id;
        self.lock().push_back(item);
        if let Err(e) = self.persist() {
            self.lock().retain(|i| i.id != id);
            return Err(e);
        }
        debug!(%id, pending = self.len(), "write queued");
        Ok(id)
    }

    /// All items in flush order.
    pub fn peek_all(&self) -> Vec<QueueItem> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Notified with the new length after every change.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.len_tx.subscribe()
    }

    /// Drop every pending item. Returns how many were discarded.
    pub fn clear(&self) -> Result<usize, CoreError> {
        let dropped = std::mem::take(&mut *self.lock());
        self.persist()?;
        if !dropped.is_empty() {
            warn!(discarded = dropped.len(), "offline queue cleared");
        }
        Ok(dropped.len())
    }

    /// Replay queued writes in order through `sender`.
    ///
    /// - success: the item is removed
    /// - connectivity or credential failure: the item goes back to
    ///   `Pending` and the pass stops, preserving order for the next one
    /// - any other failure: the item is removed and reported in
    ///   [`FlushReport::rejected`]
    ///
    /// Concurrent calls are serialized.
    pub async fn flush<S: WriteSender>(&self, sender: &S) -> Result<FlushReport, CoreError> {
        let _pass = self.flush_lock.lock().await;
        let total = self.len();
        let mut report = FlushReport {
            total,
            ..FlushReport::default()
        };
        if total == 0 {
            return Ok(report);
        }
        debug!(total, "flushing offline queue");

        for _ in 0..total {
            let Some(item) = self.begin_attempt() else {
                break;
            };
            self.persist()?;

            match sender.send(&item).await {
                Ok(()) => {
                    self.lock().retain(|i| i.id != item.id);
                    self.persist()?;
                    report.flushed += 1;
                    debug!(id = %item.id, kind = %item.kind, "queued write synced");
                }
                Err(err) if err.is_transient() || err.kind() == ErrorKind::AuthRejected => {
                    self.update(item.id, |i| {
                        i.state = ItemState::Failed;
                        i.last_error = Some(err.to_string());
                    });
                    // Failed is transient: the item is retried next pass.
                    self.update(item.id, |i| i.state = ItemState::Pending);
                    self.persist()?;
                    debug!(id = %item.id, error = %err, "flush halted");
                    report.halted = Some(SurfacedError::from(&err));
                    break;
                }
                Err(err) => {
                    self.lock().retain(|i| i.id != item.id);
                    self.persist()?;
                    warn!(id = %item.id, kind = %item.kind, error = %err, "queued write rejected, dropping");
                    let mut rejected = item;
                    rejected.state = ItemState::Failed;
                    rejected.last_error = Some(err.to_string());
                    report.rejected.push(rejected);
                }
            }
        }

        info!(
            flushed = report.flushed,
            total = report.total,
            rejected = report.rejected.len(),
            remaining = self.len(),
            "flush finished"
        );
        Ok(report)
    }

    /// Mark the head `Syncing`, bump its attempt count, return a copy.
    fn begin_attempt(&self) -> Option<QueueItem> {
        let mut items = self.lock();
        let head = items.front_mut()?;
        head.state = ItemState::Syncing;
        head.attempts += 1;
        Some(head.clone())
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut QueueItem)) {
        if let Some(item) = self.lock().iter_mut().find(|i| i.id == id) {
            f(item);
        }
    }

    fn persist(&self) -> Result<(), CoreError> {
        let (raw, len) = {
            let items = self.lock();
            (serde_json::to_string_pretty(&*items)?, items.len())
        };
        self.store.save(&self.key, &raw)?;
        self.len_tx.send_replace(len);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for OfflineWriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineWriteQueue")
            .field("key", &self.key)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    /// Records what it was asked to send; answers from a script, then `Ok`.
    #[derive(Default)]
    pub(crate) struct ScriptedSender {
        pub(crate) sent: Mutex<Vec<serde_json::Value>>,
        script: Mutex<VecDeque<Result<(), CoreError>>>,
    }

    impl ScriptedSender {
        pub(crate) fn answering(script: Vec<Result<(), CoreError>>) -> Self {
            Self {
                sent: Mutex::default(),
                script: Mutex::new(script.into()),
            }
        }

        pub(crate) fn sent(&self) -> Vec<serde_json::Value> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl WriteSender for ScriptedSender {
        fn send(&self, item: &QueueItem) -> impl Future<Output = Result<(), CoreError>> + Send {
            self.sent.lock().unwrap().push(item.payload.clone());
            let answer = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            std::future::ready(answer)
        }
    }

    pub(crate) fn offline() -> CoreError {
        CoreError::NetworkTransient {
            message: "offline".into(),
        }
    }

    fn memory_queue() -> OfflineWriteQueue {
        OfflineWriteQueue::open(Arc::new(MemoryStore::new()), "outbox").unwrap()
    }

    #[tokio::test]
    async fn fifo_and_durable_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn DurableStore> = Arc::new(FileStore::open(dir.path()).unwrap());

        {
            let queue = OfflineWriteQueue::open(Arc::clone(&store), "outbox").unwrap();
            queue.enqueue(QueueItem::new("crew/check-in", json!(1))).unwrap();
            queue.enqueue(QueueItem::new("crew/check-in", json!(2))).unwrap();
        }

        // "Restart": a fresh queue over the same directory.
        let store: Arc<dyn DurableStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let queue = OfflineWriteQueue::open(store, "outbox").unwrap();
        assert_eq!(queue.len(), 2);

        let sender = ScriptedSender::default();
        let report = queue.flush(&sender).await.unwrap();

        assert_eq!(sender.sent(), vec![json!(1), json!(2)]);
        assert_eq!((report.flushed, report.total), (2, 2));
        assert!(report.is_complete());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn transient_failure_halts_and_keeps_order() {
        let queue = memory_queue();
        let first = queue.enqueue(QueueItem::new("receipts", json!("a"))).unwrap();
        queue.enqueue(QueueItem::new("receipts", json!("b"))).unwrap();

        let sender = ScriptedSender::answering(vec![Err(offline())]);
        let report = queue.flush(&sender).await.unwrap();

        assert_eq!(sender.sent(), vec![json!("a")], "b must wait for a");
        assert_eq!(report.flushed, 0);
        assert_eq!(report.halted.unwrap().kind, ErrorKind::NetworkTransient);

        let items = queue.peek_all();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, first);
        assert_eq!(items[0].state, ItemState::Pending);
        assert_eq!(items[0].attempts, 1);
        assert!(items[0].last_error.as_deref().unwrap().contains("offline"));

        // Next pass succeeds in order.
        let sender = ScriptedSender::default();
        let report = queue.flush(&sender).await.unwrap();
        assert_eq!(sender.sent(), vec![json!("a"), json!("b")]);
        assert_eq!(report.flushed, 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn validation_rejection_drops_item_and_continues() {
        let queue = memory_queue();
        queue.enqueue(QueueItem::new("invoices", json!("bad"))).unwrap();
        queue.enqueue(QueueItem::new("invoices", json!("good"))).unwrap();

        let sender = ScriptedSender::answering(vec![Err(CoreError::ValidationRejected {
            message: "line item total mismatch".into(),
        })]);
        let report = queue.flush(&sender).await.unwrap();

        assert_eq!(report.flushed, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].payload, json!("bad"));
        assert_eq!(report.rejected[0].state, ItemState::Failed);
        assert!(report.rejected[0].last_error.is_some());
        assert!(report.is_complete());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn auth_rejection_halts_without_dropping() {
        let queue = memory_queue();
        queue.enqueue(QueueItem::new("equipment", json!("x"))).unwrap();

        let sender = ScriptedSender::answering(vec![Err(CoreError::AuthRejected {
            message: "expired".into(),
        })]);
        let report = queue.flush(&sender).await.unwrap();

        assert_eq!(report.halted.unwrap().kind, ErrorKind::AuthRejected);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn interrupted_items_restore_as_pending() {
        let store = Arc::new(MemoryStore::new());
        let mut syncing = QueueItem::new("receipts", json!(1));
        syncing.state = ItemState::Syncing;
        syncing.attempts = 3;
        let mut synced = QueueItem::new("receipts", json!(2));
        synced.state = ItemState::Synced;
        store
            .save("outbox", &serde_json::to_string(&vec![syncing, synced]).unwrap())
            .unwrap();

        let queue = OfflineWriteQueue::open(store.clone(), "outbox").unwrap();
        let items = queue.peek_all();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].state, ItemState::Pending);
        assert_eq!(items[0].attempts, 3);

        let persisted: Vec<QueueItem> =
            serde_json::from_str(&store.load("outbox").unwrap().unwrap()).unwrap();
        assert_eq!(persisted[0].state, ItemState::Pending);
    }

    #[tokio::test]
    async fn clear_discards_and_notifies() {
        let queue = memory_queue();
        let mut rx = queue.subscribe();
        queue.enqueue(QueueItem::new("receipts", json!(1))).unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        assert_eq!(queue.clear().unwrap(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 0);
        assert!(queue.is_empty());
    }
}
