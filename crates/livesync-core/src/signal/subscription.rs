// ── Change subscriptions ──
//
// A subscription turns a push channel into payload-free `on_change` calls.
// Errors go to `on_error` so the owner can fall back to polling; a closed
// feed is always reported, never swallowed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::ResourceKey;

const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// A signal delivered by a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSignal {
    /// Something changed; re-pull to find out what.
    Changed,
    /// The channel hit an error. Changes may have been missed.
    Failed(String),
}

/// Source of change notifications for resource paths.
///
/// `open` returns a receiver that yields signals for `path` until the
/// channel closes it or `cancel` fires.
pub trait PushChannel: Send + Sync + 'static {
    fn open(
        &self,
        path: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<PushSignal>, CoreError>;
}

// ── In-process channel ───────────────────────────────────────────────

/// A push channel driven by explicit calls. Used for embedding and tests.
#[derive(Default)]
pub struct BroadcastPushChannel {
    senders: DashMap<String, Vec<mpsc::Sender<PushSignal>>>,
}

impl BroadcastPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal a change on `path` to every open receiver.
    pub fn notify(&self, path: &str) {
        self.deliver(path, &PushSignal::Changed);
    }

    /// Report an error to every receiver of `path` without closing them.
    pub fn fail(&self, path: &str, reason: impl Into<String>) {
        self.deliver(path, &PushSignal::Failed(reason.into()));
    }

    /// Close every receiver of `path`.
    pub fn close(&self, path: &str) {
        self.senders.remove(normalize(path));
    }

    /// Number of receivers still listening on `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.senders
            .get(normalize(path))
            .map_or(0, |s| s.iter().filter(|tx| !tx.is_closed()).count())
    }

    fn deliver(&self, path: &str, signal: &PushSignal) {
        if let Some(mut senders) = self.senders.get_mut(normalize(path)) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                // A full buffer already holds a pending change; dropping
                // another payload-free signal loses nothing.
                let _ = tx.try_send(signal.clone());
            }
        }
    }
}

impl PushChannel for BroadcastPushChannel {
    fn open(
        &self,
        path: &str,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<PushSignal>, CoreError> {
        let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        self.senders
            .entry(normalize(path).to_owned())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

// ── Subscription ─────────────────────────────────────────────────────

/// Entry point for subscribing a resource to a push channel.
pub struct ChangeSubscription;

impl ChangeSubscription {
    /// Start delivering change signals for `path` to `on_change`.
    ///
    /// `on_error` receives [`CoreError::SubscriptionDropped`] whenever the
    /// channel reports a failure or closes. The handle stops delivery when
    /// closed or dropped.
    pub fn subscribe<C, E>(
        channel: &dyn PushChannel,
        resource_key: ResourceKey,
        path: &str,
        on_change: C,
        on_error: E,
    ) -> Result<SubscriptionHandle, CoreError>
    where
        C: Fn() + Send + Sync + 'static,
        E: Fn(CoreError) + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        let rx = channel.open(path, cancel.clone())?;
        let active = Arc::new(AtomicBool::new(true));

        debug!(resource = %resource_key, path, "push subscription opened");
        let task = tokio::spawn(deliver_task(
            rx,
            resource_key.clone(),
            Arc::clone(&active),
            cancel.clone(),
            on_change,
            on_error,
        ));

        Ok(SubscriptionHandle {
            resource_key,
            active,
            cancel,
            task: Some(task),
        })
    }
}

async fn deliver_task<C, E>(
    mut rx: mpsc::Receiver<PushSignal>,
    resource_key: ResourceKey,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    on_change: C,
    on_error: E,
) where
    C: Fn(),
    E: Fn(CoreError),
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(PushSignal::Changed) => on_change(),
                Some(PushSignal::Failed(reason)) => {
                    warn!(resource = %resource_key, %reason, "push subscription error");
                    on_error(CoreError::SubscriptionDropped {
                        resource: resource_key.to_string(),
                        reason,
                    });
                }
                None => {
                    warn!(resource = %resource_key, "push channel closed");
                    active.store(false, Ordering::Release);
                    on_error(CoreError::SubscriptionDropped {
                        resource: resource_key.to_string(),
                        reason: "channel closed".into(),
                    });
                    break;
                }
            },
        }
    }
    active.store(false, Ordering::Release);
}

/// A live subscription. Closed explicitly or when dropped.
#[derive(Debug)]
pub struct SubscriptionHandle {
    resource_key: ResourceKey,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn resource_key(&self) -> &ResourceKey {
        &self.resource_key
    }

    /// `false` once closed or once the channel has gone away.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Stop delivery and wait for the delivery task to exit. Idempotent.
    pub async fn close(&mut self) {
        self.active.store(false, Ordering::Release);
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(resource = %self.resource_key, "push subscription closed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
