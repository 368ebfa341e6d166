// ── Controller facade ──
//
// Created once per process. Owns the shared cache and coordinator, the
// REST client, the push channel, connectivity, and the write outbox.
// Views obtain sessions from it; writes go through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use livesync_api::{ChangeFeedHandle, RestClient};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::CoreError;
use crate::fetch::{FetchCoordinator, RefreshOptions, ResponseCache};
use crate::model::{ResourceKey, Snapshot};
use crate::queue::{
    DurableStore, FileStore, FlushReport, MemoryStore, OfflineWriteQueue, Outbox, QueueItem,
    Submission,
};
use crate::session::SyncSession;
use crate::signal::PushChannel;
use crate::source::{RestWriteSender, WebSocketPushChannel};

/// Store key the write queue is persisted under.
const QUEUE_KEY: &str = "outbox";

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    client: RestClient,
    coordinator: Arc<FetchCoordinator<Value>>,
    push: std::sync::Mutex<Option<Arc<dyn PushChannel>>>,
    feed: Mutex<Option<Arc<ChangeFeedHandle>>>,
    connectivity: ConnectivityMonitor,
    outbox: Arc<Outbox<RestWriteSender>>,
    cancel: CancellationToken,
    started: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Build the engine from `config`. Loads the persisted write queue but
    /// starts no background work; call [`start`](Self::start).
    pub fn new(config: ControllerConfig) -> Result<Self, CoreError> {
        let client = RestClient::new(config.endpoint.clone(), &config.transport())?;
        let cache = Arc::new(ResponseCache::new());
        let coordinator = Arc::new(FetchCoordinator::new(cache, config.default_policy.max_age));
        for (name, spec) in &config.resources {
            coordinator.set_max_age(ResourceKey::from(name.as_str()), spec.policy.max_age);
        }

        let store: Arc<dyn DurableStore> = match &config.queue_dir {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => Arc::new(MemoryStore::new()),
        };
        let queue = Arc::new(OfflineWriteQueue::open(store, QUEUE_KEY)?);
        let connectivity = ConnectivityMonitor::default();
        let outbox = Arc::new(Outbox::new(
            queue,
            Arc::new(RestWriteSender::new(client.clone())),
            connectivity.clone(),
            config.retry,
        ));

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                client,
                coordinator,
                push: std::sync::Mutex::new(None),
                feed: Mutex::new(None),
                connectivity,
                outbox,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache<Value>> {
        self.inner.coordinator.cache()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Use `channel` for change signals instead of the configured feed.
    /// Sessions created afterwards pick it up.
    pub fn set_push_channel(&self, channel: Arc<dyn PushChannel>) {
        *self.push_slot() = Some(channel);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect the change feed (if configured) and spawn the outbox driver.
    /// Idempotent.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Disconnected);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let needs_feed = self.push_slot().is_none();
        if needs_feed {
            if let Some(url) = self.inner.config.push_url.clone() {
                let feed = Arc::new(ChangeFeedHandle::connect(
                    url,
                    self.inner.config.reconnect.clone(),
                    self.inner.cancel.child_token(),
                    self.inner.config.transport().authorization(),
                ));
                *self.push_slot() = Some(Arc::new(WebSocketPushChannel::new(Arc::clone(&feed))));
                *self.inner.feed.lock().await = Some(feed);
                info!("change feed connecting");
            }
        }

        let driver = self.inner.outbox.spawn_driver(self.inner.cancel.child_token());
        self.inner.task_handles.lock().await.push(driver);

        info!(
            endpoint = %self.inner.config.endpoint,
            push = self.push_slot().is_some(),
            pending = self.inner.outbox.queue().len(),
            "controller started"
        );
        Ok(())
    }

    /// Cancel every background task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(feed) = self.inner.feed.lock().await.take() {
            feed.shutdown();
        }
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("controller shut down");
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Start keeping `resource` live. `resource` is a configured name or a
    /// path relative to the endpoint.
    pub fn watch(&self, resource: &str) -> Result<SyncSession<Value>, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Disconnected);
        }
        let spec = self.inner.config.resource(resource);
        let key = ResourceKey::from(resource.trim_matches('/'));
        let push = self.push_slot().clone();

        let client = self.inner.client.clone();
        let path = spec.path.clone();
        let session = SyncSession::new(key, spec, Arc::clone(&self.inner.coordinator), push, move || {
            let client = client.clone();
            let path = path.clone();
            async move { client.fetch::<Value>(&path).await.map_err(CoreError::from) }
        });
        session.start();
        Ok(session)
    }

    /// One-shot pull of `resource`, bypassing the cache. Errors surface.
    pub async fn fetch(&self, resource: &str) -> Result<Snapshot<Value>, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Disconnected);
        }
        let spec = self.inner.config.resource(resource);
        let key = ResourceKey::from(resource.trim_matches('/'));
        let client = &self.inner.client;
        self.inner
            .coordinator
            .refresh(&key, RefreshOptions::manual(), || async {
                client.fetch::<Value>(&spec.path).await.map_err(CoreError::from)
            })
            .await
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Send a write, queueing it when the network is unavailable.
    pub async fn submit(&self, kind: &str, payload: Value) -> Result<Submission, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Disconnected);
        }
        self.inner.outbox.submit(kind.trim_matches('/'), payload).await
    }

    /// Manual sync of the offline queue.
    pub async fn flush(&self) -> Result<FlushReport, CoreError> {
        self.inner.outbox.flush().await
    }

    pub fn pending(&self) -> Vec<QueueItem> {
        self.inner.outbox.queue().peek_all()
    }

    pub fn clear_queue(&self) -> Result<usize, CoreError> {
        self.inner.outbox.queue().clear()
    }

    fn push_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn PushChannel>>> {
        self.inner.push.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
