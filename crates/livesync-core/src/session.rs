// ── Sync sessions ──
//
// One session keeps one resource live for as long as a view is interested:
//
//   push signal ─▶ DebounceGate ─┐
//   poll tick ───────────────────┼─▶ FetchCoordinator ─▶ ResponseCache ─▶ ViewState
//   initial load / refresh() ────┘
//
// Views follow the cache rather than their own requests, so every session
// of a key shows whichever fetch won. Callbacks hold a `Weak` to the
// session so dropping the session tears everything down.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{ResourcePolicy, ResourceSpec};
use crate::error::{CoreError, SurfacedError};
use crate::fetch::{FetchCoordinator, RefreshOptions};
use crate::model::{ResourceKey, Snapshot, SnapshotSource};
use crate::signal::{
    ChangeSubscription, DebounceGate, PollingScheduler, PushChannel, SafetyWatchdog,
    SubscriptionHandle,
};
use crate::stream::{LiveView, ViewState};

type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, CoreError>> + Send + Sync>;

/// Keeps one resource fresh between [`start`](Self::start) and
/// [`stop`](Self::stop).
pub struct SyncSession<T: Send + Sync + 'static> {
    inner: Arc<SessionInner<T>>,
}

/// Tasks owned by a started session.
struct Running {
    load: JoinHandle<()>,
    updates: JoinHandle<()>,
    subscription: Option<SubscriptionHandle>,
    debounce: Option<DebounceGate>,
}

pub(crate) struct SessionInner<T: Send + Sync + 'static> {
    key: ResourceKey,
    path: String,
    policy: ResourcePolicy,
    coordinator: Arc<FetchCoordinator<T>>,
    fetcher: Fetcher<T>,
    push: Option<Arc<dyn PushChannel>>,
    state: watch::Sender<ViewState<T>>,
    poller: PollingScheduler,
    watchdog: SafetyWatchdog,
    running: Mutex<Option<Running>>,
    active: AtomicBool,
    /// Push is unavailable; polling runs at the fallback cadence.
    degraded: AtomicBool,
}

impl<T: Send + Sync + 'static> SyncSession<T> {
    /// Build a session for `spec`, pulling with `fetch`.
    ///
    /// Registers the resource's max age with `coordinator`. Nothing runs
    /// until [`start`](Self::start).
    pub fn new<F, Fut>(
        key: ResourceKey,
        spec: ResourceSpec,
        coordinator: Arc<FetchCoordinator<T>>,
        push: Option<Arc<dyn PushChannel>>,
        fetch: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        coordinator.set_max_age(key.clone(), spec.policy.max_age);
        let (state, _rx) = watch::channel(ViewState::default());
        let fetcher: Fetcher<T> = Arc::new(move || fetch().boxed());

        Self {
            inner: Arc::new(SessionInner {
                key,
                path: spec.path,
                policy: spec.policy,
                coordinator,
                fetcher,
                push,
                state,
                poller: PollingScheduler::new(),
                watchdog: SafetyWatchdog::new(),
                running: Mutex::new(None),
                active: AtomicBool::new(false),
                degraded: AtomicBool::new(false),
            }),
        }
    }

    pub fn resource_key(&self) -> &ResourceKey {
        &self.inner.key
    }

    /// Begin keeping the resource live. Idempotent.
    ///
    /// Any cached snapshot is published immediately; the initial load runs
    /// under the loading watchdog; push signals (debounced) and the poll
    /// cadence trigger background refreshes from then on.
    pub fn start(&self) -> LiveView<T> {
        let mut running = self.inner.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_none() {
            *running = Some(SessionInner::launch(&self.inner));
        }
        drop(running);
        self.view()
    }

    /// Tear down subscription, debounce, polling and watchdog. Idempotent.
    ///
    /// The view keeps its last snapshot and can still `refresh()`.
    pub fn stop(&self) {
        self.inner.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether push delivery is down and polling runs at the fallback cadence.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Acquire)
    }

    /// A new view handle on this session.
    pub fn view(&self) -> LiveView<T> {
        LiveView::new(Arc::clone(&self.inner))
    }

    /// User-initiated refresh.
    pub async fn refresh(&self) -> Result<Snapshot<T>, CoreError> {
        self.inner.run(RefreshOptions::manual()).await
    }
}

impl<T: Send + Sync + 'static> Drop for SyncSession<T> {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl<T: Send + Sync + 'static> SessionInner<T> {
    pub(crate) fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub(crate) fn policy(&self) -> &ResourcePolicy {
        &self.policy
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ViewState<T>> {
        self.state.subscribe()
    }

    fn launch(this: &Arc<Self>) -> Running {
        info!(resource = %this.key, path = %this.path, "session started");
        this.active.store(true, Ordering::Release);
        this.degraded.store(false, Ordering::Release);

        let updates = tokio::spawn(follow_cache(
            this.coordinator.cache().subscribe(&this.key),
            Arc::downgrade(this),
        ));

        // Stale-while-revalidate: show whatever we already have.
        if let Some(entry) = this.coordinator.peek(this.key.as_str()) {
            this.state.send_modify(|s| s.snapshot = Some(entry.snapshot));
        }

        let load = {
            let inner = Arc::clone(this);
            tokio::spawn(async move {
                let _ = inner
                    .run(RefreshOptions::background(SnapshotSource::Poll))
                    .await;
            })
        };

        let weak = Arc::downgrade(this);
        let period = if this.push.is_some() {
            this.policy.poll_interval
        } else {
            this.policy.fallback_poll_interval
        };
        start_polling(&this.poller, &weak, period);

        let (subscription, debounce) = match &this.push {
            Some(channel) => Self::subscribe_push(this, channel.as_ref(), &weak),
            None => (None, None),
        };

        Running {
            load,
            updates,
            subscription,
            debounce,
        }
    }

    fn subscribe_push(
        this: &Arc<Self>,
        channel: &dyn PushChannel,
        weak: &Weak<Self>,
    ) -> (Option<SubscriptionHandle>, Option<DebounceGate>) {
        let gate = {
            let weak = weak.clone();
            DebounceGate::spawn(this.policy.debounce, move || {
                let inner = weak.upgrade();
                async move {
                    if let Some(inner) = inner {
                        let _ = inner
                            .run(RefreshOptions::revalidate(SnapshotSource::Push))
                            .await;
                    }
                }
            })
        };

        let on_change = {
            let gate = gate.clone();
            let weak = weak.clone();
            move || {
                gate.trigger();
                if let Some(inner) = weak.upgrade() {
                    inner.recover_push();
                }
            }
        };
        let on_error = {
            let weak = weak.clone();
            move |err: CoreError| {
                if let Some(inner) = weak.upgrade() {
                    inner.degrade(&err);
                }
            }
        };

        match ChangeSubscription::subscribe(channel, this.key.clone(), &this.path, on_change, on_error)
        {
            Ok(handle) => (Some(handle), Some(gate)),
            Err(err) => {
                gate.cancel();
                this.degrade(&err);
                (None, None)
            }
        }
    }

    /// Push delivery is gone: poll faster until it comes back.
    fn degrade(self: &Arc<Self>, err: &CoreError) {
        if !self.active.load(Ordering::Acquire) || self.degraded.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(
            resource = %self.key,
            error = %err,
            every_ms = self.policy.fallback_poll_interval.as_millis(),
            "push unavailable, falling back to polling"
        );
        start_polling(&self.poller, &Arc::downgrade(self), self.policy.fallback_poll_interval);
    }

    /// A change signal arrived after a drop (a feed reconnect counts as
    /// one): back to the regular cadence.
    fn recover_push(self: &Arc<Self>) {
        if !self.active.load(Ordering::Acquire) || !self.degraded.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(resource = %self.key, "push delivery resumed");
        start_polling(&self.poller, &Arc::downgrade(self), self.policy.poll_interval);
    }

    /// Refresh through the coordinator and publish the outcome.
    ///
    /// Loading is raised for the initial load and manual refreshes and is
    /// cleared once the request settles. After [`stop`](SyncSession::stop)
    /// only forced refreshes reach the view.
    pub(crate) async fn run(self: &Arc<Self>, opts: RefreshOptions) -> Result<Snapshot<T>, CoreError> {
        let shows_loading = opts.force || !opts.revalidate;
        if shows_loading {
            self.state.send_if_modified(|s| !std::mem::replace(&mut s.is_loading, true));
            let weak = Arc::downgrade(self);
            self.watchdog.arm(self.policy.loading_timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.state.send_if_modified(|s| std::mem::replace(&mut s.is_loading, false));
                }
            });
        }

        let fetcher = Arc::clone(&self.fetcher);
        let result = self.coordinator.refresh(&self.key, opts, move || fetcher()).await;

        let visible = opts.force || self.active.load(Ordering::Acquire);
        match &result {
            Err(CoreError::Superseded { .. }) => {
                trace!(resource = %self.key, "refresh abandoned by a newer request");
            }
            _ if !visible => {
                trace!(resource = %self.key, "session stopped, result not published");
            }
            Ok(snapshot) => self.publish(snapshot.clone()),
            Err(err) if opts.force || err.is_surfaced_in_background() => {
                let surfaced = SurfacedError::from(err);
                self.state.send_modify(|s| s.last_error = Some(surfaced));
            }
            Err(err) => debug!(resource = %self.key, error = %err, "background refresh failed"),
        }

        self.watchdog.disarm();
        self.state.send_if_modified(|s| std::mem::replace(&mut s.is_loading, false));
        result
    }

    /// A new snapshot replaces the view's data and clears its error. The
    /// same snapshot again (a joined request, a cache echo) changes nothing.
    fn publish(&self, snapshot: Snapshot<T>) {
        self.state.send_if_modified(|s| {
            let same = s
                .snapshot
                .as_ref()
                .is_some_and(|cur| Arc::ptr_eq(&cur.data, &snapshot.data));
            if same {
                return false;
            }
            s.snapshot = Some(snapshot);
            s.last_error = None;
            true
        });
    }

    fn shutdown(&self) {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.load.abort();
            running.updates.abort();
            if let Some(gate) = running.debounce {
                gate.cancel();
            }
            drop(running.subscription);
        }
        self.poller.stop();
        self.watchdog.disarm();
        self.state.send_if_modified(|s| std::mem::replace(&mut s.is_loading, false));
        if was_active {
            info!(resource = %self.key, "session stopped");
        }
    }
}

/// Publish every snapshot stored for the session's key, whoever fetched it.
async fn follow_cache<T: Send + Sync + 'static>(
    mut updates: watch::Receiver<Option<Snapshot<T>>>,
    session: Weak<SessionInner<T>>,
) {
    while updates.changed().await.is_ok() {
        let latest = updates.borrow_and_update().clone();
        let Some(inner) = session.upgrade() else {
            break;
        };
        if let Some(snapshot) = latest {
            trace!(resource = %inner.key, source = %snapshot.source, "cache updated");
            inner.publish(snapshot);
        }
    }
}

fn start_polling<T: Send + Sync + 'static>(
    poller: &PollingScheduler,
    weak: &Weak<SessionInner<T>>,
    period: Duration,
) {
    let weak = weak.clone();
    poller.start(period, move || {
        let inner = weak.upgrade();
        async move {
            if let Some(inner) = inner {
                let _ = inner
                    .run(RefreshOptions::revalidate(SnapshotSource::Poll))
                    .await;
            }
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures_util::StreamExt;

    use super::*;
    use crate::error::ErrorKind;
    use crate::fetch::ResponseCache;
    use crate::signal::BroadcastPushChannel;

    const PATH: &str = "attendance/today";

    fn policy() -> ResourcePolicy {
        ResourcePolicy {
            max_age: Duration::from_secs(60),
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_secs(30),
            fallback_poll_interval: Duration::from_secs(10),
            loading_timeout: Duration::from_secs(8),
        }
    }

    fn coordinator() -> Arc<FetchCoordinator<String>> {
        Arc::new(FetchCoordinator::new(
            Arc::new(ResponseCache::new()),
            Duration::from_secs(60),
        ))
    }

    /// Session whose fetcher returns `v1`, `v2`, ... and counts calls.
    fn session(
        coordinator: Arc<FetchCoordinator<String>>,
        push: Option<Arc<dyn PushChannel>>,
    ) -> (SyncSession<String>, Arc<AtomicUsize>) {
        labeled_session(coordinator, push, "v", Duration::ZERO)
    }

    /// Like [`session`], but each pull takes `delay` and answers
    /// `{label}1`, `{label}2`, ...
    fn labeled_session(
        coordinator: Arc<FetchCoordinator<String>>,
        push: Option<Arc<dyn PushChannel>>,
        label: &'static str,
        delay: Duration,
    ) -> (SyncSession<String>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let session = SyncSession::new(
            PATH.into(),
            ResourceSpec {
                path: PATH.into(),
                policy: policy(),
            },
            coordinator,
            push,
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(format!("{label}{n}"))
                }
            },
        );
        (session, calls)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn initial_load_publishes_snapshot() {
        let (session, calls) = session(coordinator(), None);
        let view = session.start();
        settle().await;

        assert_eq!(*view.snapshot().unwrap().data, "v1");
        assert!(!view.is_loading());
        assert!(!view.is_stale());
        assert!(view.last_error().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_snapshot_is_served_immediately() {
        let coord = coordinator();
        coord
            .refresh(
                &PATH.into(),
                RefreshOptions::background(SnapshotSource::Poll),
                || async { Ok("cached".to_owned()) },
            )
            .await
            .unwrap();

        let (session, calls) = session(Arc::clone(&coord), None);
        let view = session.start();

        // Before the load task runs at all.
        assert_eq!(*view.snapshot().unwrap().data, "cached");
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0, "fresh cache must not refetch");
    }

    #[tokio::test(start_paused = true)]
    async fn push_burst_triggers_one_refresh() {
        let channel = Arc::new(BroadcastPushChannel::new());
        let push: Arc<dyn PushChannel> = channel.clone();
        let (session, calls) = session(coordinator(), Some(push));
        let view = session.start();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            channel.notify(PATH);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "refreshed before quiet period");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let snap = view.snapshot().unwrap();
        assert_eq!(*snap.data, "v2");
        assert_eq!(snap.source, SnapshotSource::Push);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_subscription_falls_back_to_fast_polling() {
        let channel = Arc::new(BroadcastPushChannel::new());
        let push: Arc<dyn PushChannel> = channel.clone();
        let (session, calls) = session(coordinator(), Some(push));
        let _view = session.start();
        settle().await;

        channel.close(PATH);
        settle().await;
        assert!(session.is_degraded());

        // Fallback cadence is 10s instead of 30s.
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_revalidates_on_cadence() {
        let channel = Arc::new(BroadcastPushChannel::new());
        let push: Arc<dyn PushChannel> = channel.clone();
        let (session, calls) = session(coordinator(), Some(push));
        let view = session.start();
        settle().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(view.snapshot().unwrap().source, SnapshotSource::Poll);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_clears_loading_for_hung_fetch() {
        let session = SyncSession::new(
            PATH.into(),
            ResourceSpec {
                path: PATH.into(),
                policy: policy(),
            },
            coordinator(),
            None,
            std::future::pending::<Result<String, CoreError>>,
        );
        let view = session.start();
        settle().await;
        assert!(view.is_loading());

        tokio::time::sleep(Duration::from_millis(7_900)).await;
        assert!(view.is_loading());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!view.is_loading(), "loading flag outlived the watchdog");
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refresh_surfaces_errors_background_does_not() {
        let fail = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let channel = Arc::new(BroadcastPushChannel::new());
        let push: Arc<dyn PushChannel> = channel.clone();
        let session = SyncSession::new(
            PATH.into(),
            ResourceSpec {
                path: PATH.into(),
                policy: policy(),
            },
            coordinator(),
            Some(push),
            move || {
                let failing = flag.load(Ordering::SeqCst);
                async move {
                    if failing {
                        Err(CoreError::NetworkTransient {
                            message: "offline".into(),
                        })
                    } else {
                        Ok("good".to_owned())
                    }
                }
            },
        );
        let view = session.start();
        settle().await;

        fail.store(true, Ordering::SeqCst);
        channel.notify(PATH);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(view.last_error().is_none(), "background failure leaked to view");
        assert_eq!(*view.snapshot().unwrap().data, "good");

        let err = view.refresh().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(view.last_error().unwrap().kind, ErrorKind::NetworkTransient);
        assert!(!view.is_loading());

        fail.store(false, Ordering::SeqCst);
        view.refresh().await.unwrap();
        assert!(view.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_halts_refreshes() {
        let channel = Arc::new(BroadcastPushChannel::new());
        let push: Arc<dyn PushChannel> = channel.clone();
        let (session, calls) = session(coordinator(), Some(push));
        let view = session.start();
        settle().await;

        session.stop();
        session.stop();
        assert!(!session.is_running());
        settle().await;
        assert_eq!(channel.subscriber_count(PATH), 0);

        channel.notify(PATH);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*view.snapshot().unwrap().data, "v1");
    }

    #[tokio::test(start_paused = true)]
    async fn view_stream_yields_updates() {
        let (session, _calls) = session(coordinator(), None);
        let mut stream = session.start().into_stream();

        let first = stream.next().await.unwrap();
        assert!(first.snapshot.is_none() || first.is_loading);

        session.refresh().await.unwrap();
        let mut latest = stream.next().await.unwrap();
        while latest.is_loading {
            latest = stream.next().await.unwrap();
        }
        assert!(latest.snapshot.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_poll_refresh_in_flight() {
        let (session, calls) = labeled_session(coordinator(), None, "v", Duration::from_secs(5));
        let view = session.start();

        // Initial load lands at 5s; the first fallback poll starts at 10s.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*view.snapshot().unwrap().data, "v1");

        session.stop();
        drop(session);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*view.snapshot().unwrap().data, "v1", "view updated after stop()");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!view.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_sharing_a_key_follow_the_winning_fetch() {
        let coord = coordinator();
        let delay = Duration::from_millis(100);
        let (first, _) = labeled_session(Arc::clone(&coord), None, "a", delay);
        let (second, second_calls) = labeled_session(Arc::clone(&coord), None, "b", delay);

        let va = first.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*va.snapshot().unwrap().data, "a1");

        let vb = second.start();
        assert_eq!(*vb.snapshot().unwrap().data, "a1");
        settle().await;
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);

        // A's refresh is still pulling when B's replaces it.
        let pending = {
            let va = va.clone();
            tokio::spawn(async move { va.refresh().await })
        };
        settle().await;
        let b = vb.refresh().await.unwrap();
        assert_eq!(*b.data, "b1");

        let a = pending.await.unwrap().unwrap();
        assert_eq!(*a.data, "b1");
        assert_eq!(*va.snapshot().unwrap().data, "b1");
        assert!(va.last_error().is_none());
        assert!(!va.is_loading());

        // A plain refresh on one view reaches the other too.
        vb.refresh().await.unwrap();
        settle().await;
        assert_eq!(*va.snapshot().unwrap().data, "b2");
    }

    #[tokio::test(start_paused = true)]
    async fn push_revalidation_joins_manual_refresh() {
        let channel = Arc::new(BroadcastPushChannel::new());
        let push: Arc<dyn PushChannel> = channel.clone();
        let (session, calls) =
            labeled_session(coordinator(), Some(push), "v", Duration::from_secs(1));
        let view = session.start();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(*view.snapshot().unwrap().data, "v1");

        let manual = {
            let view = view.clone();
            tokio::spawn(async move { view.refresh().await })
        };
        settle().await;
        // The debounced revalidation fires halfway through the manual pull.
        channel.notify(PATH);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let snap = manual.await.unwrap().unwrap();
        assert_eq!(*snap.data, "v2");
        assert_eq!(snap.source, SnapshotSource::Manual);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*view.snapshot().unwrap().data, "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn manual_failure_is_not_hidden_by_push_revalidation() {
        let fail = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let channel = Arc::new(BroadcastPushChannel::new());
        let push: Arc<dyn PushChannel> = channel.clone();
        let session = SyncSession::new(
            PATH.into(),
            ResourceSpec {
                path: PATH.into(),
                policy: policy(),
            },
            coordinator(),
            Some(push),
            move || {
                let failing = flag.load(Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if failing {
                        Err(CoreError::NetworkTransient {
                            message: "offline".into(),
                        })
                    } else {
                        Ok("good".to_owned())
                    }
                }
            },
        );
        let view = session.start();
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        fail.store(true, Ordering::SeqCst);
        let manual = {
            let view = view.clone();
            tokio::spawn(async move { view.refresh().await })
        };
        settle().await;
        channel.notify(PATH);

        let err = manual.await.unwrap().unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
        assert_eq!(view.last_error().unwrap().kind, ErrorKind::NetworkTransient);
        assert_eq!(*view.snapshot().unwrap().data, "good");
    }

    #[tokio::test(start_paused = true)]
    async fn change_after_push_failure_restores_regular_cadence() {
        let channel = Arc::new(BroadcastPushChannel::new());
        let push: Arc<dyn PushChannel> = channel.clone();
        let (session, calls) = session(coordinator(), Some(push));
        let _view = session.start();
        settle().await;

        channel.fail(PATH, "connection reset");
        settle().await;
        assert!(session.is_degraded());

        // A feed reconnect is delivered as a change.
        channel.notify(PATH);
        settle().await;
        assert!(!session.is_degraded());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "reconnect revalidates once");

        // No fallback ticks at 10s or 20s.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
