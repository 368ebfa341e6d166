// ── Live views ──
//
// The UI-facing side of a sync session: current snapshot, loading and
// staleness flags, the last surfaced error, and change notification.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::{CoreError, SurfacedError};
use crate::fetch::RefreshOptions;
use crate::model::{ResourceKey, Snapshot};
use crate::session::SessionInner;

/// Everything a view renders from.
pub struct ViewState<T> {
    pub snapshot: Option<Snapshot<T>>,
    pub is_loading: bool,
    pub last_error: Option<SurfacedError>,
}

impl<T> Default for ViewState<T> {
    fn default() -> Self {
        Self {
            snapshot: None,
            is_loading: false,
            last_error: None,
        }
    }
}

impl<T> Clone for ViewState<T> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
            is_loading: self.is_loading,
            last_error: self.last_error.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ViewState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewState")
            .field("snapshot", &self.snapshot)
            .field("is_loading", &self.is_loading)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// A view's handle on one resource.
///
/// Reads are cheap: the snapshot payload is shared behind an `Arc`.
pub struct LiveView<T: Send + Sync + 'static> {
    session: Arc<SessionInner<T>>,
    receiver: watch::Receiver<ViewState<T>>,
}

impl<T: Send + Sync + 'static> LiveView<T> {
    pub(crate) fn new(session: Arc<SessionInner<T>>) -> Self {
        let receiver = session.subscribe();
        Self { session, receiver }
    }

    pub fn resource_key(&self) -> &ResourceKey {
        self.session.key()
    }

    pub fn snapshot(&self) -> Option<Snapshot<T>> {
        self.receiver.borrow().snapshot.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.receiver.borrow().is_loading
    }

    /// No snapshot yet, or the one we have is past its max age.
    pub fn is_stale(&self) -> bool {
        self.receiver
            .borrow()
            .snapshot
            .as_ref()
            .is_none_or(|s| !s.is_fresh(self.session.policy().max_age))
    }

    pub fn last_error(&self) -> Option<SurfacedError> {
        self.receiver.borrow().last_error.clone()
    }

    /// Full current state.
    pub fn state(&self) -> ViewState<T> {
        self.receiver.borrow().clone()
    }

    /// User-initiated refresh: always pulls, surfaces every failure.
    pub async fn refresh(&self) -> Result<Snapshot<T>, CoreError> {
        self.session.run(RefreshOptions::manual()).await
    }

    /// Wait for the next state change.
    /// Returns `None` once the session has been dropped.
    pub async fn changed(&mut self) -> Option<ViewState<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Convert into a `Stream` of states. Yields the current state first.
    pub fn into_stream(self) -> ViewStream<T> {
        ViewStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

impl<T: Send + Sync + 'static> Clone for LiveView<T> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            receiver: self.receiver.clone(),
        }
    }
}

/// `Stream` adapter backed by the session's `watch` channel.
pub struct ViewStream<T: Send + Sync + 'static> {
    inner: WatchStream<ViewState<T>>,
}

impl<T: Send + Sync + 'static> Stream for ViewStream<T> {
    type Item = ViewState<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // WatchStream is Unpin.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
