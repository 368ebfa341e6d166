// livesync-core: Client-side data-freshness engine between livesync-api
// and consumers (CLI, dashboards).
//
// Keeps live views consistent while data arrives over an unreliable push
// channel and a REST poll, and lets writes succeed while briefly offline.

pub mod config;
pub mod connectivity;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod model;
pub mod queue;
pub mod session;
pub mod signal;
pub mod source;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ControllerConfig, ResourcePolicy, ResourceSpec, RetryPolicy, TlsVerification};
pub use connectivity::ConnectivityMonitor;
pub use controller::Controller;
pub use error::{CoreError, ErrorKind, SurfacedError};
pub use fetch::{CacheEntry, FetchCoordinator, RefreshOptions, ResponseCache};
pub use model::{ResourceKey, Snapshot, SnapshotSource};
pub use queue::{
    DurableStore, FileStore, FlushReport, ItemState, MemoryStore, OfflineWriteQueue, Outbox,
    QueueItem, Submission, WriteSender,
};
pub use session::SyncSession;
pub use signal::{
    BroadcastPushChannel, ChangeSubscription, DebounceGate, PollingScheduler, PushChannel,
    PushSignal, SafetyWatchdog, SubscriptionHandle,
};
pub use source::{RestWriteSender, WebSocketPushChannel};
pub use stream::{LiveView, ViewState, ViewStream};
