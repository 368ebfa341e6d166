// ── Domain model ──
//
// Resource keys and the snapshots the cache hands out.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::time::Instant;

/// Identifies one live resource (e.g. `"attendance/today"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// What caused a snapshot to be pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// A change notification arrived on the push channel.
    Push,
    /// The polling cadence (or the initial load) fired.
    Poll,
    /// The user asked for it.
    Manual,
}

/// The last fetched full state of a resource.
///
/// `data` is shared: handing a snapshot to a view is an `Arc` clone.
/// `fetched_at` uses tokio's clock so freshness follows paused test time.
pub struct Snapshot<T> {
    pub data: Arc<T>,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
    pub source: SnapshotSource,
}

impl<T> Snapshot<T> {
    pub fn new(data: T, source: SnapshotSource) -> Self {
        Self {
            data: Arc::new(data),
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
            source,
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }

    /// Fresh iff `now - fetched_at < max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() < max_age
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            fetched_at: self.fetched_at,
            fetched_at_utc: self.fetched_at_utc,
            source: self.source,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("data", &self.data)
            .field("fetched_at_utc", &self.fetched_at_utc)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
