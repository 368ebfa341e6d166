// ── Connectivity signal ──
//
// Online/offline state fed by the embedding platform. The outbox driver
// watches it to flush on reconnect.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shared online/offline flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self) {
        self.set(true);
    }

    pub fn set_offline(&self) {
        self.set(false);
    }

    /// Receiver that is notified on every transition (not on repeats).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn set(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            let changed = *state != online;
            *state = online;
            changed
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }
}
