// ── Debounce gate ──
//
// Coalesces a burst of triggers into one action after `window` of quiet.
// Every trigger inside the window pushes the deadline back.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Handle to a debounce task. Cloning shares the same window; the task
/// exits once every clone is dropped or [`cancel`](Self::cancel) is called.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
}

impl DebounceGate {
    /// Spawn the gate. `action` runs once per quiescent burst.
    pub fn spawn<F, Fut>(window: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(debounce_task(window, rx, cancel.clone(), action));
        Self { tx, cancel }
    }

    /// Start or restart the quiet window.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Drop any pending or running action and stop the gate.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn debounce_task<F, Fut>(
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
    action: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        // Idle until the first trigger of a burst.
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            msg = rx.recv() => if msg.is_none() { return },
        }

        let quiet = tokio::time::sleep(window);
        tokio::pin!(quiet);
        let mut coalesced = 1_u32;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                msg = rx.recv() => match msg {
                    Some(()) => {
                        coalesced += 1;
                        quiet.as_mut().reset(Instant::now() + window);
                    }
                    None => return,
                },
                () = &mut quiet => break,
            }
        }

        trace!(coalesced, "debounce window elapsed");
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = action() => {}
        }
    }
}
