//! Change-feed WebSocket with auto-reconnect.
//!
//! Connects to the platform's change-notification endpoint and streams
//! [`FeedEvent`]s through a [`tokio::sync::broadcast`] channel. Frames only
//! tell us *which* resource changed: any data carried alongside is dropped
//! on the floor, consumers always re-pull the authoritative snapshot.
//!
//! Every connection loss is surfaced as [`FeedEvent::Dropped`] before the
//! reconnect backoff starts, so subscribers know they may have missed
//! changes. The next successful handshake is announced as
//! [`FeedEvent::Reconnected`].
//!
//! # Example
//!
//! ```rust,ignore
//! use livesync_api::websocket::{ChangeFeedHandle, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let ws_url = Url::parse("wss://ops.example.com/changes")?;
//!
//! let handle = ChangeFeedHandle::connect(ws_url, ReconnectConfig::default(), cancel.clone(), None);
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── FeedEvent ────────────────────────────────────────────────────────

/// A signal read from the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The resource at `path` changed on the server.
    Changed { path: String },
    /// The connection dropped; changes may have been missed.
    Dropped { reason: String },
    /// The feed is back after a drop. Anything may have changed meanwhile.
    Reconnected,
}

impl FeedEvent {
    /// Whether this event concerns `path` (drops and reconnects concern
    /// every path).
    pub fn concerns(&self, path: &str) -> bool {
        match self {
            Self::Changed { path: changed } => {
                changed.trim_matches('/') == path.trim_matches('/')
            }
            Self::Dropped { .. } | Self::Reconnected => true,
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── ChangeFeedHandle ─────────────────────────────────────────────────

/// Handle to a running change feed.
///
/// Call [`shutdown`](Self::shutdown) to tear down the background task.
/// Once the task exits, every receiver observes `RecvError::Closed`.
pub struct ChangeFeedHandle {
    event_rx: broadcast::Receiver<Arc<FeedEvent>>,
    cancel: CancellationToken,
}

impl ChangeFeedHandle {
    /// Spawn the connect/reconnect loop for `ws_url`.
    ///
    /// Returns immediately; the first connection attempt happens
    /// asynchronously. `authorization` is sent verbatim as the
    /// `Authorization` header of the upgrade request.
    pub fn connect(
        ws_url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        authorization: Option<String>,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(ws_url, event_tx, reconnect, task_cancel, authorization).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the feed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<FeedEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on loss, report + backoff → reconnect.
async fn ws_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<Arc<FeedEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    authorization: Option<String>,
) {
    let mut attempt: u32 = 0;
    let mut dropped = false;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &cancel, authorization.as_deref(), dropped) => result,
        };
        if cancel.is_cancelled() {
            break;
        }

        let reason = match result {
            Ok(()) => {
                tracing::info!("change feed disconnected cleanly, reconnecting");
                attempt = 0;
                "connection closed by server".to_owned()
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "change feed error");
                e.to_string()
            }
        };
        let _ = event_tx.send(Arc::new(FeedEvent::Dropped { reason }));
        dropped = true;

        if let Some(max) = reconnect.max_retries {
            if attempt >= max {
                tracing::error!(max_retries = max, "change feed reconnection limit reached, giving up");
                break;
            }
        }

        let delay = calculate_backoff(attempt, &reconnect);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    tracing::debug!("change feed loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish a single WebSocket connection and read frames until it drops.
/// `after_drop` marks a reconnect, announced once the handshake succeeds.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<FeedEvent>>,
    cancel: &CancellationToken,
    authorization: Option<&str>,
    after_drop: bool,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to change feed");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(value) = authorization {
        request = request.with_header("Authorization", value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!(reconnect = after_drop, "change feed connected");
    if after_drop {
        let _ = event_tx.send(Arc::new(FeedEvent::Reconnected));
    }

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.to_string(),
                            }),
                            None => Ok(()),
                        };
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("change feed stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Ping is answered by tungstenite; binary/pong are ignored.
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Shape of a change frame. Anything besides the path(s) is ignored.
#[derive(Debug, Deserialize)]
struct ChangeFrame {
    #[serde(default, alias = "type")]
    event: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    paths: Vec<String>,
}

/// Parse a text frame and broadcast a `Changed` for every path it names.
fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<Arc<FeedEvent>>) {
    let frame: ChangeFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse change frame");
            return;
        }
    };

    if matches!(frame.event.as_deref(), Some("ping" | "hello" | "ack")) {
        tracing::trace!(event = ?frame.event, "control frame");
        return;
    }

    for path in frame.path.into_iter().chain(frame.paths) {
        // Ignore send errors -- just means no active subscribers right now
        let _ = event_tx.send(Arc::new(FeedEvent::Changed { path }));
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
