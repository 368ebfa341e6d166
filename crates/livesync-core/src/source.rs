// ── Network adapters ──
//
// Bind the engine's seams (`WriteSender`, `PushChannel`) to the
// livesync-api REST client and change feed.

use std::future::Future;
use std::sync::Arc;

use livesync_api::{ChangeFeedHandle, FeedEvent, RestClient};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::CoreError;
use crate::queue::{QueueItem, WriteSender};
use crate::signal::{PushChannel, PushSignal};

const SIGNAL_BUFFER: usize = 16;

/// Sends queued writes as `POST <endpoint>/<kind>`, keyed by item id.
#[derive(Debug, Clone)]
pub struct RestWriteSender {
    client: RestClient,
}

impl RestWriteSender {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

impl WriteSender for RestWriteSender {
    fn send(&self, item: &QueueItem) -> impl Future<Output = Result<(), CoreError>> + Send {
        let idempotency_key = item.id.to_string();
        async move {
            self.client
                .send(&item.kind, &item.payload, &idempotency_key)
                .await
                .map_err(CoreError::from)
        }
    }
}

/// Push channel backed by the change-feed WebSocket.
///
/// One socket is shared by every subscription; each `open` filters the
/// feed down to its own path. A feed drop is reported as
/// [`PushSignal::Failed`]; the reconnect that follows is reported as
/// [`PushSignal::Changed`], since anything may have changed in the gap.
pub struct WebSocketPushChannel {
    feed: Arc<ChangeFeedHandle>,
}

impl WebSocketPushChannel {
    pub fn new(feed: Arc<ChangeFeedHandle>) -> Self {
        Self { feed }
    }
}

impl PushChannel for WebSocketPushChannel {
    fn open(
        &self,
        path: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<PushSignal>, CoreError> {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let events = self.feed.subscribe();
        tokio::spawn(bridge_task(events, path.to_owned(), tx, cancel));
        Ok(rx)
    }
}

async fn bridge_task(
    mut events: broadcast::Receiver<Arc<FeedEvent>>,
    path: String,
    tx: mpsc::Sender<PushSignal>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tx.closed() => break,
            event = events.recv() => match event {
                Ok(event) if event.concerns(&path) => match event.as_ref() {
                    FeedEvent::Changed { .. } => PushSignal::Changed,
                    FeedEvent::Dropped { reason } => PushSignal::Failed(reason.clone()),
                    FeedEvent::Reconnected => PushSignal::Changed,
                },
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed events may include ours; re-pull to be safe.
                    debug!(%path, skipped, "change feed lagged");
                    PushSignal::Changed
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        trace!(%path, ?signal, "push signal");
        if tx.send(signal).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use livesync_api::TransportConfig;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn queued_write_posts_with_idempotency_key() {
        let server = MockServer::start().await;
        let item = QueueItem::new("crew/check-in", json!({ "crew": "c-101" }));

        Mock::given(method("POST"))
            .and(path("/crew/check-in"))
            .and(header(livesync_api::IDEMPOTENCY_HEADER, item.id.to_string().as_str()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        RestWriteSender::new(client).send(&item).await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_classify_for_the_queue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists(livesync_api::IDEMPOTENCY_HEADER))
            .and(path("/receipts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoices"))
            .respond_with(ResponseTemplate::new(422).set_body_string("total mismatch"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let sender = RestWriteSender::new(client);

        let transient = sender.send(&QueueItem::new("receipts", json!(1))).await.unwrap_err();
        assert_eq!(transient.kind(), ErrorKind::NetworkTransient);

        let rejected = sender.send(&QueueItem::new("invoices", json!(2))).await.unwrap_err();
        assert_eq!(rejected.kind(), ErrorKind::ValidationRejected);
    }

    #[tokio::test]
    async fn feed_drop_and_reconnect_map_to_push_signals() {
        let (feed, events) = broadcast::channel(16);
        let (tx, mut rx) = mpsc::channel(SIGNAL_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(bridge_task(events, "equipment".into(), tx, cancel.clone()));

        feed.send(Arc::new(FeedEvent::Changed {
            path: "receipts".into(),
        }))
        .unwrap();
        feed.send(Arc::new(FeedEvent::Dropped {
            reason: "reset".into(),
        }))
        .unwrap();
        feed.send(Arc::new(FeedEvent::Reconnected)).unwrap();

        assert_eq!(rx.recv().await.unwrap(), PushSignal::Failed("reset".into()));
        assert_eq!(rx.recv().await.unwrap(), PushSignal::Changed);
        cancel.cancel();
    }

    fn client_for(server: &MockServer) -> RestClient {
        RestClient::new(Url::parse(&server.uri()).unwrap(), &TransportConfig::default()).unwrap()
    }
}
