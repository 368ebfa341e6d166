// livesync-api: Async clients for an operations platform's pull endpoint,
// write endpoint, and change-notification feed.

pub mod client;
pub mod error;
pub mod transport;
pub mod websocket;

pub use client::{IDEMPOTENCY_HEADER, RestClient};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{ChangeFeedHandle, FeedEvent, ReconnectConfig};
