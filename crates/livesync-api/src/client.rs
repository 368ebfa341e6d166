// REST client for the pull and write endpoints
//
// Wraps `reqwest::Client` with resource URL construction and status
// classification. Reads return the decoded JSON body; writes only care
// whether the server acknowledged them.

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Header carrying the client-generated id of a write, so a replayed
/// write is applied at most once by the server.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Upper bound on how much of an error body is kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for an operations platform's REST surface.
///
/// Cheaply cloneable; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    /// Create a client for `base_url` from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The endpoint base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{path}` without `Url::join`'s last-segment replacement.
    pub fn resource_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// GET a resource snapshot and decode its JSON body.
    pub async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.resource_url(path)?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await?;
        let resp = check_status(resp).await?;

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: truncate(body),
        })
    }

    /// POST a write intent. Success means the server acknowledged it.
    pub async fn send(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
        idempotency_key: &str,
    ) -> Result<(), Error> {
        let url = self.resource_url(path)?;
        debug!(idempotency_key, "POST {}", url);

        let resp = self
            .http
            .post(url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Classify a non-success status into the matching error variant.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        trace!(status = status.as_u16(), "request ok");
        return Ok(resp);
    }

    let retry_after_secs = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1);
    let message = truncate(resp.text().await.unwrap_or_default());
    let code = status.as_u16();

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Authentication {
            status: code,
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after_secs },
        StatusCode::REQUEST_TIMEOUT => Error::Timeout { timeout_secs: 0 },
        s if s.is_server_error() => Error::Server {
            status: code,
            message,
        },
        _ => Error::Rejected {
            status: code,
            message,
        },
    })
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
