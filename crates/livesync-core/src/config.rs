// ── Runtime engine configuration ──
//
// These types describe *how* to reach the platform and how fresh each
// resource must be kept. They never touch disk: the CLI (or any embedder)
// constructs a `ControllerConfig` and hands it in.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use livesync_api::{ReconnectConfig, TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed development servers).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

/// Freshness and cadence windows for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePolicy {
    /// A cached snapshot younger than this is served without a fetch.
    pub max_age: Duration,
    /// Quiet period before a burst of change signals triggers a refresh.
    pub debounce: Duration,
    /// Regular polling cadence while the push subscription is healthy.
    pub poll_interval: Duration,
    /// Polling cadence once the push subscription has dropped.
    pub fallback_poll_interval: Duration,
    /// Ceiling on how long a view may stay in the loading state.
    pub loading_timeout: Duration,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60),
            debounce: Duration::from_secs(1),
            poll_interval: Duration::from_secs(30),
            fallback_poll_interval: Duration::from_secs(10),
            loading_timeout: Duration::from_secs(8),
        }
    }
}

/// A named resource: where to pull it from and how fresh to keep it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Path relative to the endpoint, also used as the push topic.
    pub path: String,
    pub policy: ResourcePolicy,
}

/// Capped exponential backoff for queue retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// `initial * 2^attempt`, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Everything the [`Controller`](crate::Controller) needs to run.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base URL of the REST endpoint (e.g. `https://ops.example.com/api`).
    pub endpoint: Url,
    /// Change-feed WebSocket URL. `None` runs polling-only.
    pub push_url: Option<Url>,
    /// Opaque bearer credential. Resolved externally.
    pub bearer: Option<SecretString>,
    pub tls: TlsVerification,
    /// Transport timeout, independent of the loading watchdog.
    pub timeout: Duration,
    /// Directory for the durable write queue. `None` keeps it in memory.
    pub queue_dir: Option<PathBuf>,
    /// Policy for resources without a named entry.
    pub default_policy: ResourcePolicy,
    pub resources: BTreeMap<String, ResourceSpec>,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectConfig,
}

impl ControllerConfig {
    /// Defaults for everything except the endpoint.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            push_url: None,
            bearer: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            queue_dir: None,
            default_policy: ResourcePolicy::default(),
            resources: BTreeMap::new(),
            retry: RetryPolicy::default(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Resolve a resource by name, falling back to treating `name` as a
    /// path with the default policy.
    pub fn resource(&self, name: &str) -> ResourceSpec {
        self.resources.get(name).cloned().unwrap_or_else(|| ResourceSpec {
            path: name.trim_matches('/').to_owned(),
            policy: self.default_policy,
        })
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            timeout: self.timeout,
            bearer: self.bearer.clone(),
        }
    }
}
