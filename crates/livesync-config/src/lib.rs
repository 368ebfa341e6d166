//! Shared configuration for livesync tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `livesync_core::ControllerConfig`. The CLI adds
//! flag-aware wrappers on top.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use livesync_core::{ControllerConfig, ResourcePolicy, ResourceSpec, TlsVerification};

/// Keyring service name; entries are `<profile>/token`.
const KEYRING_SERVICE: &str = "livesync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named endpoint profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, p)| (k.as_str(), p))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Freshness and cadence windows for every resource.
    #[serde(default, flatten)]
    pub policy: PolicySettings,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            policy: PolicySettings::default(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// Optional overrides of a [`ResourcePolicy`]. Unset fields inherit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PolicySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_timeout_secs: Option<u64>,
}

impl PolicySettings {
    /// Overlay the set fields onto `base`.
    pub fn apply(&self, base: ResourcePolicy) -> ResourcePolicy {
        ResourcePolicy {
            max_age: self.max_age_secs.map_or(base.max_age, Duration::from_secs),
            debounce: self.debounce_ms.map_or(base.debounce, Duration::from_millis),
            poll_interval: self
                .poll_interval_secs
                .map_or(base.poll_interval, Duration::from_secs),
            fallback_poll_interval: self
                .fallback_poll_interval_secs
                .map_or(base.fallback_poll_interval, Duration::from_secs),
            loading_timeout: self
                .loading_timeout_secs
                .map_or(base.loading_timeout, Duration::from_secs),
        }
    }
}

/// A named endpoint profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// REST endpoint base URL (e.g., "https://ops.example.com/api").
    pub endpoint: String,

    /// Change-feed WebSocket URL. Omit for polling-only.
    pub push_url: Option<String>,

    /// Bearer token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the bearer token.
    pub token_env: Option<String>,

    /// Where the offline write queue is persisted.
    pub queue_dir: Option<PathBuf>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Profile-wide policy overrides.
    #[serde(default, flatten)]
    pub policy: PolicySettings,

    /// Named resources with their own path and policy.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSettings>,
}

/// A named resource within a profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResourceSettings {
    /// Path relative to the endpoint. Defaults to the resource name.
    pub path: Option<String>,

    #[serde(default, flatten)]
    pub policy: PolicySettings,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "livesync", "livesync")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default directory for the durable write queue of `profile_name`.
pub fn default_queue_dir(profile_name: &str) -> PathBuf {
    let base = project_dirs().map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("data");
            p
        },
        |dirs| dirs.data_dir().to_path_buf(),
    );
    base.join("queue").join(profile_name)
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("livesync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from `path` (missing file = defaults), then `LIVESYNC_*` env.
///
/// Nested keys use a double underscore: `LIVESYNC_DEFAULTS__TIMEOUT=5`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LIVESYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// Resolve the bearer token from the credential chain (no CLI flag step).
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a bearer token for `profile_name` in the system keyring.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))?;
    entry.set_password(token)?;
    Ok(())
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// Build a `ControllerConfig` from a profile, without CLI flag overrides.
///
/// A missing credential is not an error here: the endpoint may be open.
pub fn profile_to_controller_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ControllerConfig, ConfigError> {
    let endpoint = parse_url("endpoint", &profile.endpoint)?;
    let push_url = profile
        .push_url
        .as_deref()
        .map(|raw| parse_url("push_url", raw))
        .transpose()?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let default_policy = profile
        .policy
        .apply(defaults.policy.apply(ResourcePolicy::default()));

    let resources = profile
        .resources
        .iter()
        .map(|(name, settings)| {
            let spec = ResourceSpec {
                path: settings
                    .path
                    .clone()
                    .unwrap_or_else(|| name.clone())
                    .trim_matches('/')
                    .to_owned(),
                policy: settings.policy.apply(default_policy),
            };
            (name.clone(), spec)
        })
        .collect();

    let mut config = ControllerConfig::new(endpoint);
    config.push_url = push_url;
    config.bearer = resolve_token(profile, profile_name).ok();
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.queue_dir = Some(
        profile
            .queue_dir
            .clone()
            .unwrap_or_else(|| default_queue_dir(profile_name)),
    );
    config.default_policy = default_policy;
    config.resources = resources;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "ops"

[defaults]
timeout = 12
max_age_secs = 45

[profiles.ops]
endpoint = "https://ops.example.com/api"
push_url = "wss://ops.example.com/changes"
token = "plain-token"
debounce_ms = 750

[profiles.ops.resources.attendance]
path = "/attendance/today/"
max_age_secs = 30

[profiles.ops.resources.receipts]
"#;

    fn load_sample() -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        load_config_from(&path).unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert_eq!(config.defaults.output, "table");
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn profile_translates_to_controller_config() {
        let config = load_sample();
        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "ops");

        let ctrl = profile_to_controller_config(profile, name, &config.defaults).unwrap();
        assert_eq!(ctrl.endpoint.as_str(), "https://ops.example.com/api");
        assert_eq!(ctrl.push_url.unwrap().scheme(), "wss");
        assert_eq!(ctrl.timeout, Duration::from_secs(12));
        assert_eq!(ctrl.tls, TlsVerification::SystemDefaults);

        // defaults → profile → resource layering
        assert_eq!(ctrl.default_policy.max_age, Duration::from_secs(45));
        assert_eq!(ctrl.default_policy.debounce, Duration::from_millis(750));
        let attendance = &ctrl.resources["attendance"];
        assert_eq!(attendance.path, "attendance/today");
        assert_eq!(attendance.policy.max_age, Duration::from_secs(30));
        assert_eq!(attendance.policy.debounce, Duration::from_millis(750));
        assert_eq!(ctrl.resources["receipts"].path, "receipts");
    }

    #[test]
    fn unset_token_env_falls_through_to_plaintext() {
        let profile = Profile {
            endpoint: "https://ops.example.com".into(),
            token: Some("plain".into()),
            token_env: Some("LIVESYNC_TEST_TOKEN_NEVER_SET".into()),
            ..Profile::default()
        };
        let token = resolve_token(&profile, "livesync-test-nonexistent").unwrap();
        assert_eq!(token.expose_secret(), "plain");
    }

    #[test]
    fn missing_credentials_are_reported() {
        let profile = Profile {
            endpoint: "https://ops.example.com".into(),
            ..Profile::default()
        };
        let err = resolve_token(&profile, "livesync-test-nonexistent").unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));
    }

    #[test]
    fn invalid_endpoint_is_a_validation_error() {
        let profile = Profile {
            endpoint: "not a url".into(),
            ..Profile::default()
        };
        let err = profile_to_controller_config(&profile, "x", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "endpoint"));
    }

    #[test]
    fn unknown_profile_is_reported() {
        let config = load_sample();
        assert!(matches!(
            config.profile(Some("staging")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                endpoint: "https://ops.example.com".into(),
                token_env: Some("OPS_TOKEN".into()),
                ..Profile::default()
            },
        );
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let (_, profile) = loaded.profile(None).unwrap();
        assert_eq!(profile.token_env.as_deref(), Some("OPS_TOKEN"));
    }
}
