//! Flag-aware wrappers around `livesync_config`.
//!
//! This is the single boundary where CLI flags meet profile settings and
//! become a `ControllerConfig`.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use livesync_config::{Config, Defaults, Profile};
use livesync_core::{ControllerConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(livesync_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(livesync_config::load_config_from(&config_path(global))?)
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// Build a `ControllerConfig` from the config file, profile, and flags.
pub fn build_controller_config(global: &GlobalOpts) -> Result<ControllerConfig, CliError> {
    let cfg = load_config(global)?;
    let profile_name = active_profile_name(global, &cfg);

    let mut config = match cfg.profiles.get(&profile_name) {
        Some(profile) => {
            livesync_config::profile_to_controller_config(profile, &profile_name, &cfg.defaults)?
        }
        None if global.profile.is_some() => {
            let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
            available.sort();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available.join(", "),
            });
        }
        // No profile on disk: flags and env alone.
        None => {
            let raw = global.endpoint.as_deref().ok_or_else(|| CliError::NoConfig {
                path: config_path(global).display().to_string(),
            })?;
            let scratch = Profile {
                endpoint: raw.to_owned(),
                ..Profile::default()
            };
            livesync_config::profile_to_controller_config(
                &scratch,
                &profile_name,
                &Defaults::default(),
            )?
        }
    };

    apply_overrides(&mut config, global)?;
    Ok(config)
}

/// Flags beat everything the profile says.
fn apply_overrides(config: &mut ControllerConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(ref raw) = global.endpoint {
        config.endpoint = parse_url("endpoint", raw)?;
    }
    if let Some(ref raw) = global.push_url {
        config.push_url = Some(parse_url("push_url", raw)?);
    }
    if let Some(ref token) = global.token {
        config.bearer = Some(SecretString::from(token.clone()));
    }
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    Ok(())
}
