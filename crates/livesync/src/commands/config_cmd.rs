//! Config subcommand handlers.

use livesync_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output;

const MASK: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path(global).display().to_string(), false);
            Ok(())
        }

        ConfigCommand::Show => {
            let mut cfg = config::load_config(global)?;
            for profile in cfg.profiles.values_mut() {
                if profile.token.is_some() {
                    profile.token = Some(MASK.into());
                }
            }
            let rendered = match global.output {
                OutputFormat::Table | OutputFormat::Plain => {
                    toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
                        field: "config".into(),
                        reason: e.to_string(),
                    })?
                }
                format => output::render_single(format, &cfg, |_| String::new())?,
            };
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { token_env, default } => {
            let endpoint = global.endpoint.clone().ok_or_else(|| CliError::Validation {
                field: "endpoint".into(),
                reason: "pass --endpoint".into(),
            })?;
            let urls = [
                ("endpoint", Some(&endpoint)),
                ("push_url", global.push_url.as_ref()),
            ];
            for (field, raw) in urls {
                if let Some(raw) = raw {
                    raw.parse::<url::Url>().map_err(|_| CliError::Validation {
                        field: field.into(),
                        reason: format!("invalid URL: {raw}"),
                    })?;
                }
            }

            let path = config::config_path(global);
            let mut cfg: Config = config::load_config(global)?;
            let name = global.profile.clone().unwrap_or_else(|| "default".into());

            cfg.profiles.insert(
                name.clone(),
                Profile {
                    endpoint,
                    push_url: global.push_url.clone(),
                    token_env,
                    ..Profile::default()
                },
            );
            if default || cfg.profiles.len() == 1 {
                cfg.default_profile = Some(name.clone());
            }

            livesync_config::save_config_to(&cfg, &path)?;
            if !global.quiet {
                eprintln!("Profile '{name}' written to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::SetToken => {
            let token = global.token.as_deref().ok_or_else(|| CliError::Validation {
                field: "token".into(),
                reason: "pass --token or set LIVESYNC_TOKEN".into(),
            })?;
            let cfg = config::load_config(global)?;
            let name = config::active_profile_name(global, &cfg);
            livesync_config::store_token(&name, token)?;
            if !global.quiet {
                eprintln!("Token for profile '{name}' stored in the system keyring");
            }
            Ok(())
        }
    }
}
