//! Config subcommand handlers.

use tabled::Tabled;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, InitArgs};
use crate::config::{self, Profile};
use crate::error::CliError;
use crate::output;

#[derive(Clone, serde::Serialize, Tabled)]
struct ProfileRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Default")]
    default: String,
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let out = match global.output {
                crate::cli::OutputFormat::Json => output::render_json(&cfg, false)?,
                crate::cli::OutputFormat::JsonCompact => output::render_json(&cfg, true)?,
                _ => toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
                    field: "config".into(),
                    reason: format!("failed to serialize config: {e}"),
                })?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            let mut rows: Vec<ProfileRow> = cfg
                .profiles
                .iter()
                .map(|(name, profile)| ProfileRow {
                    name: name.clone(),
                    address: profile.address.clone(),
                    default: if cfg.default_profile.as_deref() == Some(name.as_str()) {
                        "*".into()
                    } else {
                        String::new()
                    },
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            let out = output::render_list(global.output, &rows, ProfileRow::clone, |r| {
                r.name.clone()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("default profile is now '{name}'");
            }
            Ok(())
        }

        ConfigCommand::Init(init) => init_profile(init, global),
    }
}

fn init_profile(args: InitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load_config().unwrap_or_default();
    if cfg.profiles.contains_key(&args.name) && !args.force {
        return Err(CliError::Validation {
            field: "name".into(),
            reason: format!("profile '{}' already exists (use --force to replace it)", args.name),
        });
    }

    let profile = Profile::new(args.address);
    // Reject unusable addresses before anything is written.
    config::profile_to_device_config(&profile, &cfg.defaults)?;

    if cfg.profiles.is_empty() {
        cfg.default_profile = Some(args.name.clone());
    }
    cfg.profiles.insert(args.name.clone(), profile);
    config::save_config(&cfg)?;

    if !global.quiet {
        eprintln!(
            "profile '{}' saved to {}",
            args.name,
            config::config_path().display()
        );
    }
    Ok(())
}
