//! CLI configuration: thin wrapper around `sensorlink_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (`--device`, `--timeout`).

use std::time::Duration;

use sensorlink_core::DeviceConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use sensorlink_config::{
    Config, Profile, config_path, load_config, profile_to_device_config, save_config,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the `DeviceConfig` for this invocation.
///
/// `--device` overrides the profile's address; without a profile it is
/// used on its own with the global defaults.
pub fn resolve_device(global: &GlobalOpts, config: &Config) -> Result<DeviceConfig, CliError> {
    let profile_name = active_profile_name(global, config);

    let mut profile = match config.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available_profiles(config),
            });
        }
        None => {
            let address = global.device.clone().ok_or_else(|| CliError::NoDevice {
                path: config_path().display().to_string(),
            })?;
            Profile::new(address)
        }
    };

    if let Some(ref device) = global.device {
        profile.address.clone_from(device);
    }

    let mut device = profile_to_device_config(&profile, &config.defaults)?;
    if let Some(secs) = global.timeout {
        device.rest_timeout = Some(Duration::from_secs(secs));
    }
    tracing::debug!(profile = %profile_name, address = %device.address, "resolved device");
    Ok(device)
}

/// Comma-separated profile names for help text.
pub fn available_profiles(config: &Config) -> String {
    let mut names: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}
