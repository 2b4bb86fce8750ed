//! Shared configuration for the sensorlink CLI.
//!
//! TOML device profiles, layered with environment overrides, and their
//! translation to `sensorlink_core::DeviceConfig`. The CLI adds flag-aware
//! resolution on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sensorlink_core::{DeviceConfig, ReconnectConfig};

/// Prefix of environment overrides; nested keys are separated by `__`,
/// e.g. `SENSORLINK_PROFILES__WRIST__ADDRESS`.
pub const ENV_PREFIX: &str = "SENSORLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found in config")]
    UnknownProfile { name: String },

    #[error("no device address given and no profile configured")]
    NoDevice,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

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
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
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

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// REST timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Socket keep-alive interval in seconds; 0 disables pings.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            keepalive: default_keepalive(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_keepalive() -> u64 {
    10
}

/// A named device profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// `host` or `host:port` of the device.
    pub address: String,

    /// Socket endpoint path (default `/socket`).
    pub socket_path: Option<String>,

    /// Websocket sub-protocol (default `json`).
    pub subprotocol: Option<String>,

    /// Override the keep-alive interval, in seconds.
    pub keepalive: Option<u64>,

    /// Override the REST timeout, in seconds.
    pub timeout: Option<u64>,

    /// Give up after this many failed reconnect attempts.
    pub max_retries: Option<u32>,

    /// First reconnect delay, in milliseconds.
    pub reconnect_delay_ms: Option<u64>,

    /// Reconnect delay ceiling, in milliseconds.
    pub reconnect_max_delay_ms: Option<u64>,
}

impl Profile {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "sensorlink", "sensorlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("sensorlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment. A missing file is not
/// an error; the defaults apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

impl Config {
    /// The named profile, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = match name.or(self.default_profile.as_deref()) {
            Some(name) => name,
            None => return Err(ConfigError::NoDevice),
        };
        self.profiles
            .get(name)
            .map(|p| (name.to_owned(), p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_owned(),
            })
    }
}

/// Build a `DeviceConfig` from a profile and the global defaults.
pub fn profile_to_device_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<DeviceConfig, ConfigError> {
    let address = profile.address.trim();
    if address.is_empty() {
        return Err(ConfigError::Validation {
            field: "address".into(),
            reason: "must not be empty".into(),
        });
    }
    if address.contains("://") {
        return Err(ConfigError::Validation {
            field: "address".into(),
            reason: format!("expected host or host:port, got '{address}'"),
        });
    }

    let mut config = DeviceConfig::new(address);
    if let Some(ref path) = profile.socket_path {
        config.socket_path.clone_from(path);
    }
    if let Some(ref subprotocol) = profile.subprotocol {
        config.subprotocol.clone_from(subprotocol);
    }
    config.keepalive = Duration::from_secs(profile.keepalive.unwrap_or(defaults.keepalive));
    config.rest_timeout = Some(Duration::from_secs(
        profile.timeout.unwrap_or(defaults.timeout),
    ));

    let base = ReconnectConfig::default();
    config.reconnect = ReconnectConfig {
        initial_delay: profile
            .reconnect_delay_ms
            .map_or(base.initial_delay, Duration::from_millis),
        max_delay: profile
            .reconnect_max_delay_ms
            .map_or(base.max_delay, Duration::from_millis),
        max_retries: profile.max_retries.or(base.max_retries),
    };

    config.socket_url().map_err(|e| ConfigError::Validation {
        field: "address".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn profile_overrides_defaults() {
        let profile = Profile {
            socket_path: Some("/ws".into()),
            keepalive: Some(0),
            max_retries: Some(4),
            reconnect_delay_ms: Some(250),
            ..Profile::new("10.0.0.7:8080")
        };
        let config = profile_to_device_config(&profile, &Defaults::default()).unwrap();

        assert_eq!(config.socket_url().unwrap().as_str(), "ws://10.0.0.7:8080/ws");
        assert_eq!(config.keepalive, Duration::ZERO);
        assert_eq!(config.rest_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_retries, Some(4));
        assert_eq!(config.subprotocol, "json");
    }

    #[test]
    fn rejects_urls_and_empty_addresses() {
        let defaults = Defaults::default();
        assert!(matches!(
            profile_to_device_config(&Profile::new("ws://dev.local"), &defaults),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            profile_to_device_config(&Profile::new("  "), &defaults),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn profile_lookup() {
        let mut config = Config::default();
        config
            .profiles
            .insert("default".into(), Profile::new("192.168.4.1"));
        config.profiles.insert("lab".into(), Profile::new("lab.local"));

        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile.address, "192.168.4.1");

        let (_, lab) = config.profile(Some("lab")).unwrap();
        assert_eq!(lab.address, "lab.local");

        assert!(matches!(
            config.profile(Some("missing")),
            Err(ConfigError::UnknownProfile { .. })
        ));

        config.default_profile = None;
        assert!(matches!(config.profile(None), Err(ConfigError::NoDevice)));
    }
}
