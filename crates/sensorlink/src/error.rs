//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use sensorlink_config::ConfigError;
use sensorlink_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const NOT_CONFORMANT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to device at {address}")]
    #[diagnostic(
        code(sensorlink::connection_failed),
        help(
            "Check that the device is powered and reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { address: String, reason: String },

    #[error("No device configured")]
    #[diagnostic(
        code(sensorlink::no_device),
        help(
            "Pass --device <host[:port]>, or create a profile with:\n  \
             sensorlink config init <address>\n\
             Config file: {path}"
        )
    )]
    NoDevice { path: String },

    // ── Device ───────────────────────────────────────────────────────
    #[error("Device error {code}: {message}")]
    #[diagnostic(code(sensorlink::device))]
    Device { code: i64, message: String },

    #[error("'{target}' not found on the device")]
    #[diagnostic(
        code(sensorlink::not_found),
        help("Run: sensorlink describe <path> to see what an object exposes")
    )]
    NotFound { target: String },

    #[error("HTTP {status} from {url}: {body}")]
    #[diagnostic(code(sensorlink::http))]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Device refused to set {path}.{name}")]
    #[diagnostic(
        code(sensorlink::rejected),
        help("The value may be out of range or the property read-only.")
    )]
    Rejected { path: String, name: String },

    #[error("{path} does not match the expected names")]
    #[diagnostic(code(sensorlink::not_conformant))]
    NotConformant { path: String },

    #[error("Cannot parse {raw:?} as {target}")]
    #[diagnostic(code(sensorlink::format))]
    Format { raw: String, target: String },

    #[error("{message}")]
    #[diagnostic(code(sensorlink::core))]
    Core { message: String },

    // ── Validation / configuration ───────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(sensorlink::validation))]
    Validation { field: String, reason: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(sensorlink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: sensorlink config init <address> --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(sensorlink::config))]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(sensorlink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected { .. } | Self::Device { .. } => exit_code::REJECTED,
            Self::NotConformant { .. } => exit_code::NOT_CONFORMANT,
            Self::Validation { .. } | Self::NoDevice { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::NoDevice => CliError::NoDevice {
                path: sensorlink_config::config_path().display().to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { address, reason } => {
                CliError::ConnectionFailed { address, reason }
            }

            CoreError::Disconnected | CoreError::Reconnected { .. } => {
                CliError::ConnectionFailed {
                    address: "(disconnected)".into(),
                    reason: err.to_string(),
                }
            }

            CoreError::Device { code, message, .. } => CliError::Device { code, message },

            CoreError::Rest { status: 404, url, .. } => CliError::NotFound { target: url },

            CoreError::Rest { status, url, body } => CliError::Http { status, url, body },

            CoreError::Format { raw, target } => CliError::Format { raw, target },

            CoreError::Config { message } => CliError::Validation {
                field: "device".into(),
                reason: message,
            },

            other => CliError::Core {
                message: other.to_string(),
            },
        }
    }
}
