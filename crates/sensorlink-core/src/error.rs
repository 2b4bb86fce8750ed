// ── Core error types ──
//
// Caller-facing errors from sensorlink-core. Wire-level failures arrive as
// `sensorlink_api::Error` and are translated by the `From` impl below.
// Cloneable so that one subscribe failure can be handed to every waiter.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device at {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Device socket is not connected")]
    Disconnected,

    /// The socket went away while a subscribe was in flight.
    #[error("Socket closed or replaced before {path} was acknowledged")]
    Reconnected { path: String },

    // ── Signal errors ────────────────────────────────────────────────
    #[error("Signal {path} has no listeners")]
    NotSubscribed { path: String },

    #[error("Signal {path} is already registered with a different value type")]
    SignalTypeMismatch { path: String },

    // ── Device / data errors ─────────────────────────────────────────
    /// Error envelope reported by the device.
    #[error("Device error {code}: {message}")]
    Device {
        code: i64,
        message: String,
        /// The outgoing request text, when it was still tracked.
        request: Option<String>,
    },

    #[error("Cannot parse {raw:?} as {target}")]
    Format { raw: String, target: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    // ── REST errors ──────────────────────────────────────────────────
    #[error("REST call to {url} failed with HTTP {status}: {body}")]
    Rest {
        status: u16,
        url: String,
        body: String,
    },

    #[error("API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The device-supplied message for device-reported errors.
    pub fn device_message(&self) -> Option<&str> {
        match self {
            Self::Device { message, .. } => Some(message),
            _ => None,
        }
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<sensorlink_api::Error> for CoreError {
    fn from(err: sensorlink_api::Error) -> Self {
        use sensorlink_api::Error as Api;

        match err {
            Api::Transport(ref e) if e.is_connect() || e.is_timeout() => {
                CoreError::ConnectionFailed {
                    address: e
                        .url()
                        .and_then(|u| u.host_str().map(str::to_owned))
                        .unwrap_or_else(|| "<unknown>".into()),
                    reason: e.to_string(),
                }
            }
            Api::Transport(e) => CoreError::Api {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Http { status, url, body } => CoreError::Rest { status, url, body },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                address: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            Api::WebSocketIo(reason) => CoreError::ConnectionFailed {
                address: String::new(),
                reason: format!("WebSocket I/O error: {reason}"),
            },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                address: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            Api::NotConnected => CoreError::Disconnected,
            Api::Device {
                code,
                message,
                request,
                ..
            } => CoreError::Device {
                code,
                message,
                request,
            },
            Api::Deserialization { message, body: _ } => CoreError::Decode { message },
            Api::Serialization(e) => CoreError::Internal(format!("Serialization error: {e}")),
            Api::Format { raw, target } => CoreError::Format {
                raw,
                target: target.into(),
            },
        }
    }
}
