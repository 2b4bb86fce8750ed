use thiserror::Error;

/// Top-level error type for the `sensorlink-api` crate.
///
/// Covers every failure mode across both device surfaces:
/// HTTP transport, the persistent socket, device-reported errors, and data.
/// `sensorlink-core` maps these into caller-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The REST interface answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    // ── Socket ──────────────────────────────────────────────────────
    /// WebSocket handshake failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Read or write failure on an established socket.
    #[error("WebSocket I/O error: {0}")]
    WebSocketIo(String),

    /// WebSocket closed by the device or dropped without a close frame.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// No socket is installed (never connected, or torn down mid-reconnect).
    #[error("Socket is not connected")]
    NotConnected,

    // ── Device ──────────────────────────────────────────────────────
    /// Error envelope pushed by the device (`{"error": N, "message": ...}`).
    ///
    /// `request` holds the outgoing message text for `id` when it was
    /// still tracked at the time the error arrived.
    #[error("Device error {code}: {message}")]
    Device {
        code: i64,
        message: String,
        id: Option<u64>,
        request: Option<String>,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (or UTF-8) decoding failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Outgoing payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A scalar response could not be parsed as the expected type.
    #[error("Cannot parse {raw:?} as {target}")]
    Format { raw: String, target: &'static str },
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocketIo(err.to_string())
    }
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_)
            | Self::WebSocketIo(_)
            | Self::WebSocketClosed { .. }
            | Self::NotConnected => true,
            _ => false,
        }
    }

    /// The device-supplied error message, if this error came from the device.
    pub fn device_message(&self) -> Option<&str> {
        match self {
            Self::Device { message, .. } => Some(message),
            _ => None,
        }
    }

    /// HTTP status for REST failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
