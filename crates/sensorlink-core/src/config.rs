// ── Runtime device configuration ──
//
// Describes *how* to reach one device. Never touches disk: the CLI (or
// any other host) builds a `DeviceConfig` and hands it in.

use std::time::Duration;

use sensorlink_api::{ReconnectConfig, RestConfig, SocketConfig};
use tracing::Level;
use url::Url;

use crate::error::CoreError;

/// Connection settings for a single device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// `host` or `host:port`, shared by the socket and the REST interface.
    pub address: String,
    /// Path of the socket endpoint. Default: `/socket`.
    pub socket_path: String,
    /// Websocket sub-protocol sent in the upgrade request. Default: `json`.
    pub subprotocol: String,
    /// Keep-alive ping interval. `Duration::ZERO` disables pings.
    pub keepalive: Duration,
    /// Grace period for `disconnect()` before the socket is forced closed.
    pub close_grace: Duration,
    pub reconnect: ReconnectConfig,
    /// REST request timeout. `None` means no internal timeout.
    pub rest_timeout: Option<Duration>,
    /// Level at which REST requests and responses are logged.
    pub rest_log_level: Level,
}

impl DeviceConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn socket_url(&self) -> Result<Url, CoreError> {
        let path = if self.socket_path.starts_with('/') {
            self.socket_path.clone()
        } else {
            format!("/{}", self.socket_path)
        };
        parse_url(&format!("ws://{}{path}", self.address))
    }

    pub fn rest_url(&self) -> Result<Url, CoreError> {
        parse_url(&format!("http://{}/rest/", self.address))
    }

    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            keepalive: self.keepalive,
            close_grace: self.close_grace,
            reconnect: self.reconnect.clone(),
        }
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            timeout: self.rest_timeout,
            log_level: self.rest_log_level,
            ..RestConfig::default()
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "192.168.1.1".into(),
            socket_path: "/socket".into(),
            subprotocol: sensorlink_api::websocket::DEFAULT_SUBPROTOCOL.into(),
            keepalive: Duration::from_secs(10),
            close_grace: Duration::from_millis(500),
            reconnect: ReconnectConfig::default(),
            rest_timeout: None,
            rest_log_level: Level::DEBUG,
        }
    }
}

fn parse_url(raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|e| CoreError::Config {
        message: format!("invalid device URL {raw:?}: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn urls_derive_from_address() {
        let config = DeviceConfig::new("10.0.0.7:8080");
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://10.0.0.7:8080/socket");
        assert_eq!(config.rest_url().unwrap().as_str(), "http://10.0.0.7:8080/rest/");
    }

    #[test]
    fn socket_path_without_leading_slash() {
        let config = DeviceConfig {
            socket_path: "ws".into(),
            ..DeviceConfig::new("dev.local")
        };
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://dev.local/ws");
    }

    #[test]
    fn bad_address_is_config_error() {
        let config = DeviceConfig::new("bad host");
        assert!(matches!(config.rest_url(), Err(CoreError::Config { .. })));
    }
}
