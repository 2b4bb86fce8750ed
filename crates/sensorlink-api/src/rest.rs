// REST client for property access and command invocation.
//
// Every call is a single stateless request against
// `http://<device>/rest/<path>` and is independent of the socket. Failures
// surface immediately; there is no retry at this layer.

use std::time::Duration;

use serde_json::Value;
use tracing::Level;
use url::Url;

use crate::describe::Description;
use crate::error::Error;

/// Emit a tracing event at a level chosen at runtime.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {{
        let level = $level;
        if level == Level::ERROR {
            tracing::error!($($arg)+);
        } else if level == Level::WARN {
            tracing::warn!($($arg)+);
        } else if level == Level::INFO {
            tracing::info!($($arg)+);
        } else if level == Level::DEBUG {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    }};
}

const BODY_PREVIEW_CHARS: usize = 200;

/// Settings for building the REST client's `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Per-request timeout. `None` leaves timeouts to the caller.
    pub timeout: Option<Duration>,
    /// Level at which requests and responses are logged.
    pub log_level: Level,
    pub user_agent: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            log_level: Level::DEBUG,
            user_agent: concat!("sensorlink/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl RestConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent.as_str());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

/// HTTP client for one device's REST interface.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    log_level: Level,
}

impl RestClient {
    /// Create a client rooted at `base_url` (e.g. `http://10.0.0.7/rest/`).
    pub fn new(base_url: Url, config: &RestConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        let mut client = Self::with_client(http, base_url);
        client.log_level = config.log_level;
        Ok(client)
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http,
            base_url,
            log_level: Level::DEBUG,
        }
    }

    /// Client for the device at `address` (`host` or `host:port`).
    pub fn for_device(address: &str, config: &RestConfig) -> Result<Self, Error> {
        let base_url = Url::parse(&format!("http://{address}/rest/"))?;
        Self::new(base_url, config)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn log_level(&self) -> Level {
        self.log_level
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn url(&self, resource: &str) -> Result<Url, Error> {
        let full = format!("{}{}", self.base_url, resource.trim_start_matches('/'));
        Ok(Url::parse(&full)?)
    }

    fn property_url(&self, path: &str, name: &str) -> Result<Url, Error> {
        self.url(&format!("{path}.{name}"))
    }

    fn command_url(&self, path: &str, command: &str) -> Result<Url, Error> {
        self.url(&format!("{path}!{command}"))
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Read a property as the raw response text.
    pub async fn get_property(&self, path: &str, name: &str) -> Result<String, Error> {
        let url = self.property_url(path, name)?;
        log_at!(self.log_level, "GET {}", url);

        let resp = self.http.get(url.clone()).send().await?;
        self.read_body("GET", &url, resp).await
    }

    /// Write a property. The device answers with a boolean.
    pub async fn set_property(&self, path: &str, name: &str, value: &str) -> Result<bool, Error> {
        let url = self.property_url(path, name)?;
        log_at!(self.log_level, value, "POST {}", url);

        let resp = self
            .http
            .post(url.clone())
            .body(value.to_owned())
            .send()
            .await?;
        let body = self.read_body("POST", &url, resp).await?;

        if body.trim().is_empty() {
            return Ok(true);
        }
        parse_bool(&body)
    }

    /// Invoke a command and return its raw JSON result text.
    pub async fn execute_command(
        &self,
        path: &str,
        command: &str,
        params: &[Value],
    ) -> Result<String, Error> {
        let url = self.command_url(path, command)?;
        log_at!(self.log_level, params = ?params, "POST {}", url);

        let resp = self.http.post(url.clone()).json(params).send().await?;
        self.read_body("POST", &url, resp).await
    }

    /// Fetch the self-description of an object path.
    pub async fn describe(&self, path: &str) -> Result<Description, Error> {
        let mut url = self.url(path)?;
        url.query_pairs_mut().append_pair("help", "true");
        log_at!(self.log_level, "GET {}", url);

        let resp = self.http.get(url.clone()).send().await?;
        let body = self.read_body("GET", &url, resp).await?;

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// Collect the response text, turning non-2xx statuses into errors.
    async fn read_body(
        &self,
        method: &str,
        url: &Url,
        resp: reqwest::Response,
    ) -> Result<String, Error> {
        let status = resp.status();
        let body = resp.text().await?;

        log_at!(
            self.log_level,
            status = status.as_u16(),
            body = %preview(&body),
            "{} {} answered",
            method,
            url
        );

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        Ok(body)
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() > BODY_PREVIEW_CHARS {
        let head: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        body.to_owned()
    }
}

/// Parse a device boolean: `true`/`false` in any case, optionally quoted.
pub fn parse_bool(raw: &str) -> Result<bool, Error> {
    let text = raw.trim().trim_matches('"').trim();
    if text.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if text.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(Error::Format {
            raw: raw.to_owned(),
            target: "bool",
        })
    }
}
