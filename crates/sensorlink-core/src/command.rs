// ── Typed command invocation ──

use sensorlink_api::RestClient;
use sensorlink_api::rest::parse_bool;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CoreError;

/// A named action on an object path, invoked over REST.
#[derive(Debug, Clone)]
pub struct Command {
    rest: RestClient,
    path: String,
    name: String,
}

impl Command {
    pub fn new(rest: RestClient, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rest,
            path: path.into(),
            name: name.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke and return the raw result text.
    pub async fn execute_raw(&self, params: &[Value]) -> Result<String, CoreError> {
        Ok(self
            .rest
            .execute_command(&self.path, &self.name, params)
            .await?)
    }

    /// Invoke and parse the result as a boolean.
    pub async fn execute_bool(&self, params: &[Value]) -> Result<bool, CoreError> {
        let raw = self.execute_raw(params).await?;
        Ok(parse_bool(&raw)?)
    }

    /// Invoke and JSON-decode the result.
    pub async fn execute<T: DeserializeOwned>(&self, params: &[Value]) -> Result<T, CoreError> {
        let raw = self.execute_raw(params).await?;
        serde_json::from_str(&raw).map_err(|_| CoreError::Format {
            raw,
            target: std::any::type_name::<T>().into(),
        })
    }
}
