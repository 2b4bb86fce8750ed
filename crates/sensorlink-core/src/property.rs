// ── Typed property bindings ──
//
// A property is an immutable `(object path, name, parse[, format])`
// binding over the REST client. Nothing is cached: every `value()` is a
// fresh GET, every `set()` a POST.

use std::any::type_name;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use sensorlink_api::RestClient;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoreError;

type Parser<T> = Arc<dyn Fn(&str) -> Result<T, CoreError> + Send + Sync>;
type Formatter<T> = Arc<dyn Fn(&T) -> Result<String, CoreError> + Send + Sync>;

/// Read-only property binding.
pub struct ReadProperty<T> {
    rest: RestClient,
    path: String,
    name: String,
    parse: Parser<T>,
}

impl<T> Clone for ReadProperty<T> {
    fn clone(&self) -> Self {
        Self {
            rest: self.rest.clone(),
            path: self.path.clone(),
            name: self.name.clone(),
            parse: Arc::clone(&self.parse),
        }
    }
}

impl<T> fmt::Debug for ReadProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadProperty")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("type", &type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T: 'static> ReadProperty<T> {
    /// Binding with a caller-supplied parser.
    pub fn with_parser<F>(
        rest: RestClient,
        path: impl Into<String>,
        name: impl Into<String>,
        parse: F,
    ) -> Self
    where
        F: Fn(&str) -> Result<T, CoreError> + Send + Sync + 'static,
    {
        Self {
            rest,
            path: path.into(),
            name: name.into(),
            parse: Arc::new(parse),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch and parse the current value.
    pub async fn value(&self) -> Result<T, CoreError> {
        let raw = self.rest.get_property(&self.path, &self.name).await?;
        (self.parse)(&raw)
    }
}

impl<T: FromStr + 'static> ReadProperty<T> {
    /// Binding parsed with `FromStr`. Surrounding whitespace and quotes are
    /// ignored.
    pub fn parsed(rest: RestClient, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_parser(rest, path, name, parse_scalar::<T>)
    }
}

impl<T: DeserializeOwned + 'static> ReadProperty<T> {
    /// Binding whose value is a JSON document.
    pub fn json(rest: RestClient, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_parser(rest, path, name, |raw| {
            serde_json::from_str(raw).map_err(|_| CoreError::Format {
                raw: raw.to_owned(),
                target: type_name::<T>().into(),
            })
        })
    }
}

impl ReadProperty<Option<String>> {
    /// String binding: `null` reads as `None`, surrounding quotes are
    /// stripped.
    pub fn string(rest: RestClient, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_parser(rest, path, name, |raw| Ok(normalize_string(raw)))
    }
}

/// Read/write property binding.
pub struct Property<T> {
    read: ReadProperty<T>,
    format: Formatter<T>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            read: self.read.clone(),
            format: Arc::clone(&self.format),
        }
    }
}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("path", &self.read.path)
            .field("name", &self.read.name)
            .field("type", &type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Property<T> {
    /// Writable binding from an existing reader and a formatter.
    pub fn with_format<F>(read: ReadProperty<T>, format: F) -> Self
    where
        F: Fn(&T) -> Result<String, CoreError> + Send + Sync + 'static,
    {
        Self {
            read,
            format: Arc::new(format),
        }
    }

    pub fn path(&self) -> &str {
        &self.read.path
    }

    pub fn name(&self) -> &str {
        &self.read.name
    }

    pub async fn value(&self) -> Result<T, CoreError> {
        self.read.value().await
    }

    /// Format and write `value`. Returns the device's boolean answer.
    pub async fn set(&self, value: &T) -> Result<bool, CoreError> {
        let raw = (self.format)(value)?;
        Ok(self
            .read
            .rest
            .set_property(&self.read.path, &self.read.name, &raw)
            .await?)
    }

    /// Read-only view of this property.
    pub fn reader(&self) -> &ReadProperty<T> {
        &self.read
    }
}

impl<T: FromStr + Display + 'static> Property<T> {
    /// Binding parsed with `FromStr` and written with `Display`.
    pub fn parsed(rest: RestClient, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_format(ReadProperty::parsed(rest, path, name), |v| Ok(v.to_string()))
    }
}

impl<T: Serialize + DeserializeOwned + 'static> Property<T> {
    /// Binding whose value is read and written as JSON.
    pub fn json(rest: RestClient, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_format(ReadProperty::json(rest, path, name), |v| {
            serde_json::to_string(v).map_err(|e| CoreError::Internal(e.to_string()))
        })
    }
}

impl Property<Option<String>> {
    /// String binding; `None` is written as `null`.
    pub fn string(rest: RestClient, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_format(ReadProperty::string(rest, path, name), |v| {
            Ok(v.clone().unwrap_or_else(|| "null".into()))
        })
    }
}

// ── Parsing helpers ──────────────────────────────────────────────────

fn parse_scalar<T: FromStr>(raw: &str) -> Result<T, CoreError> {
    let text = raw.trim();
    let text = strip_quotes(text);
    text.parse().map_err(|_| CoreError::Format {
        raw: raw.to_owned(),
        target: type_name::<T>().into(),
    })
}

fn strip_quotes(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

/// `null` becomes `None`; one pair of surrounding quotes is removed.
pub fn normalize_string(raw: &str) -> Option<String> {
    let text = raw.trim();
    if text == "null" {
        return None;
    }
    Some(strip_quotes(text).to_owned())
}
