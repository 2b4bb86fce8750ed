// Self-description document returned by `GET <path>?help=true`.
//
// Field names follow the device's JSON exactly; unknown keys are ignored so
// newer firmware does not break older clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything an object path exposes: properties, actions, and signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Description {
    pub properties: BTreeMap<String, PropertyDescription>,
    pub actions: BTreeMap<String, ActionDescription>,
    pub signals: BTreeMap<String, SignalDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyDescription {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub range: Option<Value>,
    /// Access mode, e.g. `"r"` or `"rw"`.
    pub mode: Option<String>,
    pub help: Option<String>,
}

impl PropertyDescription {
    pub fn is_writable(&self) -> bool {
        self.mode.as_deref().is_some_and(|m| m.contains('w'))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionDescription {
    pub args: Option<Value>,
    #[serde(rename = "return")]
    pub returns: Option<Value>,
    pub help: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalDescription {
    pub args: Option<Value>,
    pub help: Option<String>,
}
