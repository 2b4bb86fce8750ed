//! JSON envelopes exchanged over the device socket.
//!
//! Outgoing requests always carry a client-assigned `id`. Incoming
//! messages are either acknowledgements (correlated by `id`), push events
//! (correlated by the device-assigned `signal` id), or failures.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

// ── Outgoing ─────────────────────────────────────────────────────────

/// Request method on the socket protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

/// `{"path":"//<path>","id":<id>,"method":"GET"|"POST","body":<json>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub path: String,
    pub id: u64,
    pub method: Method,
    pub body: Value,
}

impl OutboundMessage {
    /// Build an envelope for `path` (without the leading `//`).
    pub fn new(path: &str, id: u64, method: Method, params: &[Value]) -> Self {
        Self {
            path: format!("//{path}"),
            id,
            method,
            body: encode_body(params),
        }
    }
}

/// `null` for no params, the bare value for one, an array for several.
pub fn encode_body(params: &[Value]) -> Value {
    match params {
        [] => Value::Null,
        [single] => single.clone(),
        many => Value::Array(many.to_vec()),
    }
}

// ── Incoming ─────────────────────────────────────────────────────────

/// Raw envelope as decoded from a reassembled socket message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundMessage {
    pub id: Option<u64>,
    pub signal: Option<u64>,
    pub error: Option<i64>,
    pub message: Option<String>,
    pub body: Option<Value>,
}

/// Routing decision for an [`InboundMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Non-null `error`, whatever else is set.
    Failure {
        id: Option<u64>,
        code: i64,
        message: String,
    },
    /// `id` present, no `signal`: answer to a request.
    Ack { id: u64, body: Option<Value> },
    /// `signal` present: push event for an active subscription.
    Event { signal: u64, body: Value },
    /// Neither id nor signal; nothing to correlate against.
    Unroutable,
}

impl InboundMessage {
    pub fn classify(self) -> Envelope {
        if let Some(code) = self.error {
            return Envelope::Failure {
                id: self.id,
                code,
                message: self.message.unwrap_or_default(),
            };
        }
        if let Some(signal) = self.signal {
            return Envelope::Event {
                signal,
                body: self.body.unwrap_or(Value::Null),
            };
        }
        match self.id {
            Some(id) => Envelope::Ack {
                id,
                body: self.body,
            },
            None => Envelope::Unroutable,
        }
    }
}

/// Split an event body into its `[timestamp, ...fields]` items.
///
/// Some firmware sends the array JSON-encoded inside a string; both
/// shapes are accepted.
pub fn event_fields(body: Value) -> Result<Vec<Value>, Error> {
    match body {
        Value::Array(items) => Ok(items),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Err(Error::Deserialization {
                message: "event body is not a JSON array".into(),
                body: text,
            }),
        },
        other => Err(Error::Deserialization {
            message: "event body is not a JSON array".into(),
            body: other.to_string(),
        }),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_envelope_shape() {
        let msg = OutboundMessage::new("system/battery:level", 3, Method::Post, &[]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "path": "//system/battery:level",
                "id": 3,
                "method": "POST",
                "body": null
            })
        );
    }

    #[test]
    fn body_encoding_by_arity() {
        assert_eq!(encode_body(&[]), Value::Null);
        assert_eq!(encode_body(&[json!(42)]), json!(42));
        assert_eq!(encode_body(&[json!(1), json!("a")]), json!([1, "a"]));
    }

    #[test]
    fn error_wins_over_other_fields() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"id":7,"signal":2,"error":1,"message":"bad-arg","body":[1]}"#)
                .unwrap();
        assert_eq!(
            msg.classify(),
            Envelope::Failure {
                id: Some(7),
                code: 1,
                message: "bad-arg".into()
            }
        );
    }

    #[test]
    fn ack_and_event_classification() {
        let ack: InboundMessage = serde_json::from_str(r#"{"id":4,"body":17}"#).unwrap();
        assert_eq!(
            ack.classify(),
            Envelope::Ack {
                id: 4,
                body: Some(json!(17))
            }
        );

        let event: InboundMessage =
            serde_json::from_str(r#"{"id":null,"signal":17,"body":[1.5,80]}"#).unwrap();
        assert_eq!(
            event.classify(),
            Envelope::Event {
                signal: 17,
                body: json!([1.5, 80])
            }
        );

        let empty: InboundMessage = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.classify(), Envelope::Unroutable);
    }

    #[test]
    fn ack_with_null_body_has_no_body() {
        let ack: InboundMessage = serde_json::from_str(r#"{"id":4,"body":null}"#).unwrap();
        assert_eq!(ack.classify(), Envelope::Ack { id: 4, body: None });
    }

    #[test]
    fn event_fields_accepts_array_or_encoded_string() {
        assert_eq!(event_fields(json!([1, 2])).unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(
            event_fields(json!("[0.25, true]")).unwrap(),
            vec![json!(0.25), json!(true)]
        );
        assert!(event_fields(json!({"a": 1})).is_err());
        assert!(event_fields(json!("nope")).is_err());
    }
}
