//! Fragment reassembly for socket messages.
//!
//! The device may split one logical JSON message across several wire
//! frames. [`FrameReassembler`] buffers fragments until one arrives with
//! `fin` set, then yields the concatenated payload for decoding.

use bytes::{Bytes, BytesMut};

use crate::error::Error;
use crate::protocol::InboundMessage;

/// One fragment as read off the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub payload: Bytes,
    /// Set on the last fragment of a message.
    pub fin: bool,
}

impl WireFrame {
    /// A frame carrying a whole message.
    pub fn complete(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            fin: true,
        }
    }

    /// A non-final fragment.
    pub fn fragment(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            fin: false,
        }
    }
}

/// Accumulates fragments of a single in-flight message.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    parts: Vec<Bytes>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns the full message once `fin` is seen.
    pub fn push(&mut self, frame: WireFrame) -> Option<Bytes> {
        if frame.fin && self.parts.is_empty() {
            return Some(frame.payload);
        }

        self.parts.push(frame.payload);
        if !frame.fin {
            return None;
        }

        let total = self.parts.iter().map(Bytes::len).sum();
        let mut message = BytesMut::with_capacity(total);
        for part in self.parts.drain(..) {
            message.extend_from_slice(&part);
        }
        Some(message.freeze())
    }

    /// Drop any partially received message.
    pub fn clear(&mut self) {
        self.parts.clear();
    }

    /// Number of buffered fragments awaiting a final frame.
    pub fn pending_fragments(&self) -> usize {
        self.parts.len()
    }
}

/// Decode a reassembled message: UTF-8 first, then JSON.
pub fn decode_message(raw: &[u8]) -> Result<InboundMessage, Error> {
    let text = std::str::from_utf8(raw).map_err(|e| Error::Deserialization {
        message: format!("invalid UTF-8: {e}"),
        body: String::from_utf8_lossy(raw).into_owned(),
    })?;

    serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.to_owned(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────
