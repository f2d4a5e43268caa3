//! Control-channel events
//!
//! Every message on the control channel is a UTF-8 JSON object with a `type`
//! discriminator. Apart from `response.done` the payload is opaque here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SessionError;

/// Terminal event of a model response; carries diagnostic detail under `response`.
pub const RESPONSE_DONE: &str = "response.done";

/// A tagged JSON event `{ "type": .., ...payload }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl ControlEvent {
    pub fn new(kind: impl Into<String>) -> ControlEvent {
        ControlEvent {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Adds a payload field. A `type` key replaces the discriminator.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> ControlEvent {
        let key = key.into();
        let value = value.into();
        if key == "type" {
            if let Value::String(kind) = value {
                self.kind = kind;
            }
            return self;
        }
        self.payload.insert(key, value);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Parse one wire message.
    pub fn from_wire(data: &[u8]) -> Result<ControlEvent, SessionError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| SessionError::MalformedEvent(format!("not UTF-8: {e}")))?;
        serde_json::from_str(text).map_err(|e| SessionError::MalformedEvent(e.to_string()))
    }

    /// Encode for the wire.
    pub fn to_wire(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::MalformedEvent(e.to_string()))
    }

    pub fn is_response_done(&self) -> bool {
        self.kind == RESPONSE_DONE
    }

    /// The nested `response` object of a `response.done` event.
    pub fn response_detail(&self) -> Option<&Value> {
        if !self.is_response_done() {
            return None;
        }
        self.payload.get("response")
    }
}
