use serde_json::Value;
use thiserror::Error;

use parley_types::events::GatewayEvent;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotObject,

    #[error("frame has no string `type` field")]
    MissingType,
}

/// An inbound frame: its `type` discriminator plus the whole JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    kind: String,
    value: Value,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(fields) = &value else {
            return Err(FrameError::NotObject);
        };
        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();

        Ok(Self { kind, value })
    }

    /// The topic this frame is dispatched under.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The event payload, if the frame carries one.
    pub fn data(&self) -> Option<&Value> {
        self.value.get("data")
    }

    /// Decode into a typed gateway event.
    pub fn event(&self) -> Result<GatewayEvent, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}
