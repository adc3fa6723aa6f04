//! JSON envelope spoken by the bundled echo processor.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Error details carried by an `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: i32,
    pub message: String,
}

/// One request or reply.
///
/// `payload` stays raw so the echo path forwards it byte for byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl Envelope {
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let payload = match payload {
            Some(p) => Some(serde_json::value::to_raw_value(p)?),
            None => None,
        };
        Ok(Self {
            id: id.into(),
            msg_type: msg_type.into(),
            payload,
            error: None,
        })
    }

    /// Reply with the same id and the given raw payload.
    pub fn reply_raw(&self, msg_type: impl Into<String>, payload: Option<Box<RawValue>>) -> Self {
        Self {
            id: self.id.clone(),
            msg_type: msg_type.into(),
            payload,
            error: None,
        }
    }

    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            msg_type: "error".into(),
            payload: None,
            error: Some(EnvelopeError {
                code,
                message: message.into(),
            }),
        }
    }
}
