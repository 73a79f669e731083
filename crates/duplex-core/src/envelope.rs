//! Message envelope for correlated traffic.
//!
//! Every JSON payload exchanged over a connection falls into one of three
//! shapes:
//!
//! ```text
//! {"ReqId": 17, "Data": ..., "Timeout": 5000}   request awaiting a reply
//! {"RespId": 17, "Data": ...}                   reply to request 17
//! anything else                                 plain message
//! ```
//!
//! The shape is decided once, in [`Envelope::decode`]; callers match on the
//! resulting enum instead of probing JSON keys.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{CodecError, Result};
use crate::ids::CorrelationId;

/// Request id key.
pub const REQ_ID_FIELD: &str = "ReqId";
/// Reply id key.
pub const RESP_ID_FIELD: &str = "RespId";
/// Payload key.
pub const DATA_FIELD: &str = "Data";
/// Requester's timeout in milliseconds.
pub const TIMEOUT_FIELD: &str = "Timeout";

/// A decoded inbound or outbound payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// The peer expects exactly one reply carrying the same id.
    Request {
        /// Correlation id chosen by the requester.
        id: CorrelationId,
        /// Request payload.
        data: Value,
        /// How long the requester is willing to wait.
        timeout: Duration,
    },
    /// Reply to a request this side issued earlier.
    Reply {
        /// Correlation id of the original request.
        id: CorrelationId,
        /// Reply payload.
        data: Value,
    },
    /// Uncorrelated message, passed through untouched.
    Plain(Value),
}

#[derive(Serialize)]
struct RequestWire<'a> {
    #[serde(rename = "ReqId")]
    id: CorrelationId,
    #[serde(rename = "Data")]
    data: &'a Value,
    #[serde(rename = "Timeout")]
    timeout_ms: u64,
}

#[derive(Serialize)]
struct ReplyWire<'a> {
    #[serde(rename = "RespId")]
    id: CorrelationId,
    #[serde(rename = "Data")]
    data: &'a Value,
}

impl Envelope {
    /// Build a request envelope.
    #[must_use]
    pub fn request(id: CorrelationId, data: Value, timeout: Duration) -> Self {
        Self::Request { id, data, timeout }
    }

    /// Build a reply envelope.
    #[must_use]
    pub fn reply(id: CorrelationId, data: Value) -> Self {
        Self::Reply { id, data }
    }

    /// Decode raw bytes into an envelope.
    ///
    /// Objects carrying `ReqId` are requests (checked first), objects carrying
    /// `RespId` are replies, and every other JSON document is a plain message.
    /// A missing `Data` field decodes as `null`; a missing `Timeout` as zero.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut map) = value else {
            return Ok(Self::Plain(value));
        };

        if let Some(raw) = map.get(REQ_ID_FIELD) {
            let id = id_value(REQ_ID_FIELD, raw)?;
            let timeout_ms = map.get(TIMEOUT_FIELD).and_then(int_value).unwrap_or(0);
            let data = take_data(&mut map);
            return Ok(Self::Request {
                id,
                data,
                timeout: Duration::from_millis(timeout_ms),
            });
        }

        if let Some(raw) = map.get(RESP_ID_FIELD) {
            let id = id_value(RESP_ID_FIELD, raw)?;
            let data = take_data(&mut map);
            return Ok(Self::Reply { id, data });
        }

        Ok(Self::Plain(Value::Object(map)))
    }

    /// Serialize this envelope to its wire form.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Request { id, data, timeout } => serde_json::to_vec(&RequestWire {
                id: *id,
                data,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?,
            Self::Reply { id, data } => serde_json::to_vec(&ReplyWire { id: *id, data })?,
            Self::Plain(value) => serde_json::to_vec(value)?,
        };
        Ok(bytes)
    }

    /// Correlation id, if this envelope carries one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::Request { id, .. } | Self::Reply { id, .. } => Some(*id),
            Self::Plain(_) => None,
        }
    }
}

fn take_data(map: &mut Map<String, Value>) -> Value {
    map.remove(DATA_FIELD).unwrap_or(Value::Null)
}

fn id_value(field: &'static str, raw: &Value) -> Result<CorrelationId> {
    int_value(raw)
        .map(CorrelationId::from_raw)
        .ok_or_else(|| CodecError::InvalidId {
            field,
            value: raw.to_string(),
        })
}

/// Accept any non-negative JSON number; floats are truncated.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn int_value(raw: &Value) -> Option<u64> {
    if let Some(n) = raw.as_u64() {
        return Some(n);
    }
    let f = raw.as_f64()?;
    (f.is_finite() && f >= 0.0).then_some(f as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
