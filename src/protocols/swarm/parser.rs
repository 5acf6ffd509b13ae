//! Swarm control message parser.

use crate::chunk::AssetIdentity;
use serde::de::IgnoredAny;
use serde::Serialize;
use serde_json::{Map, Value};

/// Parsed control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Liveness handshake.
    Hello,
    /// Request for a chunk of an asset.
    RequestChunk {
        identity: AssetIdentity,
        /// Requested length, already clamped to be non-negative.
        length: Option<u64>,
    },
    /// A JSON object whose `type` is missing, not a string, or unknown.
    Unrecognized(Option<String>),
}

/// Why a request could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("invalid length field: {0}")]
    InvalidLength(Value),
}

/// Error codes carried by `{"type":"error"}` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadJson,
    BadType,
}

/// Control reply sent back to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    Ok,
    Error { code: ErrorCode },
}

/// Progress of an incrementally read request buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The buffer holds one complete JSON value.
    Complete,
    /// The buffer is a prefix of some JSON value; more bytes may complete it.
    Incomplete,
    /// No amount of further input can make the buffer valid.
    Malformed,
}

/// Check whether `input` is ready to decode.
///
/// Whitespace-only input counts as incomplete.
pub fn framing(input: &[u8]) -> Framing {
    match serde_json::from_slice::<IgnoredAny>(input) {
        Ok(_) => Framing::Complete,
        Err(e) if e.is_eof() => Framing::Incomplete,
        Err(_) => Framing::Malformed,
    }
}

/// Decode one control message from `input`.
pub fn decode(input: &[u8]) -> Result<ControlMessage, DecodeError> {
    let value: Value = serde_json::from_slice(input)?;
    let Value::Object(fields) = value else {
        return Err(DecodeError::NotAnObject);
    };

    match fields.get("type").and_then(Value::as_str) {
        Some("hello") => Ok(ControlMessage::Hello),
        Some("request_chunk") => {
            let identity = AssetIdentity::new(
                string_field(&fields, "model_id"),
                string_field(&fields, "rev"),
            );
            let length = length_field(&fields)?;
            Ok(ControlMessage::RequestChunk { identity, length })
        }
        other => Ok(ControlMessage::Unrecognized(other.map(str::to_owned))),
    }
}

/// Encode a control reply as compact JSON.
pub fn encode(reply: &ControlReply) -> &'static [u8] {
    match reply {
        ControlReply::Ok => br#"{"type":"ok"}"#,
        ControlReply::Error {
            code: ErrorCode::BadJson,
        } => br#"{"type":"error","code":"bad_json"}"#,
        ControlReply::Error {
            code: ErrorCode::BadType,
        } => br#"{"type":"error","code":"bad_type"}"#,
    }
}

/// Missing and non-string fields read as empty, which never names a real asset.
fn string_field(fields: &Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn length_field(fields: &Map<String, Value>) -> Result<Option<u64>, DecodeError> {
    let value = match fields.get("length") {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };

    let length = match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else if n.as_i64().is_some() {
                // negative
                Some(0)
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0) as u64)
            }
        }
        Value::String(s) => integer_string(s.trim()),
        _ => None,
    };

    length
        .map(Some)
        .ok_or_else(|| DecodeError::InvalidLength(value.clone()))
}

/// Parse an optionally signed run of digits, saturating the way numeric
/// lengths do: negative values clamp to 0 and overflow to `u64::MAX`.
fn integer_string(s: &str) -> Option<u64> {
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if negative {
        return Some(0);
    }
    Some(digits.parse::<u64>().unwrap_or(u64::MAX))
}
