//! Ingestion envelope decoding

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Index type carried by redirect click events
pub const CLICK_EVENTS: &str = "click_events";

/// Decoded ingestion unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub index_type: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(index_type: impl Into<String>, data: Value) -> Self {
        Self {
            index_type: index_type.into(),
            data,
        }
    }

    /// Short link code of a click event, when the document carries one
    pub fn short_code(&self) -> Option<&str> {
        self.data.get("short_code").and_then(Value::as_str)
    }
}

/// Index types the ingestion path accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTypes(BTreeSet<String>);

impl IndexTypes {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(types.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, index_type: &str) -> bool {
        self.0.contains(index_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for IndexTypes {
    fn default() -> Self {
        Self::new([CLICK_EVENTS])
    }
}

/// Why a well-formed payload is not processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingIndexType,
    UnsupportedIndexType(String),
    MissingData,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingIndexType => write!(f, "missing index_type"),
            SkipReason::UnsupportedIndexType(index_type) => {
                write!(f, "unsupported index_type '{index_type}'")
            }
            SkipReason::MissingData => write!(f, "missing data"),
        }
    }
}

/// Outcome of decoding a syntactically valid payload
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEnvelope {
    Accepted(Envelope),
    Skipped(SkipReason),
}

/// Payload bytes that are not a JSON object
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Payload is not valid UTF-8: {message}")]
    InvalidUtf8 { message: String },

    #[error("Payload is not valid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Payload is a JSON {kind}, not an object")]
    NotAnObject { kind: &'static str },
}

impl crate::core::error_handling::ContextualError for DecodeError {
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<&str> {
        None
    }
}

/// UTF-8 then JSON, shared by the ingestion and RPC paths
pub fn parse_json(body: &[u8]) -> Result<Value, DecodeError> {
    let text = std::str::from_utf8(body).map_err(|e| DecodeError::InvalidUtf8 {
        message: e.to_string(),
    })?;
    serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson {
        message: e.to_string(),
    })
}

/// Decode against the default index type set
pub fn decode(body: &[u8]) -> Result<DecodedEnvelope, DecodeError> {
    decode_with(body, &IndexTypes::default())
}

pub fn decode_with(body: &[u8], allowed: &IndexTypes) -> Result<DecodedEnvelope, DecodeError> {
    let value = parse_json(body)?;
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(DecodeError::NotAnObject {
                kind: json_kind(&other),
            })
        }
    };

    let index_type = match fields.get("index_type") {
        None | Some(Value::Null) => return Ok(DecodedEnvelope::Skipped(SkipReason::MissingIndexType)),
        Some(Value::String(s)) if s.is_empty() => {
            return Ok(DecodedEnvelope::Skipped(SkipReason::MissingIndexType))
        }
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    let data = take_data(&mut fields);
    let Some(data) = data else {
        return Ok(DecodedEnvelope::Skipped(SkipReason::MissingData));
    };

    if !allowed.contains(&index_type) {
        return Ok(DecodedEnvelope::Skipped(SkipReason::UnsupportedIndexType(
            index_type,
        )));
    }

    Ok(DecodedEnvelope::Accepted(Envelope { index_type, data }))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// Absent, null and empty values all count as missing
fn take_data(fields: &mut Map<String, Value>) -> Option<Value> {
    let data = fields.remove("data")?;
    let empty = match &data {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    };
    (!empty).then_some(data)
}
