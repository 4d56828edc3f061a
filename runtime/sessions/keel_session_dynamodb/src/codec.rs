//! Conversions between JSON values and DynamoDB attribute values.
//!
//! Every JSON value has a DynamoDB counterpart. The opposite isn't true:
//! string and number sets are decoded as arrays, binary values are rejected.
//!
//! DynamoDB normalizes numbers: `1.0` is stored as `1`. Floats with no
//! fractional part are therefore encoded as integers, and come back as
//! integers when decoded.
use crate::table::Item;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{Number, Value};
use std::collections::HashMap;

/// Encode a JSON value as a DynamoDB attribute value.
pub fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(encode_number(n)),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

/// Decode a DynamoDB attribute value into a JSON value.
pub fn from_attribute(attribute: &AttributeValue) -> Result<Value, CodecError> {
    let value = match attribute {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => Value::Number(parse_number(n)?),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::L(values) => Value::Array(
            values
                .iter()
                .map(from_attribute)
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), from_attribute(v)?)))
                .collect::<Result<_, CodecError>>()?,
        ),
        AttributeValue::Ss(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(values) => Value::Array(
            values
                .iter()
                .map(|n| parse_number(n).map(Value::Number))
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::B(_) | AttributeValue::Bs(_) => {
            return Err(CodecError::Unsupported { kind: "binary" });
        }
        _ => return Err(CodecError::Unsupported { kind: "unknown" }),
    };
    Ok(value)
}

/// Encode a session state as a set of top-level item attributes.
pub fn to_item(state: &HashMap<String, Value>) -> Item {
    state
        .iter()
        .map(|(k, v)| (k.clone(), to_attribute(v)))
        .collect()
}

/// Decode top-level item attributes into a session state.
pub fn from_item(item: &Item) -> Result<HashMap<String, Value>, CodecError> {
    item.iter()
        .map(|(k, v)| {
            from_attribute(v)
                .map(|v| (k.clone(), v))
                .map_err(|e| e.within(k))
        })
        .collect()
}

fn encode_number(n: &Number) -> String {
    // Integers are exactly representable as f64 up to 2^53.
    const EXACT: f64 = 9_007_199_254_740_992.0;
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= EXACT => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

fn parse_number(raw: &str) -> Result<Number, CodecError> {
    raw.parse::<Number>()
        .map_err(|_| CodecError::InvalidNumber {
            raw: raw.to_owned(),
        })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
/// A DynamoDB attribute value that can't be represented as JSON.
pub enum CodecError {
    #[error("`{kind}` attribute values can't be converted to JSON")]
    Unsupported { kind: &'static str },
    #[error("`{raw}` is not a valid number")]
    InvalidNumber { raw: String },
    #[error("Failed to decode the `{attribute}` attribute: {source}")]
    Attribute {
        attribute: String,
        source: Box<CodecError>,
    },
}

impl CodecError {
    fn within(self, attribute: &str) -> Self {
        CodecError::Attribute {
            attribute: attribute.to_owned(),
            source: Box::new(self),
        }
    }
}
