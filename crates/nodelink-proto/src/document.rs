//! Bridging between the two wire document models (JSON and CBOR).
//!
//! Decoding resolves the wire format once into a [`RawDocument`]; everything
//! downstream works on a single canonical in-memory type, `serde_json::Value`.
//! Maps keep their wire order (`serde_json/preserve_order`), so re-serializing
//! a received payload reproduces the sender's bytes for CRC and MAC checks.

use ciborium::Value as CborValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{ProtoError, Result};

/// Serialization format of an envelope on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// UTF-8 JSON text.
    #[default]
    Json,
    /// Compact binary CBOR (RFC 8949).
    Cbor,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Json => write!(f, "JSON"),
            WireFormat::Cbor => write!(f, "CBOR"),
        }
    }
}

/// A parsed document whose format has been determined by content sniffing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDocument {
    /// Parsed from JSON text.
    Json(Value),
    /// Parsed from CBOR bytes.
    Cbor(CborValue),
}

impl RawDocument {
    /// Sniffs the format of `bytes` and parses it.
    ///
    /// A leading `{` or `[` selects JSON. Anything else is tried as a single
    /// CBOR map first and, if that fails, retried as JSON.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let first = *bytes.first().ok_or_else(|| ProtoError::Malformed {
            reason: "empty buffer".to_string(),
        })?;
        if first == b'{' || first == b'[' {
            return Ok(RawDocument::Json(serde_json::from_slice(bytes)?));
        }
        match parse_cbor_map(bytes) {
            Ok(value) => Ok(RawDocument::Cbor(value)),
            Err(cbor_reason) => match serde_json::from_slice::<Value>(bytes) {
                Ok(value) => Ok(RawDocument::Json(value)),
                Err(json_err) => Err(ProtoError::Malformed {
                    reason: format!("not CBOR ({cbor_reason}) and not JSON ({json_err})"),
                }),
            },
        }
    }

    /// The wire format this document was parsed from.
    pub fn format(&self) -> WireFormat {
        match self {
            RawDocument::Json(_) => WireFormat::Json,
            RawDocument::Cbor(_) => WireFormat::Cbor,
        }
    }

    /// Converts into the canonical document model.
    pub fn into_value(self) -> Result<Value> {
        match self {
            RawDocument::Json(value) => Ok(value),
            RawDocument::Cbor(value) => cbor_to_json(value),
        }
    }
}

fn parse_cbor_map(bytes: &[u8]) -> std::result::Result<CborValue, String> {
    let mut cursor = bytes;
    let value: CborValue = ciborium::from_reader(&mut cursor).map_err(|e| e.to_string())?;
    if !cursor.is_empty() {
        return Err(format!("{} trailing bytes", cursor.len()));
    }
    if !value.is_map() {
        return Err("top-level item is not a map".to_string());
    }
    Ok(value)
}

/// Serializes a canonical document in the given wire format.
///
/// The output is deterministic for a given document, which is what lets the
/// receiver recompute the payload CRC after re-serialization. Keys are written
/// in document order.
pub fn serialize(format: WireFormat, value: &Value) -> Result<Vec<u8>> {
    match format {
        WireFormat::Json => Ok(serde_json::to_vec(value)?),
        WireFormat::Cbor => {
            let cbor = json_to_cbor(value)?;
            let mut buf = Vec::new();
            ciborium::into_writer(&cbor, &mut buf).map_err(|e| ProtoError::Cbor(e.to_string()))?;
            Ok(buf)
        }
    }
}

/// Converts a canonical document into a CBOR value.
pub fn json_to_cbor(value: &Value) -> Result<CborValue> {
    Ok(match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                CborValue::Integer(u.into())
            } else if let Some(i) = n.as_i64() {
                CborValue::Integer(i.into())
            } else if let Some(f) = n.as_f64() {
                match as_single(f) {
                    Some(single) => CborValue::Float(f64::from(single)),
                    // the encoder would narrow this to f32 and the decoder
                    // would read it back as a different decimal
                    None if f64::from(f as f32) == f => {
                        return Err(ProtoError::UnsupportedValue {
                            reason: format!("float {f} does not survive CBOR narrowing"),
                        })
                    }
                    None => CborValue::Float(f),
                }
            } else {
                return Err(ProtoError::UnsupportedValue {
                    reason: format!("number {n} has no CBOR representation"),
                });
            }
        }
        Value::String(s) => CborValue::Text(s.clone()),
        Value::Array(items) => {
            CborValue::Array(items.iter().map(json_to_cbor).collect::<Result<Vec<_>>>()?)
        }
        Value::Object(map) => CborValue::Map(
            map.iter()
                .map(|(k, v)| Ok((CborValue::Text(k.clone()), json_to_cbor(v)?)))
                .collect::<Result<Vec<_>>>()?,
        ),
    })
}

/// Converts a CBOR value into the canonical document model.
///
/// Map keys must be text; byte strings and out-of-range integers are rejected.
pub fn cbor_to_json(value: CborValue) -> Result<Value> {
    Ok(match value {
        CborValue::Null => Value::Null,
        CborValue::Bool(b) => Value::Bool(b),
        CborValue::Integer(i) => {
            let wide = i128::from(i);
            if let Ok(u) = u64::try_from(wide) {
                Value::Number(u.into())
            } else if let Ok(s) = i64::try_from(wide) {
                Value::Number(s.into())
            } else {
                return Err(ProtoError::UnsupportedValue {
                    reason: format!("integer {wide} out of range"),
                });
            }
        }
        CborValue::Float(f) => {
            let decimal = if f64::from(f as f32) == f {
                shortest_decimal(f as f32)
            } else {
                f
            };
            Value::Number(
                Number::from_f64(decimal).ok_or_else(|| ProtoError::UnsupportedValue {
                    reason: "non-finite float".to_string(),
                })?,
            )
        }
        CborValue::Text(s) => Value::String(s),
        CborValue::Tag(_, inner) => cbor_to_json(*inner)?,
        CborValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(cbor_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        CborValue::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match k {
                    CborValue::Text(key) => key,
                    other => {
                        return Err(ProtoError::UnsupportedValue {
                            reason: format!("non-text map key {other:?}"),
                        })
                    }
                };
                map.insert(key, cbor_to_json(v)?);
            }
            Value::Object(map)
        }
        CborValue::Bytes(_) => {
            return Err(ProtoError::UnsupportedValue {
                reason: "byte strings are not part of the document model".to_string(),
            })
        }
        other => {
            return Err(ProtoError::UnsupportedValue {
                reason: format!("unsupported CBOR item {other:?}"),
            })
        }
    })
}

/// Widens an `f32` through its shortest decimal form, so `21.37f32` becomes
/// `21.37` rather than `21.3700008392334`.
pub fn shortest_decimal(value: f32) -> f64 {
    value
        .to_string()
        .parse::<f64>()
        .unwrap_or_else(|_| f64::from(value))
}

/// The `f32` whose shortest decimal form is exactly `f`, if any.
///
/// Such values go out as single-precision CBOR floats; the decoder maps them
/// back through [`shortest_decimal`], so the bytes survive a round trip.
fn as_single(f: f64) -> Option<f32> {
    let narrow = f as f32;
    (narrow.is_finite() && shortest_decimal(narrow) == f).then_some(narrow)
}
