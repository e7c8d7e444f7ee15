//! Block payload codecs, tried in order until one succeeds.
//!
//! Every strategy produces the AT-protocol JSON data model: CID links become
//! `{"$link": "<cid>"}` and byte strings become `{"$bytes": "<base64>"}`.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use cid::Cid;
use ciborium::value::Value as Cbor;
use serde_json::{Map, Number, Value};

/// CBOR tag used by DAG-CBOR for CID links.
pub const CID_TAG: u64 = 42;

/// One way of turning block bytes into a value.
#[derive(Clone, Copy)]
pub struct DecodeStrategy {
    /// Short name, recorded on decoded blocks.
    pub name: &'static str,
    decode: fn(&[u8]) -> Result<Value, String>,
}

impl DecodeStrategy {
    /// Build a strategy from a name and decode function.
    pub const fn new(name: &'static str, decode: fn(&[u8]) -> Result<Value, String>) -> Self {
        Self { name, decode }
    }

    /// Attempt to decode the payload.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, String> {
        (self.decode)(bytes)
    }
}

impl std::fmt::Debug for DecodeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeStrategy")
            .field("name", &self.name)
            .finish()
    }
}

/// Canonical DAG-CBOR: exactly one item, text keys only, valid links.
pub const STRICT_DAG_CBOR: DecodeStrategy = DecodeStrategy::new("dag-cbor", decode_strict);

/// Generic CBOR: first item only, trailing bytes and odd keys tolerated.
pub const LENIENT_CBOR: DecodeStrategy = DecodeStrategy::new("cbor-lenient", decode_lenient);

/// JSON payloads written by some exporters.
pub const JSON: DecodeStrategy = DecodeStrategy::new("json", decode_json);

/// The default strategy order.
pub fn default_strategies() -> Vec<DecodeStrategy> {
    vec![STRICT_DAG_CBOR, LENIENT_CBOR, JSON]
}

/// Try each strategy in order. On total failure returns every strategy's error.
pub fn decode_with(
    strategies: &[DecodeStrategy],
    bytes: &[u8],
) -> Result<(Value, &'static str), Vec<String>> {
    let mut errors = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        match strategy.decode(bytes) {
            Ok(value) => return Ok((value, strategy.name)),
            Err(e) => errors.push(format!("{}: {}", strategy.name, e)),
        }
    }
    Err(errors)
}

fn decode_strict(bytes: &[u8]) -> Result<Value, String> {
    let mut cursor = Cursor::new(bytes);
    let cbor: Cbor = ciborium::de::from_reader(&mut cursor).map_err(|e| e.to_string())?;
    if cursor.position() as usize != bytes.len() {
        return Err(format!(
            "{} trailing bytes",
            bytes.len() - cursor.position() as usize
        ));
    }
    lower(cbor, true)
}

fn decode_lenient(bytes: &[u8]) -> Result<Value, String> {
    let cbor: Cbor = ciborium::de::from_reader(bytes).map_err(|e| e.to_string())?;
    lower(cbor, false)
}

fn decode_json(bytes: &[u8]) -> Result<Value, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

/// Lower a CBOR value into the JSON data model.
pub fn lower(cbor: Cbor, strict: bool) -> Result<Value, String> {
    Ok(match cbor {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Text(s) => Value::String(s),
        Cbor::Integer(i) => {
            let wide = i128::from(i);
            if let Ok(v) = i64::try_from(wide) {
                Value::Number(v.into())
            } else if let Ok(v) = u64::try_from(wide) {
                Value::Number(v.into())
            } else {
                Value::String(wide.to_string())
            }
        }
        Cbor::Float(f) => match Number::from_f64(f) {
            Some(n) => Value::Number(n),
            None if strict => return Err(format!("non-finite float {f}")),
            None => Value::Null,
        },
        Cbor::Bytes(b) => bytes_value(&b),
        Cbor::Tag(CID_TAG, inner) => match *inner {
            Cbor::Bytes(b) => match parse_link(&b) {
                Some(cid) => link_value(&cid),
                None if strict => return Err("invalid CID link".to_string()),
                None => bytes_value(&b),
            },
            other if strict => return Err(format!("CID tag over non-bytes: {other:?}")),
            other => lower(other, strict)?,
        },
        Cbor::Tag(_, inner) => lower(*inner, strict)?,
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| lower(v, strict))
                .collect::<Result<_, _>>()?,
        ),
        Cbor::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match k {
                    Cbor::Text(s) => s,
                    _ if strict => return Err("non-text map key".to_string()),
                    Cbor::Integer(i) => i128::from(i).to_string(),
                    Cbor::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
                    other => format!("{other:?}"),
                };
                map.insert(key, lower(v, strict)?);
            }
            Value::Object(map)
        }
        other if strict => return Err(format!("unsupported CBOR value {other:?}")),
        _ => Value::Null,
    })
}

/// Parse a DAG-CBOR link payload (identity multibase prefix + CID bytes).
pub fn parse_link(bytes: &[u8]) -> Option<Cid> {
    match bytes.split_first() {
        Some((0, rest)) => Cid::try_from(rest).ok(),
        _ => None,
    }
}

/// `{"$link": "<cid>"}`.
pub fn link_value(cid: &Cid) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert("$link".to_string(), Value::String(cid.to_string()));
    Value::Object(map)
}

fn bytes_value(bytes: &[u8]) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(
        "$bytes".to_string(),
        Value::String(STANDARD_NO_PAD.encode(bytes)),
    );
    Value::Object(map)
}

/// Extract the CID string from a `{"$link": ...}` value.
pub fn as_link(value: &Value) -> Option<&str> {
    value.get("$link").and_then(Value::as_str)
}

/// Extract raw bytes from a `{"$bytes": ...}` value, or the UTF-8 of a plain string.
pub fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        _ => {
            let encoded = value.get("$bytes")?.as_str()?;
            STANDARD_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .ok()
        }
    }
}
