// ── Payload codec ──
//
// Every command and almost every feedback payload is compact JSON wrapped
// in a zlib stream. `heart_beat` is the one channel sent as plain JSON, so
// `decode` sniffs the zlib header instead of trusting the topic.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

/// Application payload: a JSON object with string keys.
pub type Payload = serde_json::Map<String, Value>;

/// Upper bound on inflated payload size. Larger frames are rejected.
pub const MAX_DECODED_LEN: usize = 4 * 1024 * 1024;

// ── Encoding ─────────────────────────────────────────────────────────

/// Wire form of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Encoding {
    /// zlib-compressed compact JSON.
    Compressed,
    /// Plain compact JSON (heartbeat only).
    Plain,
}

impl Encoding {
    /// Encoding a device uses for the given feedback leaf.
    pub fn for_leaf(leaf: &str) -> Self {
        if leaf == crate::topic::leaf::HEART_BEAT {
            Self::Plain
        } else {
            Self::Compressed
        }
    }
}

/// A decoded payload plus the form it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub payload: Payload,
    pub encoding: Encoding,
}

// ── Encode ───────────────────────────────────────────────────────────

/// Serialize `payload` to compact JSON and zlib-compress it.
pub fn encode(payload: &Payload) -> Result<Vec<u8>, Error> {
    encode_as(payload, Encoding::Compressed)
}

/// Serialize `payload` in the requested wire form.
pub fn encode_as(payload: &Payload, encoding: Encoding) -> Result<Vec<u8>, Error> {
    let json = serde_json::to_vec(payload).map_err(|e| Error::Encode {
        path: "$".into(),
        message: e.to_string(),
    })?;

    match encoding {
        Encoding::Plain => Ok(json),
        Encoding::Compressed => {
            let mut encoder =
                ZlibEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
            encoder.write_all(&json).map_err(|e| Error::Encode {
                path: "$".into(),
                message: format!("compression failed: {e}"),
            })?;
            encoder.finish().map_err(|e| Error::Encode {
                path: "$".into(),
                message: format!("compression failed: {e}"),
            })
        }
    }
}

/// Convert any serializable value into a [`Payload`].
///
/// Fails with [`Error::Encode`] if the value does not serialize to a JSON
/// object (or cannot be serialized at all, e.g. non-string map keys).
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Payload, Error> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::Encode {
            path: "$".into(),
            message: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(Error::Encode {
            path: "$".into(),
            message: e.to_string(),
        }),
    }
}

// ── Decode ───────────────────────────────────────────────────────────

/// Decode wire bytes, accepting both compressed and plain JSON.
pub fn decode(bytes: &[u8]) -> Result<Decoded, Error> {
    decode_with_limit(bytes, MAX_DECODED_LEN)
}

/// [`decode`] with an explicit cap on the inflated size.
pub fn decode_with_limit(bytes: &[u8], limit: usize) -> Result<Decoded, Error> {
    if !has_zlib_header(bytes) {
        return parse_object(bytes).map(|payload| Decoded {
            payload,
            encoding: Encoding::Plain,
        });
    }

    let mut inflated = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    ZlibDecoder::new(bytes)
        .take(cap)
        .read_to_end(&mut inflated)
        .map_err(|e| Error::Decode {
            message: format!("corrupt zlib stream: {e}"),
        })?;

    if inflated.len() > limit {
        return Err(Error::Decode {
            message: format!("inflated payload exceeds {limit} bytes"),
        });
    }

    parse_object(&inflated).map(|payload| Decoded {
        payload,
        encoding: Encoding::Compressed,
    })
}

/// `true` if `bytes` starts with a zlib (RFC 1950) header using deflate
/// with a 32K window: `0x78` plus a FLG byte that makes the pair a
/// multiple of 31.
pub fn has_zlib_header(bytes: &[u8]) -> bool {
    match bytes {
        [cmf @ 0x78, flg, ..] => ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn parse_object(bytes: &[u8]) -> Result<Payload, Error> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::Decode {
            message: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(Error::Decode {
            message: format!("invalid JSON: {e}"),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Tests ────────────────────────────────────────────────────────────
