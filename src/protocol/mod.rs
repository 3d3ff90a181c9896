//! Wire protocol: request/response envelopes and line framing.
//!
//! Requests look like
//! `{"mode":"calc","data":{"expr":"sin(0)"},"options":{"cache":true}}` and
//! responses like `{"ok":true,"result":0.0,"meta":{"from_cache":false,"took_ms":0}}`.

pub mod codec;

pub use codec::{encode_frame, FrameCodec, FrameError, DEFAULT_MAX_FRAME_BYTES};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WireError};

// ============================================================================
// Request
// ============================================================================

/// Operation selected by the request's `mode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Arithmetic evaluation of `data.expr`.
    Calc,
    /// Text generation from `data.prompt`.
    Generate,
}

impl Mode {
    /// Resolve a wire name. `gpt` is accepted as an alias of `generate`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "calc" => Some(Mode::Calc),
            "generate" | "gpt" => Some(Mode::Generate),
            _ => None,
        }
    }
}

/// Request options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Whether the response cache may be consulted and filled.
    pub cache: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self { cache: true }
    }
}

/// A decoded request envelope.
///
/// `mode` is kept as received so that an unrecognised mode can be reported
/// by the dispatcher rather than rejected as malformed JSON.
#[derive(Debug, Clone)]
pub struct Request {
    pub mode: String,
    pub data: Map<String, Value>,
    pub options: RequestOptions,
    /// The envelope exactly as decoded, used for cache keys and forwarding.
    pub raw: Value,
}

impl Request {
    /// Decode a frame into a request. Non-JSON input is a protocol error;
    /// structurally wrong fields are validation errors.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let raw: Value =
            serde_json::from_slice(frame).map_err(|e| WireError::Protocol(e.to_string()))?;
        Self::from_value(raw)
    }

    /// Build a request from an already-parsed JSON value.
    pub fn from_value(raw: Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| WireError::Protocol("request must be a JSON object".to_string()))?;

        // A missing or non-string mode is reported by the dispatcher as unknown.
        let mode = obj
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let data = match obj.get("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(data)) => data.clone(),
            Some(_) => return Err(WireError::Validation("'data' must be an object".to_string())),
        };

        let options = match obj.get("options") {
            None | Some(Value::Null) => RequestOptions::default(),
            Some(Value::Object(opts)) => match opts.get("cache") {
                None | Some(Value::Null) => RequestOptions::default(),
                Some(Value::Bool(cache)) => RequestOptions { cache: *cache },
                Some(_) => {
                    return Err(WireError::Validation(
                        "'options.cache' must be a boolean".to_string(),
                    ))
                }
            },
            Some(_) => {
                return Err(WireError::Validation(
                    "'options' must be an object".to_string(),
                ))
            }
        };

        Ok(Self {
            mode,
            data,
            options,
            raw,
        })
    }

    /// Fetch a required non-empty string field from `data`.
    pub fn required_str(&self, field: &str) -> Result<&str> {
        match self.data.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
            _ => Err(WireError::Validation(format!(
                "'{field}' is required (string)"
            ))),
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Timing and provenance metadata attached to successful responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Served from the connection server's cache.
    pub from_cache: bool,
    /// Wall-clock milliseconds spent handling the request.
    pub took_ms: u64,
    /// Set by the caching proxy when it answered from its own cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_cache: Option<bool>,
}

/// A response envelope. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Response {
    /// Successful response carrying `result` and timing metadata.
    pub fn success(result: Value, from_cache: bool, took_ms: u64) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            meta: Some(Meta {
                from_cache,
                took_ms,
                proxy_cache: None,
            }),
        }
    }

    /// Failure response with the given message and no metadata.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(message.into()),
            meta: None,
        }
    }

    /// Failure response describing `err`.
    pub fn from_error(err: &WireError) -> Self {
        Self::failure(err.to_string())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}

// ============================================================================
// Canonical serialization
// ============================================================================

/// Render `value` as compact JSON with object keys sorted at every level.
///
/// Two structurally equal documents produce identical text regardless of the
/// order their fields arrived in.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
