use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// JSON-RPC error envelope, normalized across provider dialects.
///
/// Some providers return `"error": "out of gas"`, others return
/// `"error": {"code": -32000, "message": "...", "data": "..."}`. Both shapes
/// end up here with the provider-supplied detail kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: Option<i64>,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    /// Normalizes a raw JSON-RPC `error` member into a single shape.
    pub fn from_value(err: &Value) -> Self {
        match err {
            Value::String(s) => Self { code: None, message: s.clone(), data: None },
            Value::Object(obj) => Self {
                code: obj.get("code").and_then(Value::as_i64),
                message: obj
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| err.to_string()),
                data: obj.get("data").cloned(),
            },
            other => Self { code: None, message: other.to_string(), data: None },
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        if let Some(data) = &self.data {
            write!(f, ", data: {data}")?;
        }
        Ok(())
    }
}

/// Errors surfaced by this crate. None of these are retried internally; the
/// one exception is the receipt poll loop, where a null receipt is an explicit
/// "keep polling" signal rather than an error.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-level failure reaching an RPC endpoint (DNS, connection,
    /// invalid URL).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a JSON-RPC error envelope.
    #[error("rpc error: {0}")]
    Rpc(RpcError),

    /// Non-2xx HTTP response without a JSON-RPC error envelope.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    /// A wire-form field failed hex or width validation.
    #[error("malformed field {field}: {reason}")]
    MalformedField { field: &'static str, reason: String },

    /// A required field was never set before the step that consumes it.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field is set that the selected entry point version cannot encode.
    #[error("unsupported field: {0}")]
    UnsupportedField(String),

    /// Builder method invoked out of state-machine order.
    #[error("invalid builder state: expected {expected}, currently {actual}")]
    InvalidState { expected: &'static str, actual: &'static str },

    /// Gas estimation RPC failed; the source keeps the provider detail.
    #[error("gas estimation failed: {0}")]
    Estimation(#[source] Box<Error>),

    /// Wrong signing scheme used for the configured entry point version.
    #[error("signing scheme {scheme} is not supported by entry point {version}")]
    UnsupportedSigningScheme { version: &'static str, scheme: &'static str },

    /// `wait()` exceeded its timeout without a receipt. The operation may
    /// still be pending inclusion; polling can resume by hash.
    #[error("no user operation receipt after {waited:?}")]
    ReceiptTimeout { waited: Duration },

    /// The signing capability failed to produce a signature.
    #[error("signer error: {0}")]
    Signer(String),

    /// An on-chain view call or ABI build failed.
    #[error("contract call error: {0}")]
    Contract(String),

    /// Chain profile could not be loaded or parsed.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
