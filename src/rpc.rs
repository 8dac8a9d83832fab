use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result, RpcError};

/// One call of a JSON-RPC batch.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub method: String,
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self { method: method.into(), params }
    }
}

/// Transport seam for the bundler and paymaster clients. Implemented over
/// HTTP in production and hand-rolled in tests.
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    /// Sends a single request and returns the `result` member.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Sends several calls as one JSON-RPC batch. Responses come back in call
    /// order; a per-item error envelope does not fail the batch.
    async fn request_batch(&self, calls: &[RpcCall]) -> Result<Vec<Result<Value, RpcError>>>;
}

/// JSON-RPC over HTTP POST. Stateless aside from the id counter; no retries.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), http: reqwest::Client::new(), next_id: AtomicU64::new(1) }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn envelope(&self, method: &str, params: Value) -> (u64, Value) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (
            id,
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }),
        )
    }
}

#[async_trait]
impl JsonRpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (id, payload) = self.envelope(method, params);
        tracing::debug!(method, id, url = %self.url, "json-rpc request");
        let resp = self.http.post(&self.url).json(&payload).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        decode_single(status, &body)
    }

    async fn request_batch(&self, calls: &[RpcCall]) -> Result<Vec<Result<Value, RpcError>>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::with_capacity(calls.len());
        let payload: Vec<Value> = calls
            .iter()
            .map(|call| {
                let (id, envelope) = self.envelope(&call.method, call.params.clone());
                ids.push(id);
                envelope
            })
            .collect();
        tracing::debug!(calls = calls.len(), url = %self.url, "json-rpc batch request");
        let resp = self.http.post(&self.url).json(&payload).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        decode_batch(status, &body, &ids)
    }
}

/// `eth_call` against the latest block, for the handful of view reads the
/// crate needs (factory address resolution, entry point nonce, allowances).
pub async fn eth_call(
    transport: &dyn JsonRpcTransport,
    to: ethers::types::Address,
    data: Vec<u8>,
) -> Result<ethers::types::Bytes> {
    let params = json!([
        {
            "to": crate::encoding::fmt_address(to),
            "data": format!("0x{}", hex::encode(&data)),
        },
        "latest",
    ]);
    let res = transport.request("eth_call", params).await?;
    let s = res.as_str().ok_or_else(|| {
        Error::Rpc(RpcError {
            code: None,
            message: format!("eth_call returned non-string result: {res}"),
            data: None,
        })
    })?;
    crate::encoding::parse_bytes("callResult", s)
}

/// Decodes one JSON-RPC response body. The error envelope wins over the HTTP
/// status; a non-2xx status without an envelope is an `Http` error.
fn decode_single(status: u16, body: &str) -> Result<Value> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return Err(Error::Http { status, body: truncated(body) }),
    };
    match decode_envelope(&parsed) {
        Some(result) => result.map_err(Error::Rpc),
        None if !(200..300).contains(&status) => {
            Err(Error::Http { status, body: truncated(body) })
        }
        None => Err(Error::Rpc(RpcError {
            code: None,
            message: "response has neither result nor error".into(),
            data: None,
        })),
    }
}

fn decode_batch(status: u16, body: &str, ids: &[u64]) -> Result<Vec<Result<Value, RpcError>>> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return Err(Error::Http { status, body: truncated(body) }),
    };
    // a batch-level failure comes back as a single error envelope
    if let Value::Object(_) = &parsed {
        if let Some(result) = decode_envelope(&parsed) {
            return match result {
                Err(e) => Err(Error::Rpc(e)),
                Ok(_) => Err(Error::Rpc(RpcError {
                    code: None,
                    message: "expected batch array, got single response".into(),
                    data: None,
                })),
            };
        }
    }
    let Value::Array(items) = parsed else {
        return Err(Error::Http { status, body: truncated(body) });
    };
    // responses may arrive in any order; pair them back up by echoed id
    let mut slots: Vec<Result<Value, RpcError>> = ids
        .iter()
        .map(|_| {
            Err(RpcError { code: None, message: "no response for batch item".into(), data: None })
        })
        .collect();
    for item in &items {
        let Some(pos) = item
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|id| ids.iter().position(|x| *x == id))
        else {
            continue;
        };
        if let Some(result) = decode_envelope(item) {
            slots[pos] = result;
        }
    }
    Ok(slots)
}

/// Splits a response object into result/error; `None` when it carries neither.
fn decode_envelope(resp: &Value) -> Option<Result<Value, RpcError>> {
    if let Some(err) = resp.get("error") {
        if !err.is_null() {
            return Some(Err(RpcError::from_value(err)));
        }
    }
    resp.get("result").map(|result| Ok(result.clone()))
}

fn truncated(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let mut end = LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
