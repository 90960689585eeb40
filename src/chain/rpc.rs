/// Minimal JSON-RPC 2.0 client over HTTP, shared by the EVM and Substrate adapters.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Result, WorkflowError};

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method`. A `null` result deserializes into `T`, so nullable
    /// results should be requested as `Option<_>`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let resp = self.client.post(&self.url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Rpc(format!(
                "{method} returned HTTP {status}: {text}"
            )));
        }

        let resp: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| WorkflowError::Serialization(format!("RPC response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(WorkflowError::RpcRejected {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(resp.result.unwrap_or(serde_json::Value::Null)).map_err(|e| {
            WorkflowError::Serialization(format!("{method} result has unexpected shape: {e}"))
        })
    }
}

/// Parse a 0x-prefixed hex quantity (`"0x1a"`).
pub fn parse_quantity(value: &str) -> Result<u128> {
    let digits = value.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| WorkflowError::Serialization(format!("Invalid hex quantity '{value}': {e}")))
}

/// Parse a hex quantity that must fit in a `u64` (chain id, nonce, gas, block number).
pub fn parse_u64_quantity(value: &str) -> Result<u64> {
    let wide = parse_quantity(value)?;
    u64::try_from(wide)
        .map_err(|_| WorkflowError::Serialization(format!("Quantity '{value}' overflows u64")))
}
