//! Minimal JSON-RPC 2.0 transport shared by the EVM and Solana clients.
//!
//! Errors keep the HTTP status and provider message verbatim so callers can
//! classify rate limits and reverts from the text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    /// Log prefix, e.g. `evm:8453`
    label: String,
}

impl JsonRpcClient {
    pub fn new(url: &str, label: &str) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            url: url.to_string(),
            label: label.to_string(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Call `method`; `Ok(Value::Null)` when the node answered with a null result
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, String> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        log::debug!("[{}] {} with params: {}", self.label, method, request.params);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("{} request failed: {}", method, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read {} response: {}", method, e))?;

        if !status.is_success() {
            return Err(format!(
                "RPC error ({}) for {}: {}",
                status,
                method,
                if body.is_empty() { "empty response" } else { &body }
            ));
        }

        let rpc_response: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse {} response: {} - body: {}", method, e, body))?;

        if let Some(error) = rpc_response.error {
            return Err(match error.data {
                Some(data) => format!("RPC error {}: {} ({})", error.code, error.message, data),
                None => format!("RPC error {}: {}", error.code, error.message),
            });
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }
}
