//! Solana JSON-RPC client for the SATI scanner

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{SatiSource, SignatureInfo, TransactionInfo};
use crate::jsonrpc::JsonRpcClient;

const COMMITMENT: &str = "confirmed";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    slot: u64,
    #[serde(default)]
    meta: Option<RawMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    log_messages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResponse {
    value: Option<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    /// `[base64 data, "base64"]`
    data: (String, String),
}

pub struct SolanaRpc {
    rpc: JsonRpcClient,
}

impl SolanaRpc {
    pub fn new(rpc_url: &str, label: &str) -> Result<Self, String> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc_url, label)?,
        })
    }
}

#[async_trait]
impl SatiSource for SolanaRpc {
    async fn signatures_for_address(
        &self,
        address: &str,
        before: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, String> {
        let mut options = json!({ "limit": limit, "commitment": COMMITMENT });
        if let Some(before) = before {
            options["before"] = json!(before);
        }
        if let Some(until) = until {
            options["until"] = json!(until);
        }

        let result = self.rpc.call("getSignaturesForAddress", json!([address, options])).await?;
        serde_json::from_value(result).map_err(|e| format!("Invalid getSignaturesForAddress response: {}", e))
    }

    async fn transaction(&self, signature: &str) -> Result<Option<TransactionInfo>, String> {
        let params = json!([
            signature,
            { "encoding": "json", "maxSupportedTransactionVersion": 0, "commitment": COMMITMENT }
        ]);
        let result = self.rpc.call("getTransaction", params).await?;
        if result.is_null() {
            return Ok(None);
        }

        let raw: RawTransaction =
            serde_json::from_value(result).map_err(|e| format!("Invalid getTransaction response: {}", e))?;
        let (failed, log_messages) = match raw.meta {
            Some(meta) => (meta.err.is_some(), meta.log_messages.unwrap_or_default()),
            None => {
                log::warn!("[{}] Transaction {} has no meta", self.rpc.label(), signature);
                (false, Vec::new())
            }
        };

        Ok(Some(TransactionInfo {
            slot: raw.slot,
            failed,
            log_messages,
        }))
    }

    async fn account_data(&self, address: &str) -> Result<Option<Vec<u8>>, String> {
        let params = json!([address, { "encoding": "base64", "commitment": COMMITMENT }]);
        let result = self.rpc.call("getAccountInfo", params).await?;

        let response: AccountInfoResponse =
            serde_json::from_value(result).map_err(|e| format!("Invalid getAccountInfo response: {}", e))?;
        match response.value {
            Some(account) => BASE64
                .decode(account.data.0)
                .map(Some)
                .map_err(|e| format!("Invalid account data for {}: {}", address, e)),
            None => Ok(None),
        }
    }
}
