//! EVM JSON-RPC client: `eth_blockNumber`, `eth_getLogs` and `eth_call`

use async_trait::async_trait;
use ethers::types::{Address, Log, H256, U64};
use serde_json::{json, Value};

use super::EvmSource;
use crate::jsonrpc::JsonRpcClient;

pub struct EvmRpc {
    rpc: JsonRpcClient,
}

impl EvmRpc {
    pub fn new(rpc_url: &str, label: &str) -> Result<Self, String> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc_url, label)?,
        })
    }

    async fn call_non_null(&self, method: &str, params: Value) -> Result<Value, String> {
        match self.rpc.call(method, params).await? {
            Value::Null => Err(format!("{} returned null result", method)),
            value => Ok(value),
        }
    }
}

#[async_trait]
impl EvmSource for EvmRpc {
    async fn block_number(&self) -> Result<u64, String> {
        let result = self.call_non_null("eth_blockNumber", json!([])).await?;
        let height: U64 =
            serde_json::from_value(result).map_err(|e| format!("Invalid eth_blockNumber response: {}", e))?;
        Ok(height.as_u64())
    }

    async fn get_logs(&self, addresses: &[Address], topics: &[H256], from: u64, to: u64) -> Result<Vec<Log>, String> {
        let params = json!([{
            "address": addresses,
            "topics": [topics],
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
        }]);
        let result = self.call_non_null("eth_getLogs", params).await?;
        serde_json::from_value(result).map_err(|e| format!("Invalid eth_getLogs response: {}", e))
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, String> {
        let params = json!([
            {
                "to": format!("{:?}", to),
                "data": format!("0x{}", hex::encode(&data)),
            },
            "latest"
        ]);
        let result = self.call_non_null("eth_call", params).await?;

        let hex_str = result
            .as_str()
            .ok_or_else(|| "Invalid eth_call response".to_string())?;
        hex::decode(hex_str.trim_start_matches("0x")).map_err(|e| format!("Failed to decode eth_call result: {}", e))
    }
}
