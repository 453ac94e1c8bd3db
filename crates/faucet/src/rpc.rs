//! Chain RPC client

use async_trait::async_trait;
use drip_common::types::{Address, Hash};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("unexpected {method} response: {detail}")]
    Decode { method: String, detail: String },
}

pub type RpcResult<T> = Result<T, RpcError>;

/// The parts of a block header the faucet reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    /// Absent on networks without a fee market
    pub base_fee_per_gas: Option<u128>,
    /// Unix seconds
    pub timestamp: u64,
}

/// Call used to simulate a transfer for gas estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: u128,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

impl CallRequest {
    fn to_json(&self) -> Value {
        let mut call = json!({
            "from": self.from.to_checksum(),
            "to": self.to.to_checksum(),
            "value": to_quantity(self.value),
        });
        if let Some(max_fee) = self.max_fee_per_gas {
            call["maxFeePerGas"] = json!(to_quantity(max_fee));
        }
        if let Some(tip) = self.max_priority_fee_per_gas {
            call["maxPriorityFeePerGas"] = json!(to_quantity(tip));
        }
        call
    }
}

/// Outbound interface to the ledger network.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> RpcResult<u64>;

    /// Next nonce, counting transactions still in the pool.
    async fn pending_nonce(&self, address: &Address) -> RpcResult<u64>;

    async fn suggest_gas_tip_cap(&self) -> RpcResult<u128>;

    async fn suggest_gas_price(&self) -> RpcResult<u128>;

    async fn latest_block(&self) -> RpcResult<BlockHeader>;

    async fn estimate_gas(&self, call: &CallRequest) -> RpcResult<u64>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> RpcResult<Hash>;
}

/// HTTP JSON-RPC client
pub struct JsonRpcClient {
    rpc_url: String,
    client: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(rpc_url: impl Into<String>) -> RpcResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            rpc_url: rpc_url.into(),
            client,
        })
    }

    async fn call(&self, method: &str, params: Value) -> RpcResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        trace!(method, "rpc call");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("{}: {}", method, e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Decode {
                method: method.to_string(),
                detail: e.to_string(),
            })?;

        if let Some(error) = body.get("error") {
            return Err(RpcError::Node {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            });
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn call_quantity(&self, method: &str, params: Value) -> RpcResult<u128> {
        let result = self.call(method, params).await?;
        parse_quantity(method, &result)
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn chain_id(&self) -> RpcResult<u64> {
        let id = self.call_quantity("eth_chainId", json!([])).await?;
        narrow("eth_chainId", id)
    }

    async fn pending_nonce(&self, address: &Address) -> RpcResult<u64> {
        let nonce = self
            .call_quantity(
                "eth_getTransactionCount",
                json!([address.to_checksum(), "pending"]),
            )
            .await?;
        narrow("eth_getTransactionCount", nonce)
    }

    async fn suggest_gas_tip_cap(&self) -> RpcResult<u128> {
        self.call_quantity("eth_maxPriorityFeePerGas", json!([])).await
    }

    async fn suggest_gas_price(&self) -> RpcResult<u128> {
        self.call_quantity("eth_gasPrice", json!([])).await
    }

    async fn latest_block(&self) -> RpcResult<BlockHeader> {
        const METHOD: &str = "eth_getBlockByNumber";
        let block = self.call(METHOD, json!(["latest", false])).await?;
        if block.is_null() {
            return Err(RpcError::Decode {
                method: METHOD.to_string(),
                detail: "no latest block".to_string(),
            });
        }

        let field = |name: &str| -> RpcResult<u64> {
            let value = block.get(name).ok_or_else(|| RpcError::Decode {
                method: METHOD.to_string(),
                detail: format!("missing {}", name),
            })?;
            narrow(METHOD, parse_quantity(METHOD, value)?)
        };

        let base_fee_per_gas = match block.get("baseFeePerGas") {
            Some(value) if !value.is_null() => Some(parse_quantity(METHOD, value)?),
            _ => None,
        };

        Ok(BlockHeader {
            number: field("number")?,
            base_fee_per_gas,
            timestamp: field("timestamp")?,
        })
    }

    async fn estimate_gas(&self, call: &CallRequest) -> RpcResult<u64> {
        let gas = self
            .call_quantity("eth_estimateGas", json!([call.to_json()]))
            .await?;
        narrow("eth_estimateGas", gas)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> RpcResult<Hash> {
        const METHOD: &str = "eth_sendRawTransaction";
        let result = self
            .call(METHOD, json!([format!("0x{}", hex::encode(raw))]))
            .await?;

        let decode_err = |detail: String| RpcError::Decode {
            method: METHOD.to_string(),
            detail,
        };
        let hash = result
            .as_str()
            .ok_or_else(|| decode_err(result.to_string()))?;
        let bytes = hex::decode(hash.trim_start_matches("0x")).map_err(|e| decode_err(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(decode_err(format!("hash of {} bytes", bytes.len())));
        }
        Ok(Hash::from_slice(&bytes))
    }
}

/// Parses a JSON-RPC hex quantity such as `"0x1a"`.
pub fn parse_quantity(method: &str, value: &Value) -> RpcResult<u128> {
    let decode_err = |detail: String| RpcError::Decode {
        method: method.to_string(),
        detail,
    };

    let text = value
        .as_str()
        .ok_or_else(|| decode_err(format!("expected hex quantity, got {}", value)))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| decode_err(format!("missing 0x prefix: {}", text)))?;
    if digits.is_empty() {
        return Err(decode_err("empty quantity".to_string()));
    }
    u128::from_str_radix(digits, 16).map_err(|e| decode_err(format!("{}: {}", text, e)))
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

fn narrow(method: &str, value: u128) -> RpcResult<u64> {
    u64::try_from(value).map_err(|_| RpcError::Decode {
        method: method.to_string(),
        detail: format!("{} does not fit in 64 bits", value),
    })
}
