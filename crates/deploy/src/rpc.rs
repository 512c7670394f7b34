//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::{sync::Arc, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, U64, U128, U256};
use anyhow::Context;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::error::LedgerError;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between polling attempts when waiting for readiness.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and return the raw `result` value.
///
/// Node-side rejections (reverts, authorization failures, bad arguments) are returned as
/// [`LedgerError::Rejected`] so callers can tell them apart from transport failures.
pub async fn json_rpc_request(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<Value, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        return Err(LedgerError::Rejected {
            method: method.to_string(),
            message: error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
                .to_string(),
        }
        .into());
    }

    result.get("result").cloned().ok_or_else(|| {
        LedgerError::EmptyResult {
            method: method.to_string(),
        }
        .into()
    })
}

/// Make a JSON-RPC call and deserialize the result.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let result_value = json_rpc_request(client, url, method, params).await?;

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Wait for a service to be ready by repeatedly calling a check function.
///
/// # Arguments
/// * `name` - Name of the service (for error messages)
/// * `timeout_secs` - Maximum time to wait in seconds
/// * `check_fn` - Function that returns Ok(()) when the service is ready
pub async fn wait_until_ready<F, Fut>(
    name: &str,
    timeout_secs: u64,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let max_duration = Duration::from_secs(timeout_secs);

    loop {
        if start.elapsed() > max_duration {
            anyhow::bail!("Timeout waiting for {} to be ready", name);
        }

        match check_fn().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::trace!(error = %e, service = %name, "Readiness check failed, retrying...");
            }
        }

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}

/// A JSON-RPC transport.
///
/// [`HttpTransport`] is the production implementation; tests plug in an in-process ledger.
pub trait Transport: Send + Sync {
    /// Send one request and return its `result` value.
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, anyhow::Error>>;
}

/// JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(url: Url) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
            url,
        })
    }
}

impl Transport for HttpTransport {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, anyhow::Error>> {
        Box::pin(json_rpc_request(
            &self.client,
            self.url.as_str(),
            method,
            params,
        ))
    }
}

/// A transaction as submitted through `eth_sendTransaction`, `eth_call` or `eth_estimateGas`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// `None` creates a contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
}

impl TxRequest {
    /// A contract creation carrying init code.
    pub fn create(init_code: Bytes) -> Self {
        Self {
            data: init_code,
            ..Default::default()
        }
    }

    /// A call to an existing contract.
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to: Some(to),
            data,
            ..Default::default()
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

/// The subset of a transaction receipt this crate relies on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U64>,
}

impl TransactionReceipt {
    /// Pre-byzantium receipts carry no status; they are treated as successful.
    pub fn succeeded(&self) -> bool {
        self.status.is_none_or(|status| status != U64::ZERO)
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }
}

/// Block header fields used by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BlockHeader {
    pub number: U64,
    pub timestamp: U64,
}

/// Typed Ethereum JSON-RPC client.
#[derive(Clone)]
pub struct EthRpc {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for EthRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthRpc").finish_non_exhaustive()
    }
}

impl EthRpc {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Client for an HTTP JSON-RPC endpoint.
    pub fn http(url: Url) -> Result<Self, anyhow::Error> {
        Ok(Self::new(Arc::new(HttpTransport::new(url)?)))
    }

    /// Make a request and deserialize the result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, anyhow::Error> {
        let value = self.transport.request(method, params).await?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to deserialize {} result", method))
    }

    pub async fn chain_id(&self) -> Result<u64, anyhow::Error> {
        let id: U64 = self.request("eth_chainId", vec![]).await?;
        Ok(id.to())
    }

    /// Accounts unlocked on the node (anvil exposes its funded dev accounts here).
    pub async fn accounts(&self) -> Result<Vec<Address>, anyhow::Error> {
        self.request("eth_accounts", vec![]).await
    }

    /// The next nonce for `address`, including pending transactions.
    pub async fn transaction_count(&self, address: Address) -> Result<u64, anyhow::Error> {
        let count: U64 = self
            .request(
                "eth_getTransactionCount",
                vec![serde_json::json!(address), serde_json::json!("pending")],
            )
            .await?;
        Ok(count.to())
    }

    pub async fn gas_price(&self) -> Result<u128, anyhow::Error> {
        let price: U128 = self.request("eth_gasPrice", vec![]).await?;
        Ok(price.to())
    }

    pub async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, anyhow::Error> {
        let gas: U64 = self
            .request("eth_estimateGas", vec![serde_json::to_value(tx)?])
            .await?;
        Ok(gas.to())
    }

    /// Submit a transaction signed by the node (unlocked account).
    pub async fn send_transaction(&self, tx: &TxRequest) -> Result<B256, anyhow::Error> {
        self.request("eth_sendTransaction", vec![serde_json::to_value(tx)?])
            .await
    }

    /// Submit a transaction signed locally.
    pub async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, anyhow::Error> {
        self.request("eth_sendRawTransaction", vec![serde_json::json!(raw)])
            .await
    }

    pub async fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TransactionReceipt>, anyhow::Error> {
        self.request("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await
    }

    /// Execute a read-only call against the latest block.
    pub async fn call(&self, tx: &TxRequest) -> Result<Bytes, anyhow::Error> {
        self.request(
            "eth_call",
            vec![serde_json::to_value(tx)?, serde_json::json!("latest")],
        )
        .await
    }

    pub async fn code_at(&self, address: Address) -> Result<Bytes, anyhow::Error> {
        self.request(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    pub async fn latest_block(&self) -> Result<BlockHeader, anyhow::Error> {
        let block: Option<BlockHeader> = self
            .request(
                "eth_getBlockByNumber",
                vec![serde_json::json!("latest"), serde_json::json!(false)],
            )
            .await?;
        block.context("Node returned no latest block")
    }

    /// Pin the timestamp of the next mined block (anvil/hardhat only).
    pub async fn set_next_block_timestamp(&self, timestamp: u64) -> Result<(), anyhow::Error> {
        let _: Value = self
            .request("evm_setNextBlockTimestamp", vec![serde_json::json!(timestamp)])
            .await?;
        Ok(())
    }

    /// Mine one block (anvil/hardhat only).
    pub async fn mine(&self) -> Result<(), anyhow::Error> {
        let _: Value = self.request("evm_mine", vec![]).await?;
        Ok(())
    }
}
