//! Waiting for submitted transactions to be confirmed.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use anyhow::Result;
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfirmationError,
    rpc::{EthRpc, TransactionReceipt},
};

/// Receipt polling bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    /// Delay between two receipt lookups.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Maximum time to wait for a receipt.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

impl ConfirmationPolicy {
    fn max_polls(&self) -> usize {
        let interval = self.poll_interval.as_millis().max(1);
        (self.timeout.as_millis() / interval) as usize + 1
    }
}

#[derive(Debug, thiserror::Error)]
#[error("receipt not available yet")]
struct Pending;

/// Poll for the receipt of `tx_hash` until it shows up or the policy times out.
///
/// A receipt with a failed status is reported as [`ConfirmationError::Reverted`].
pub async fn wait_for_receipt(
    rpc: &EthRpc,
    tx_hash: B256,
    policy: &ConfirmationPolicy,
) -> Result<TransactionReceipt> {
    let poll = move || async move {
        match rpc.transaction_receipt(tx_hash).await? {
            Some(receipt) => Ok(receipt),
            None => Err(anyhow::Error::new(Pending)),
        }
    };

    let backoff = ConstantBuilder::default()
        .with_delay(policy.poll_interval)
        .with_max_times(policy.max_polls());

    let polled = tokio::time::timeout(
        policy.timeout,
        poll.retry(backoff)
            .when(|e| e.is::<Pending>())
            .notify(|_, delay| tracing::trace!(%tx_hash, ?delay, "Receipt not available yet")),
    )
    .await;

    let timed_out = ConfirmationError::Timeout {
        tx_hash,
        waited: policy.timeout,
    };

    let receipt = match polled {
        Err(_) => return Err(timed_out.into()),
        Ok(Err(e)) if e.is::<Pending>() => return Err(timed_out.into()),
        Ok(Err(e)) => return Err(e),
        Ok(Ok(receipt)) => receipt,
    };

    if !receipt.succeeded() {
        return Err(ConfirmationError::Reverted {
            tx_hash,
            block_number: receipt.block(),
        }
        .into());
    }

    tracing::debug!(
        %tx_hash,
        block_number = ?receipt.block(),
        gas_used = ?receipt.gas_used,
        "Transaction confirmed"
    );

    Ok(receipt)
}

/// Wait for a contract creation and return the created address.
pub async fn wait_for_deployment(
    rpc: &EthRpc,
    tx_hash: B256,
    policy: &ConfirmationPolicy,
) -> Result<(Address, TransactionReceipt)> {
    let receipt = wait_for_receipt(rpc, tx_hash, policy).await?;

    match receipt.contract_address {
        Some(address) if address != Address::ZERO => Ok((address, receipt)),
        _ => Err(ConfirmationError::MissingContractAddress { tx_hash }.into()),
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
