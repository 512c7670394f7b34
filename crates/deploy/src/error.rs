//! Typed errors for the failures callers need to branch on.
//!
//! Everything else is propagated as [`anyhow::Error`] with context, the same way the
//! top-level process handler reports it.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};

/// A JSON-RPC endpoint rejected a request.
///
/// Reverts, authorization failures and invalid arguments all surface this way. The
/// harness uses the message to match expected revert reasons.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("{method} rejected by the node: {message}")]
    Rejected { method: String, message: String },

    #[error("{method} returned no result")]
    EmptyResult { method: String },
}

impl LedgerError {
    /// The rejection message reported by the node, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => Some(message),
            Self::EmptyResult { .. } => None,
        }
    }
}

/// Failure to observe a submitted transaction as confirmed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationError {
    #[error("transaction {tx_hash} not confirmed after {waited:?}")]
    Timeout { tx_hash: B256, waited: Duration },

    #[error("transaction {tx_hash} reverted in block {block_number:?}")]
    Reverted {
        tx_hash: B256,
        block_number: Option<u64>,
    },

    #[error("transaction {tx_hash} was confirmed without a contract address")]
    MissingContractAddress { tx_hash: B256 },
}

/// Plan validation failures, raised before anything is submitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("step id `{0}` is declared more than once")]
    DuplicateStep(String),

    #[error("step `{0}` is selected but not declared in the script")]
    UnknownStep(String),

    #[error("step `{step}` needs contract `{contract}`, which no earlier step produces")]
    MissingDependency { step: String, contract: String },

    #[error("step `{step}` references setting `{key}`, which the script never declares")]
    UnknownSetting { step: String, key: String },

    #[error(
        "step `{step}` acts on `{contract}` with the deployer key after its ownership was transferred by `{transfer_step}`"
    )]
    AfterOwnershipTransfer {
        step: String,
        contract: String,
        transfer_step: String,
    },

    #[error("step `{step}`: verification arguments for `{contract}` differ from the deployment arguments")]
    ConstructorArgsMismatch { step: String, contract: String },

    #[error("step `{step}`: {reason}")]
    Invalid { step: String, reason: String },
}

/// Failures of the block-explorer API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExplorerError {
    #[error("explorer rejected the request: {0}")]
    Rejected(String),

    #[error("verification of {address} failed: {reason}")]
    VerificationFailed { address: Address, reason: String },

    #[error("verification of {address} still pending after {attempts} status checks")]
    StillPending { address: Address, attempts: usize },
}
