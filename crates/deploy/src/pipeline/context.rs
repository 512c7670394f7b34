//! State threaded through the steps of one run.

use std::{collections::BTreeMap, sync::Arc};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
};
use anyhow::{Context, Result};

use super::{
    script::Script,
    value::{AddressLookup, ValueResolver, contract_name},
};
use crate::{
    abi::FunctionSig,
    artifacts::ArtifactStore,
    confirm::{ConfirmationPolicy, wait_for_receipt},
    explorer::SourceVerifier,
    record::DeploymentBook,
    rpc::{EthRpc, TransactionReceipt, TxRequest},
    signer::Sender,
};

/// Everything a step may read or update.
///
/// Steps never keep state of their own: addresses produced by earlier steps live in
/// `book`, and are resolved through it.
pub struct RunContext {
    pub script: Script,
    pub network: String,
    pub rpc: EthRpc,
    pub sender: Sender,
    pub artifacts: ArtifactStore,
    pub verifier: Option<Arc<dyn SourceVerifier>>,
    pub confirmation: ConfirmationPolicy,
    pub book: DeploymentBook,
    /// Additional `@Name` bindings, such as harness actors.
    pub known: BTreeMap<String, Address>,
}

impl AddressLookup for RunContext {
    fn lookup(&self, name: &str) -> Option<Address> {
        self.book
            .address_of(name)
            .or_else(|| self.script.contracts.get(name).copied())
            .or_else(|| self.known.get(name).copied())
    }
}

impl RunContext {
    pub fn resolver(&self) -> ValueResolver<'_> {
        ValueResolver::new(&self.script.settings, self)
    }

    /// Address of a contract referenced by name, with or without a leading `@`.
    pub fn address_of(&self, name: &str) -> Result<Address> {
        let name = contract_name(name);
        self.lookup(name)
            .with_context(|| format!("Contract `{}` has no known address", name))
    }

    /// Submit a mutating call from the deployer and wait for it to be confirmed.
    pub async fn transact(&self, to: Address, data: Bytes) -> Result<TransactionReceipt> {
        let tx_hash = self
            .sender
            .submit(&self.rpc, TxRequest::call(to, data))
            .await?;
        tracing::debug!(%tx_hash, %to, "Transaction submitted");

        wait_for_receipt(&self.rpc, tx_hash, &self.confirmation).await
    }

    /// Read-only call from the deployer's address.
    pub async fn read(
        &self,
        to: Address,
        sig: &FunctionSig,
        args: Vec<DynSolValue>,
    ) -> Result<Vec<DynSolValue>> {
        let data = sig.encode_call(args)?;
        let output = self
            .rpc
            .call(&TxRequest::call(to, data).from(self.sender.address()))
            .await
            .with_context(|| format!("Call to {} on {} failed", sig, to))?;

        sig.decode_output(&output)
    }
}
