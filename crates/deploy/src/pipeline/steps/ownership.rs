use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    abi::FunctionSig,
    pipeline::{PipelineStep, RunContext, Script, StepKind, value::contract_name},
    record::OwnershipTransfer,
};

fn default_signature() -> String {
    "transferOwnership(address)".to_string()
}

/// Hand administrative control of contracts to a long-term holder.
///
/// Terminal for each target: no later step may act on a target with the deployer's
/// authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOwnershipStep {
    pub targets: Vec<String>,
    pub new_owner: toml::Value,
    /// Setter taking the new owner, e.g. `setTeam(address)` for role-based contracts.
    #[serde(default = "default_signature")]
    pub signature: String,
    /// Read `owner()` back after each transfer.
    #[serde(default)]
    pub check: bool,
}

impl PipelineStep for TransferOwnershipStep {
    const KIND: StepKind = StepKind::TransferOwnership;

    fn requires(&self) -> Vec<String> {
        self.targets
            .iter()
            .map(|target| contract_name(target).to_string())
            .collect()
    }

    fn values(&self) -> Vec<&toml::Value> {
        vec![&self.new_owner]
    }

    fn authority_targets(&self) -> Vec<String> {
        self.requires()
    }

    fn validate(&self, _script: &Script) -> Result<(), String> {
        if self.targets.is_empty() {
            return Err("`targets` must not be empty".to_string());
        }
        let sig = FunctionSig::parse(&self.signature).map_err(|e| format!("{:#}", e))?;
        if sig.inputs != [DynSolType::Address] {
            return Err(format!(
                "ownership setter {} must take a single address",
                sig.canonical()
            ));
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!("{} on {}", self.signature, self.requires().join(", "))
    }

    async fn run(&self, id: &str, ctx: &mut RunContext) -> Result<()> {
        let sig = FunctionSig::parse(&self.signature)?;
        let new_owner = ctx
            .resolver()
            .address(&self.new_owner)
            .context("Invalid new owner")?;
        let owner_sig = FunctionSig::parse("owner() returns (address)")?;

        for target in self.requires() {
            if ctx
                .book
                .ownership
                .get(&target)
                .is_some_and(|transfer| transfer.step == id)
            {
                tracing::info!(step = %id, contract = %target, "Ownership already transferred, skipping");
                continue;
            }

            let address = ctx.address_of(&target)?;
            let data = sig.encode_call(vec![DynSolValue::Address(new_owner)])?;

            tracing::info!(step = %id, contract = %target, %new_owner, "Transferring ownership");

            let receipt = ctx
                .transact(address, data)
                .await
                .with_context(|| format!("Ownership transfer of {} failed", target))?;

            if self.check {
                let owner = ctx.read(address, &owner_sig, Vec::new()).await?;
                if owner.first() != Some(&DynSolValue::Address(new_owner)) {
                    anyhow::bail!(
                        "{} reports owner {:?} after transfer to {}",
                        target,
                        owner.first(),
                        new_owner
                    );
                }
            }

            ctx.book.record_transfer(
                &target,
                OwnershipTransfer {
                    new_owner,
                    step: id.to_string(),
                    tx_hash: receipt.transaction_hash,
                },
            );

            tracing::info!(step = %id, contract = %target, %new_owner, "Ownership transferred");
        }

        Ok(())
    }
}
