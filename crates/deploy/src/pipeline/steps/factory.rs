use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::Address,
};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    abi::{FunctionSig, format_value},
    pipeline::{PipelineStep, RunContext, Script, StepKind, value::contract_name},
    record::{DeploymentRecord, RecordOrigin},
};

/// Create a contract through a factory, then read its address back.
///
/// ```toml
/// kind = "factory"
/// factory = "LPPluginFactory"
/// signature = "createPlugin(address,string)"
/// args = ["${LP}", "${SYMBOL}"]
/// read = "last_plugin()"
/// name = "LPPlugin"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactoryStep {
    pub factory: String,
    pub signature: String,
    #[serde(default)]
    pub args: Vec<toml::Value>,
    /// View function returning the created address.
    pub read: String,
    /// Record name for the created contract.
    pub name: String,
    /// Artifact of the created contract, for later verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl FactoryStep {
    fn read_sig(&self) -> Result<FunctionSig> {
        let mut sig = FunctionSig::parse(&self.read)?;
        if sig.outputs.is_empty() {
            sig.outputs = vec![DynSolType::Address];
        }
        Ok(sig)
    }
}

impl PipelineStep for FactoryStep {
    const KIND: StepKind = StepKind::Factory;

    fn produces(&self, _script: &Script) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn requires(&self) -> Vec<String> {
        vec![contract_name(&self.factory).to_string()]
    }

    fn values(&self) -> Vec<&toml::Value> {
        self.args.iter().collect()
    }

    fn authority_targets(&self) -> Vec<String> {
        self.requires()
    }

    fn validate(&self, _script: &Script) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("`name` must not be empty".to_string());
        }

        let sig = FunctionSig::parse(&self.signature).map_err(|e| format!("{:#}", e))?;
        if sig.inputs.len() != self.args.len() {
            return Err(format!(
                "{} takes {} argument(s) but {} are given",
                sig.canonical(),
                sig.inputs.len(),
                self.args.len()
            ));
        }

        let read = self.read_sig().map_err(|e| format!("{:#}", e))?;
        if !read.inputs.is_empty() {
            return Err(format!("`read` function {} must take no arguments", read.canonical()));
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!(
            "{}.{} then {} -> {}",
            contract_name(&self.factory),
            self.signature,
            self.read,
            self.name
        )
    }

    async fn run(&self, id: &str, ctx: &mut RunContext) -> Result<()> {
        let factory_name = contract_name(&self.factory);
        let factory = ctx.address_of(factory_name)?;
        let sig = FunctionSig::parse(&self.signature)?;
        let read = self.read_sig()?;

        let values = ctx
            .resolver()
            .resolve_all(&sig.inputs, &self.args)
            .with_context(|| format!("Invalid arguments for {}", sig))?;
        let rendered = values.iter().map(format_value).collect::<Vec<_>>();

        tracing::info!(step = %id, factory = %factory_name, call = %sig, args = ?rendered, "Calling factory");

        let receipt = ctx
            .transact(factory, sig.encode_call(values)?)
            .await
            .with_context(|| format!("{}.{} failed", factory_name, sig))?;

        let created = match ctx.read(factory, &read, Vec::new()).await?.first() {
            Some(DynSolValue::Address(address)) => *address,
            other => anyhow::bail!("{} returned {:?}, expected an address", read, other),
        };

        if created == Address::ZERO {
            anyhow::bail!("{}.{} returned the zero address", factory_name, read.canonical());
        }
        if created == factory {
            anyhow::bail!(
                "{}.{} returned the factory's own address",
                factory_name,
                read.canonical()
            );
        }

        ctx.book.insert(DeploymentRecord {
            name: self.name.clone(),
            artifact: self.artifact.clone(),
            address: created,
            constructor_args: None,
            origin: RecordOrigin::FactoryCreated {
                step: id.to_string(),
                factory,
                tx_hash: receipt.transaction_hash,
            },
            recorded_at: Utc::now(),
        });

        tracing::info!(step = %id, contract = %self.name, address = %created, "Contract created by factory");

        Ok(())
    }
}
