use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    abi::{FunctionSig, format_value},
    pipeline::{PipelineStep, RunContext, Script, StepKind, value::contract_name},
};

/// A single mutating call from the deployer, used to wire or initialize contracts.
///
/// The orchestrator does not guard against repeating a call; whether that is a no-op or
/// a revert is up to the target contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStep {
    pub target: String,
    pub signature: String,
    #[serde(default)]
    pub args: Vec<toml::Value>,
}

impl PipelineStep for CallStep {
    const KIND: StepKind = StepKind::Call;

    fn requires(&self) -> Vec<String> {
        vec![contract_name(&self.target).to_string()]
    }

    fn values(&self) -> Vec<&toml::Value> {
        self.args.iter().collect()
    }

    fn authority_targets(&self) -> Vec<String> {
        self.requires()
    }

    fn validate(&self, _script: &Script) -> Result<(), String> {
        let sig = FunctionSig::parse(&self.signature).map_err(|e| format!("{:#}", e))?;
        if sig.inputs.len() != self.args.len() {
            return Err(format!(
                "{} takes {} argument(s) but {} are given",
                sig.canonical(),
                sig.inputs.len(),
                self.args.len()
            ));
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!("{}.{}", contract_name(&self.target), self.signature)
    }

    async fn run(&self, id: &str, ctx: &mut RunContext) -> Result<()> {
        let target = contract_name(&self.target);
        let address = ctx.address_of(target)?;
        let sig = FunctionSig::parse(&self.signature)?;

        let values = ctx
            .resolver()
            .resolve_all(&sig.inputs, &self.args)
            .with_context(|| format!("Invalid arguments for {}", sig))?;
        let rendered = values.iter().map(format_value).collect::<Vec<_>>();
        let data = sig.encode_call(values)?;

        tracing::info!(step = %id, contract = %target, call = %sig, args = ?rendered, "Calling contract");

        let receipt = ctx
            .transact(address, data)
            .await
            .with_context(|| format!("{}.{} failed", target, sig))?;

        tracing::info!(
            step = %id,
            contract = %target,
            tx_hash = %receipt.transaction_hash,
            "Call confirmed"
        );

        Ok(())
    }
}
