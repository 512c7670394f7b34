use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    abi::{encode_constructor_args, parse_types},
    error::PlanError,
    explorer::{VerificationOutcome, VerificationRequest},
    pipeline::{PipelineStep, RunContext, Script, StepKind, value::contract_name},
};

/// Register a contract's source with the block explorer.
///
/// Constructor arguments come from the deployment record. `args` may only be given for
/// contracts whose record lacks them (attached or factory-created contracts); when both
/// exist they must encode to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyStep {
    pub contract: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<toml::Value>>,
}

impl PipelineStep for VerifyStep {
    const KIND: StepKind = StepKind::Verify;

    fn requires(&self) -> Vec<String> {
        vec![contract_name(&self.contract).to_string()]
    }

    fn values(&self) -> Vec<&toml::Value> {
        self.args.iter().flatten().collect()
    }

    fn validate(&self, _script: &Script) -> Result<(), String> {
        if let Some(types) = &self.constructor {
            parse_types(types).map_err(|e| format!("{:#}", e))?;
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!("verify {}", contract_name(&self.contract))
    }

    async fn run(&self, id: &str, ctx: &mut RunContext) -> Result<()> {
        let name = contract_name(&self.contract);
        let verifier = ctx
            .verifier
            .clone()
            .context("No explorer is configured for this network (missing explorer API URL or key)")?;

        let address = ctx.address_of(name)?;
        let record = ctx.book.get(name).cloned();

        let artifact_name = self
            .artifact
            .clone()
            .or_else(|| record.as_ref().and_then(|r| r.artifact.clone()))
            .with_context(|| format!("No artifact known for {}; set `artifact` on the step", name))?;
        let artifact = ctx.artifacts.load(&artifact_name)?;

        let explicit = match &self.args {
            Some(args) => {
                let types = match &self.constructor {
                    Some(types) => parse_types(types)?,
                    None => artifact.constructor_types()?,
                };
                let values = ctx
                    .resolver()
                    .resolve_all(&types, args)
                    .with_context(|| format!("Invalid constructor arguments for {}", name))?;
                Some(encode_constructor_args(values))
            }
            None => None,
        };

        let recorded = record.and_then(|r| r.constructor_args).map(|args| args.encoded);

        let constructor_args = match (recorded, explicit) {
            (Some(recorded), Some(explicit)) if recorded != explicit => {
                return Err(PlanError::ConstructorArgsMismatch {
                    step: id.to_string(),
                    contract: name.to_string(),
                }
                .into());
            }
            (Some(recorded), _) => recorded,
            (None, Some(explicit)) => explicit,
            (None, None) if artifact.constructor_types()?.is_empty() => Default::default(),
            (None, None) => anyhow::bail!(
                "{} has no recorded constructor arguments; provide `args` on the verify step",
                name
            ),
        };

        let build_info = artifact.build_info()?;
        let request = VerificationRequest {
            address,
            contract_name: artifact.qualified_name(),
            compiler_version: build_info.compiler_version(),
            source: serde_json::to_string(&build_info.input)
                .context("Failed to serialize standard JSON input")?,
            constructor_args,
        };

        tracing::info!(step = %id, contract = %name, %address, "Submitting source verification");

        let outcome = verifier.verify(&request).await?;
        match outcome {
            VerificationOutcome::Verified => {
                tracing::info!(step = %id, contract = %name, %address, "Contract verified")
            }
            VerificationOutcome::AlreadyVerified => {
                tracing::info!(step = %id, contract = %name, %address, "Contract already verified")
            }
        }

        Ok(())
    }
}
