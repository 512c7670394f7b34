use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    abi::{encode_constructor_args, format_value, parse_types},
    confirm::wait_for_deployment,
    pipeline::{PipelineStep, RunContext, Script, StepKind},
    record::{ConstructorArgs, DeploymentRecord, RecordOrigin},
    rpc::TxRequest,
};

/// Deploy a contract from its compiled artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployStep {
    /// Artifact name, or `path/File.sol:Name`.
    pub artifact: String,
    /// Record name; defaults to the contract name of the artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Constructor parameter types; read from the artifact ABI when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<Vec<String>>,
    #[serde(default)]
    pub args: Vec<toml::Value>,
}

impl DeployStep {
    pub fn record_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.artifact
                .rsplit_once(':')
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| self.artifact.clone())
        })
    }
}

impl PipelineStep for DeployStep {
    const KIND: StepKind = StepKind::Deploy;

    fn produces(&self, _script: &Script) -> Vec<String> {
        vec![self.record_name()]
    }

    fn values(&self) -> Vec<&toml::Value> {
        self.args.iter().collect()
    }

    fn validate(&self, _script: &Script) -> Result<(), String> {
        if let Some(types) = &self.constructor {
            parse_types(types).map_err(|e| format!("{:#}", e))?;
            if types.len() != self.args.len() {
                return Err(format!(
                    "constructor declares {} parameter(s) but {} argument(s) are given",
                    types.len(),
                    self.args.len()
                ));
            }
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!("deploy {} as {}", self.artifact, self.record_name())
    }

    async fn run(&self, id: &str, ctx: &mut RunContext) -> Result<()> {
        let name = self.record_name();
        let artifact = ctx.artifacts.load(&self.artifact)?;

        let types = match &self.constructor {
            Some(types) => parse_types(types)?,
            None => artifact.constructor_types()?,
        };
        let values = ctx
            .resolver()
            .resolve_all(&types, &self.args)
            .with_context(|| format!("Invalid constructor arguments for {}", name))?;

        let rendered = values.iter().map(format_value).collect::<Vec<_>>();
        let encoded = encode_constructor_args(values);

        let mut init_code = artifact.bytecode.to_vec();
        init_code.extend_from_slice(&encoded);

        tracing::info!(step = %id, contract = %name, args = ?rendered, "Deploying contract");

        let tx_hash = ctx
            .sender
            .submit(&ctx.rpc, TxRequest::create(Bytes::from(init_code)))
            .await
            .with_context(|| format!("Failed to submit deployment of {}", name))?;

        let (address, receipt) = wait_for_deployment(&ctx.rpc, tx_hash, &ctx.confirmation).await?;

        let code = ctx.rpc.code_at(address).await?;
        if code.is_empty() {
            anyhow::bail!("No code at {} after deploying {}", address, name);
        }

        ctx.book.insert(DeploymentRecord {
            name: name.clone(),
            artifact: Some(self.artifact.clone()),
            address,
            constructor_args: Some(ConstructorArgs {
                types: types.iter().map(|ty| ty.sol_type_name().into_owned()).collect(),
                values: rendered,
                encoded,
            }),
            origin: RecordOrigin::Deployed {
                step: id.to_string(),
                tx_hash,
                block_number: receipt.block(),
            },
            recorded_at: Utc::now(),
        });

        tracing::info!(step = %id, contract = %name, %address, %tx_hash, "Contract deployed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_name_defaults() {
        let step = DeployStep {
            artifact: "contracts/plugins/LPPluginFactory.sol:LPPluginFactory".to_string(),
            name: None,
            constructor: None,
            args: vec![],
        };
        assert_eq!(step.record_name(), "LPPluginFactory");

        let named = DeployStep {
            name: Some("WethLPFactory".to_string()),
            ..step
        };
        assert_eq!(named.record_name(), "WethLPFactory");
    }

    #[test]
    fn test_validate_constructor_arity() {
        let step = DeployStep {
            artifact: "Voter".to_string(),
            name: None,
            constructor: Some(vec!["address".to_string(), "uint256".to_string()]),
            args: vec![toml::Value::String("@Treasury".to_string())],
        };
        let script = Script::from_toml_str("name = \"t\"").unwrap();
        assert!(step.validate(&script).is_err());
    }
}
