use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    pipeline::{PipelineStep, RunContext, Script, StepKind},
    record::{DeploymentRecord, RecordOrigin},
};

/// Record contracts deployed elsewhere, from the script's `[contracts]` table.
///
/// Every contract in the table is attached when `names` is empty. Each attached address
/// must hold code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachStep {
    #[serde(default)]
    pub names: Vec<String>,
}

impl AttachStep {
    fn selected(&self, script: &Script) -> Vec<String> {
        if self.names.is_empty() {
            script.contracts.keys().cloned().collect()
        } else {
            self.names.clone()
        }
    }
}

impl PipelineStep for AttachStep {
    const KIND: StepKind = StepKind::Attach;

    fn produces(&self, script: &Script) -> Vec<String> {
        self.selected(script)
    }

    fn validate(&self, script: &Script) -> Result<(), String> {
        let missing = self
            .names
            .iter()
            .filter(|name| !script.contracts.contains_key(*name))
            .cloned()
            .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "not declared in [contracts]: {}",
                missing.join(", ")
            ))
        }
    }

    fn summary(&self) -> String {
        if self.names.is_empty() {
            "attach all [contracts]".to_string()
        } else {
            format!("attach {}", self.names.join(", "))
        }
    }

    async fn run(&self, id: &str, ctx: &mut RunContext) -> Result<()> {
        for name in self.selected(&ctx.script) {
            let address = *ctx
                .script
                .contracts
                .get(&name)
                .with_context(|| format!("`{}` is not declared in [contracts]", name))?;

            let code = ctx.rpc.code_at(address).await?;
            if code.is_empty() {
                anyhow::bail!("No contract code at {} (attached as {})", address, name);
            }

            ctx.book.insert(DeploymentRecord {
                name: name.clone(),
                artifact: None,
                address,
                constructor_args: None,
                origin: RecordOrigin::Attached,
                recorded_at: Utc::now(),
            });

            tracing::info!(step = %id, contract = %name, %address, "Contract attached");
        }

        Ok(())
    }
}
