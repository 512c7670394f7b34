//! Pipeline definitions loaded from TOML.

use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::step::StepSpec;
use crate::confirm::ConfirmationPolicy;

/// An ordered pipeline of steps for one contract family.
///
/// ```toml
/// name = "lp-plugins"
///
/// [settings]
/// VOTER = "0x..."
///
/// [[steps]]
/// id = "deploy-factory"
/// kind = "deploy"
/// artifact = "LPPluginFactory"
/// args = ["${VOTER}"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Named constants referenced as `${KEY}`.
    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,
    /// Addresses deployed elsewhere, referenced as `@Name`.
    #[serde(default)]
    pub contracts: BTreeMap<String, Address>,
    /// Ids of the steps to run. All steps run when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,
    /// Overrides the default receipt polling policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationPolicy>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse script {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let script: Self = toml::from_str(content)?;
        if script.name.trim().is_empty() {
            anyhow::bail!("Script name must not be empty");
        }
        Ok(script)
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|spec| spec.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StepAction, StepKind};

    #[test]
    fn test_parse_full_script() {
        let script = Script::from_toml_str(
            r#"
name = "core"
description = "Core protocol"
enabled = ["deploy-voter", "handover"]

[settings]
TREASURY = "0x00000000000000000000000000000000000000aa"

[contracts]
WETH = "0x4200000000000000000000000000000000000006"

[confirmation]
poll_interval = 500
timeout = 60000

[[steps]]
id = "deploy-voter"
kind = "deploy"
artifact = "Voter"
constructor = ["address"]
args = ["${TREASURY}"]

[[steps]]
id = "wire"
kind = "call"
target = "Voter"
signature = "setMinter(address)"
args = ["@Minter"]

[[steps]]
id = "handover"
kind = "transfer-ownership"
targets = ["Voter"]
new_owner = "${TREASURY}"
check = true
"#,
        )
        .unwrap();

        assert_eq!(script.steps.len(), 3);
        assert_eq!(script.steps[0].action.kind(), StepKind::Deploy);
        assert_eq!(script.steps[2].action.kind(), StepKind::TransferOwnership);
        assert_eq!(script.contracts.len(), 1);
        assert_eq!(
            script.confirmation.unwrap().poll_interval,
            std::time::Duration::from_millis(500)
        );

        let StepAction::TransferOwnership(transfer) = &script.step("handover").unwrap().action else {
            panic!("expected a transfer-ownership step");
        };
        assert_eq!(transfer.signature, "transferOwnership(address)");
        assert!(transfer.check);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = Script::from_toml_str(
            r#"
name = "core"

[[steps]]
id = "x"
kind = "sleep"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(Script::from_toml_str("name = \"\"").is_err());
    }
}
