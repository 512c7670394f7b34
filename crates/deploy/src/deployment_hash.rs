use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::{Script, StepAction, value::References};

/// Inputs of one deploy step that end up in contract bytecode or storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployInputs {
    pub step: String,
    pub artifact: String,
    pub name: Option<String>,
    pub constructor: Option<Vec<String>>,
    pub args: Vec<toml::Value>,
}

/// Everything that, when changed, makes previously recorded deployments stale.
///
/// Wiring and verification steps are excluded: editing them never invalidates an
/// address that was already deployed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsFingerprint {
    pub script: String,
    pub network: String,
    pub chain_id: u64,
    pub settings: BTreeMap<String, toml::Value>,
    pub contracts: BTreeMap<String, Address>,
    pub deployments: Vec<DeployInputs>,
    /// Addresses from outside the script (imported records, harness actors) that
    /// deploy or factory arguments refer to.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub imports: BTreeMap<String, Address>,
}

impl SettingsFingerprint {
    pub fn from_script(script: &Script, network: &str, chain_id: u64) -> Self {
        let deployments = script
            .steps
            .iter()
            .filter_map(|spec| match &spec.action {
                StepAction::Deploy(deploy) => Some(DeployInputs {
                    step: spec.id.clone(),
                    artifact: deploy.artifact.clone(),
                    name: deploy.name.clone(),
                    constructor: deploy.constructor.clone(),
                    args: deploy.args.clone(),
                }),
                _ => None,
            })
            .collect();

        Self {
            script: script.name.clone(),
            network: network.to_string(),
            chain_id,
            settings: script.settings.clone(),
            contracts: script.contracts.clone(),
            deployments,
            imports: BTreeMap::new(),
        }
    }

    /// Pin the outside addresses the script's deployments are built from.
    ///
    /// Only `@Name` references reachable from deploy and factory arguments are kept,
    /// so importing an unrelated record file leaves the hash alone.
    pub fn with_known_addresses(mut self, script: &Script, known: &BTreeMap<String, Address>) -> Self {
        let values = script.steps.iter().flat_map(|spec| match &spec.action {
            StepAction::Deploy(_) | StepAction::Factory(_) => spec.action.values(),
            _ => Vec::new(),
        });
        let refs = References::collect(values, &script.settings);

        self.imports = refs
            .contracts
            .into_iter()
            .filter_map(|name| known.get(&name).map(|address| (name, *address)))
            .collect();
        self
    }

    /// SHA-256 over the JSON serialization, hex encoded.
    ///
    /// Maps are ordered, so the same fingerprint always produces the same hash.
    pub fn compute_hash(&self) -> Result<String> {
        let json = serde_json::to_string(self).context("Failed to serialize settings fingerprint")?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Version metadata stored at the top of a record file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVersion {
    /// Hash of the [`SettingsFingerprint`] the records were produced with.
    pub settings_hash: String,
    pub created_at: DateTime<Utc>,
    /// Version of the tool that created the records.
    pub tool_version: String,
}

impl RecordVersion {
    pub fn new(settings_hash: String) -> Self {
        Self {
            settings_hash,
            created_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
