//! Deployment records: what was deployed, where, and with which constructor arguments.
//!
//! A [`DeploymentBook`] is checkpointed to a JSON file after every successful step so an
//! interrupted run can resume, and so later scripts can refer to earlier deployments.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{deployment_hash::RecordVersion, pipeline::AddressLookup};

/// Constructor arguments as used at deployment.
///
/// `encoded` is what verification submits, so it is kept verbatim rather than
/// re-encoded from the rendered values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructorArgs {
    pub types: Vec<String>,
    pub values: Vec<String>,
    pub encoded: Bytes,
}

/// How a record came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordOrigin {
    Deployed {
        step: String,
        tx_hash: B256,
        block_number: Option<u64>,
    },
    Attached,
    FactoryCreated {
        step: String,
        factory: Address,
        tx_hash: B256,
    },
}

impl RecordOrigin {
    fn label(&self) -> String {
        match self {
            Self::Deployed { step, .. } => format!("deployed by {}", step),
            Self::Attached => "attached".to_string(),
            Self::FactoryCreated { step, .. } => format!("created by {}", step),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor_args: Option<ConstructorArgs>,
    pub origin: RecordOrigin,
    pub recorded_at: DateTime<Utc>,
}

/// Administrative control handed over by a transfer-ownership step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    pub new_owner: Address,
    pub step: String,
    pub tx_hash: B256,
}

/// All records produced by one script on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentBook {
    pub script: String,
    pub network: String,
    pub chain_id: u64,
    pub version: RecordVersion,
    #[serde(default)]
    pub records: BTreeMap<String, DeploymentRecord>,
    #[serde(default)]
    pub ownership: BTreeMap<String, OwnershipTransfer>,
    /// Ids of steps that completed, in any earlier or the current run.
    #[serde(default)]
    pub completed: BTreeSet<String>,
}

impl DeploymentBook {
    pub fn new(script: &str, network: &str, chain_id: u64, settings_hash: String) -> Self {
        Self {
            script: script.to_string(),
            network: network.to_string(),
            chain_id,
            version: RecordVersion::new(settings_hash),
            records: BTreeMap::new(),
            ownership: BTreeMap::new(),
            completed: BTreeSet::new(),
        }
    }

    /// Add a record. A record with the same name is superseded.
    pub fn insert(&mut self, record: DeploymentRecord) {
        if let Some(previous) = self.records.get(&record.name)
            && previous.address != record.address
        {
            tracing::warn!(
                contract = %record.name,
                previous = %previous.address,
                current = %record.address,
                "Superseding recorded address"
            );
        }
        self.records.insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<&DeploymentRecord> {
        self.records.get(name)
    }

    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.records.get(name).map(|record| record.address)
    }

    pub fn record_transfer(&mut self, contract: &str, transfer: OwnershipTransfer) {
        self.ownership.insert(contract.to_string(), transfer);
    }

    pub fn mark_completed(&mut self, step: &str) {
        self.completed.insert(step.to_string());
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.completed.contains(step)
    }

    /// Write the book as pretty JSON, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize records")?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write records to {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move records into {}", path.display()))?;

        tracing::trace!(path = %path.display(), records = self.records.len(), "Records saved");
        Ok(())
    }

    /// Load a record file, returning `None` when it does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read records from {}", path.display()))?;
        let book = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse records in {}", path.display()))?;

        Ok(Some(book))
    }

    /// Deployment summary for the console.
    pub fn summary_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_header(vec!["Contract", "Address", "Origin", "Constructor args", "Owner"]);

        for record in self.records.values() {
            let args = record
                .constructor_args
                .as_ref()
                .map(|args| args.values.join(", "))
                .unwrap_or_else(|| "-".to_string());
            let owner = self
                .ownership
                .get(&record.name)
                .map(|transfer| transfer.new_owner.to_string())
                .unwrap_or_else(|| "deployer".to_string());

            table.add_row(vec![
                record.name.clone(),
                record.address.to_string(),
                record.origin.label(),
                args,
                owner,
            ]);
        }

        table
    }

    /// A `[contracts]` block ready to paste into a later script.
    pub fn contracts_snippet(&self) -> String {
        let mut snippet = String::from("[contracts]\n");
        for record in self.records.values() {
            snippet.push_str(&format!("{} = \"{}\"\n", record.name, record.address));
        }
        snippet
    }
}

impl AddressLookup for DeploymentBook {
    fn lookup(&self, name: &str) -> Option<Address> {
        self.address_of(name)
    }
}

/// Exclusive advisory lock on a record file, held for the duration of a run.
///
/// Two runs against the same record file would share the deployer's nonce sequence.
#[derive(Debug)]
pub struct RecordLock {
    _file: File,
    path: PathBuf,
}

impl RecordLock {
    pub fn acquire(records_path: &Path) -> Result<Self> {
        let path = records_path.with_extension("lock");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = File::create(&path)
            .with_context(|| format!("Failed to create lock file {}", path.display()))?;
        file.try_lock_exclusive().with_context(|| {
            format!(
                "Records {} are locked by another run",
                records_path.display()
            )
        })?;

        tracing::debug!(path = %path.display(), "Record lock acquired");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn record(name: &str, byte: u8) -> DeploymentRecord {
        DeploymentRecord {
            name: name.to_string(),
            artifact: Some(name.to_string()),
            address: Address::repeat_byte(byte),
            constructor_args: Some(ConstructorArgs {
                types: vec!["address".to_string()],
                values: vec![Address::repeat_byte(0xaa).to_string()],
                encoded: Bytes::from(vec![0u8; 32]),
            }),
            origin: RecordOrigin::Deployed {
                step: format!("deploy-{}", name.to_lowercase()),
                tx_hash: B256::repeat_byte(byte),
                block_number: Some(1),
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new("vedrome-records").unwrap();
        let path = tmp.path().join("records/core.json");

        let mut book = DeploymentBook::new("core", "local", 31337, "hash".to_string());
        book.insert(record("Voter", 0x01));
        book.mark_completed("deploy-voter");
        book.save(&path).unwrap();

        let loaded = DeploymentBook::load(&path).unwrap().unwrap();
        assert_eq!(loaded, book);
        assert!(loaded.is_completed("deploy-voter"));
        assert_eq!(loaded.address_of("Voter"), Some(Address::repeat_byte(0x01)));
    }

    #[test]
    fn test_load_missing_is_none() {
        let tmp = TempDir::new("vedrome-records").unwrap();
        assert!(DeploymentBook::load(&tmp.path().join("missing.json")).unwrap().is_none());
    }

    #[test]
    fn test_load_corrupted_file() {
        let tmp = TempDir::new("vedrome-records").unwrap();
        let path = tmp.path().join("core.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        assert!(DeploymentBook::load(&path).is_err());
    }

    #[test]
    fn test_insert_supersedes() {
        let mut book = DeploymentBook::new("core", "local", 31337, "hash".to_string());
        book.insert(record("Voter", 0x01));
        book.insert(record("Voter", 0x02));

        assert_eq!(book.records.len(), 1);
        assert_eq!(book.address_of("Voter"), Some(Address::repeat_byte(0x02)));
    }

    #[test]
    fn test_contracts_snippet_parses_back() {
        let mut book = DeploymentBook::new("core", "local", 31337, "hash".to_string());
        book.insert(record("Minter", 0x03));
        book.insert(record("Voter", 0x01));

        #[derive(Deserialize)]
        struct Snippet {
            contracts: BTreeMap<String, Address>,
        }

        let snippet: Snippet = toml::from_str(&book.contracts_snippet()).unwrap();
        assert_eq!(snippet.contracts["Minter"], Address::repeat_byte(0x03));
        assert_eq!(snippet.contracts["Voter"], Address::repeat_byte(0x01));
    }

    #[test]
    fn test_summary_lists_every_record() {
        let mut book = DeploymentBook::new("core", "local", 31337, "hash".to_string());
        book.insert(record("Minter", 0x03));
        book.record_transfer(
            "Minter",
            OwnershipTransfer {
                new_owner: Address::repeat_byte(0x0f),
                step: "handover".to_string(),
                tx_hash: B256::ZERO,
            },
        );

        let rendered = book.summary_table().to_string();
        assert!(rendered.contains("Minter"));
        assert!(rendered.contains("deployed by deploy-minter"));
        assert!(rendered.contains(&Address::repeat_byte(0x0f).to_string()));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let tmp = TempDir::new("vedrome-records").unwrap();
        let path = tmp.path().join("core.json");

        let lock = RecordLock::acquire(&path).unwrap();
        assert!(RecordLock::acquire(&path).is_err());
        drop(lock);
        assert!(RecordLock::acquire(&path).is_ok());
    }
}
