//! Compiled contract artifacts produced by the Hardhat build.
//!
//! Layout under the artifacts directory:
//! - `contracts/<File>.sol/<Name>.json`: ABI and creation bytecode.
//! - `contracts/<File>.sol/<Name>.dbg.json`: pointer to the build-info file.
//! - `build-info/<id>.json`: compiler version and the standard JSON input.

use std::path::{Path, PathBuf};

use alloy_core::{dyn_abi::DynSolType, json_abi::JsonAbi, primitives::Bytes};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::abi::parse_types;

/// Directory holding build-info files, never searched for contract artifacts.
const BUILD_INFO_DIR: &str = "build-info";

/// A compiled contract.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub contract_name: String,
    pub source_name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
    /// Path of the artifact JSON file.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: String,
    source_name: String,
    abi: JsonAbi,
    bytecode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: String,
}

/// Compiler metadata and standard JSON input for a compilation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub solc_version: String,
    pub solc_long_version: String,
    pub input: serde_json::Value,
}

impl BuildInfo {
    /// Compiler version in the `v0.8.19+commit.7dd6d404` form explorers expect.
    pub fn compiler_version(&self) -> String {
        format!("v{}", self.solc_long_version.trim_start_matches('v'))
    }
}

impl Artifact {
    /// `<source>:<name>`, the fully qualified contract name.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }

    /// Constructor parameter types declared in the ABI.
    pub fn constructor_types(&self) -> Result<Vec<DynSolType>> {
        let Some(constructor) = &self.abi.constructor else {
            return Ok(Vec::new());
        };

        let types = constructor
            .inputs
            .iter()
            .map(|param| param.selector_type().into_owned())
            .collect::<Vec<_>>();

        parse_types(&types)
            .with_context(|| format!("Invalid constructor ABI in {}", self.path.display()))
    }

    /// Load the build-info referenced by the companion `.dbg.json` file.
    pub fn build_info(&self) -> Result<BuildInfo> {
        let dbg_path = self.path.with_extension("dbg.json");
        let dbg: DebugFile = read_json(&dbg_path)?;

        let parent = self
            .path
            .parent()
            .context("Artifact path must have a parent directory")?;
        let build_info_path = parent.join(&dbg.build_info);

        read_json(&build_info_path)
    }
}

/// Lookup of artifacts by contract name.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load an artifact by contract name or `path/File.sol:Name`.
    pub fn load(&self, name: &str) -> Result<Artifact> {
        let path = match name.rsplit_once(':') {
            Some((source, contract)) => self.root.join(source).join(format!("{}.json", contract)),
            None => self.find(name)?,
        };

        let file: ArtifactFile = read_json(&path)?;

        let bytecode = decode_bytecode(&file.bytecode).with_context(|| {
            format!("Invalid bytecode for {} in {}", file.contract_name, path.display())
        })?;

        Ok(Artifact {
            contract_name: file.contract_name,
            source_name: file.source_name,
            abi: file.abi,
            bytecode,
            path,
        })
    }

    fn find(&self, name: &str) -> Result<PathBuf> {
        let file_name = format!("{}.json", name);
        let mut matches = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;

            for entry in entries {
                let path = entry?.path();
                if path.is_dir() {
                    if path.file_name().is_some_and(|n| n != BUILD_INFO_DIR) {
                        pending.push(path);
                    }
                } else if path.file_name().is_some_and(|n| n == file_name.as_str()) {
                    matches.push(path);
                }
            }
        }

        match matches.len() {
            0 => anyhow::bail!(
                "No artifact named `{}` under {}",
                name,
                self.root.display()
            ),
            1 => Ok(matches.remove(0)),
            _ => {
                matches.sort();
                anyhow::bail!(
                    "Artifact name `{}` is ambiguous, use `<source>:{}`. Candidates: {:?}",
                    name,
                    name,
                    matches
                )
            }
        }
    }
}

fn decode_bytecode(bytecode: &str) -> Result<Bytes> {
    let hex_code = bytecode.trim_start_matches("0x");
    if hex_code.is_empty() {
        anyhow::bail!("Contract has no creation bytecode (abstract contract or interface?)");
    }
    if hex_code.contains("__") {
        anyhow::bail!("Bytecode contains unlinked library references");
    }
    Ok(Bytes::from(hex::decode(hex_code)?))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn write_artifact(root: &Path, source: &str, name: &str, abi: &str, bytecode: &str) {
        let dir = root.join(source);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{}.json", name)),
            format!(
                r#"{{"_format":"hh-sol-artifact-1","contractName":"{name}","sourceName":"{source}","abi":{abi},"bytecode":"{bytecode}","deployedBytecode":"0x","linkReferences":{{}}}}"#
            ),
        )
        .unwrap();
    }

    const CTOR_ABI: &str = r#"[{"type":"constructor","stateMutability":"nonpayable","inputs":[{"name":"voter","type":"address","internalType":"address"},{"name":"rate","type":"uint256","internalType":"uint256"}]}]"#;

    #[test]
    fn test_load_by_name_and_qualified() {
        let tmp = TempDir::new("vedrome-artifacts").unwrap();
        write_artifact(tmp.path(), "contracts/Factory.sol", "Factory", CTOR_ABI, "0x6080");

        let store = ArtifactStore::new(tmp.path());
        let artifact = store.load("Factory").unwrap();
        assert_eq!(artifact.qualified_name(), "contracts/Factory.sol:Factory");
        assert_eq!(artifact.bytecode, Bytes::from(vec![0x60, 0x80]));
        assert_eq!(
            artifact.constructor_types().unwrap(),
            vec![DynSolType::Address, DynSolType::Uint(256)]
        );

        let qualified = store.load("contracts/Factory.sol:Factory").unwrap();
        assert_eq!(qualified.path, artifact.path);
    }

    #[test]
    fn test_ambiguous_and_missing() {
        let tmp = TempDir::new("vedrome-artifacts").unwrap();
        write_artifact(tmp.path(), "contracts/a/Gauge.sol", "Gauge", "[]", "0x00");
        write_artifact(tmp.path(), "contracts/b/Gauge.sol", "Gauge", "[]", "0x00");

        let store = ArtifactStore::new(tmp.path());
        let err = store.load("Gauge").unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
        assert!(store.load("Bribe").is_err());
    }

    #[test]
    fn test_interface_has_no_bytecode() {
        let tmp = TempDir::new("vedrome-artifacts").unwrap();
        write_artifact(tmp.path(), "contracts/IVoter.sol", "IVoter", "[]", "0x");

        let store = ArtifactStore::new(tmp.path());
        assert!(store.load("IVoter").is_err());
    }

    #[test]
    fn test_build_info_via_dbg_file() {
        let tmp = TempDir::new("vedrome-artifacts").unwrap();
        write_artifact(tmp.path(), "contracts/Minter.sol", "Minter", "[]", "0x6080");
        std::fs::write(
            tmp.path().join("contracts/Minter.sol/Minter.dbg.json"),
            r#"{"_format":"hh-sol-dbg-1","buildInfo":"../../build-info/abc.json"}"#,
        )
        .unwrap();
        std::fs::create_dir_all(tmp.path().join("build-info")).unwrap();
        std::fs::write(
            tmp.path().join("build-info/abc.json"),
            r#"{"id":"abc","solcVersion":"0.8.19","solcLongVersion":"0.8.19+commit.7dd6d404","input":{"language":"Solidity","sources":{}}}"#,
        )
        .unwrap();

        let store = ArtifactStore::new(tmp.path());
        let info = store.load("Minter").unwrap().build_info().unwrap();
        assert_eq!(info.compiler_version(), "v0.8.19+commit.7dd6d404");
        assert_eq!(info.input["language"], "Solidity");
    }
}
