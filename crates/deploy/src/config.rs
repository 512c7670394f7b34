//! Project configuration: networks, compiler profile and filesystem locations.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

/// The default name for the project configuration file.
pub const CONFIG_FILENAME: &str = "vedrome.toml";

/// Environment variables read as secrets.
const SECRET_VARS: [&str; 3] = ["private_key", "scan_api_key", "rpc_url"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    pub version: String,
    #[serde(default = "default_optimizer")]
    pub optimizer: bool,
    #[serde(default = "default_runs")]
    pub runs: u32,
}

fn default_optimizer() -> bool {
    true
}

fn default_runs() -> u32 {
    200
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            version: "0.8.19".to_string(),
            optimizer: default_optimizer(),
            runs: default_runs(),
        }
    }
}

/// Build tool layout. Relative paths are resolved against the config file's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub sources: PathBuf,
    pub tests: PathBuf,
    pub artifacts: PathBuf,
    pub cache: PathBuf,
    /// Where record files are written, one per network and script.
    pub records: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sources: PathBuf::from("contracts"),
            tests: PathBuf::from("tests"),
            artifacts: PathBuf::from("artifacts"),
            cache: PathBuf::from("cache"),
            records: PathBuf::from("records"),
        }
    }
}

impl PathsConfig {
    fn rebase(&mut self, root: &Path) {
        for path in [
            &mut self.sources,
            &mut self.tests,
            &mut self.artifacts,
            &mut self.cache,
            &mut self.records,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub url: Url,
    pub chain_id: u64,
    /// Etherscan-compatible API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_api_url: Option<Url>,
    /// Human-facing explorer, used for links in the summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<Url>,
}

impl NetworkConfig {
    pub fn address_link(&self, address: &impl std::fmt::Display) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/address/{}", base.as_str().trim_end_matches('/'), address))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Seconds between verification status checks.
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

fn default_status_interval() -> u64 {
    5
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: default_status_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default)]
    pub verify: VerifyConfig,
}

/// Values that never live in the project file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Secrets {
    /// Deployer key, `PRIVATE_KEY`.
    pub private_key: Option<String>,
    /// Explorer API key, `SCAN_API_KEY`.
    pub scan_api_key: Option<String>,
    /// Overrides the selected network's URL, `RPC_URL`.
    pub rpc_url: Option<Url>,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Self::from_figment(Figment::new().merge(Env::raw().only(&SECRET_VARS)))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .context("Failed to read secrets from the environment")
    }

    pub fn private_key(&self) -> Result<&str> {
        self.private_key
            .as_deref()
            .context("PRIVATE_KEY is not set")
    }
}

impl ProjectConfig {
    /// Load the project file. Relative paths are rebased onto its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        if !config_path.exists() {
            return Err(anyhow::anyhow!(
                "Project configuration not found: {}",
                config_path.display()
            ));
        }

        let mut config: Self = Figment::new()
            .merge(Toml::file(&config_path))
            .extract()
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let root = config_path.parent().unwrap_or(Path::new("."));
        config.paths.rebase(root);

        tracing::debug!(path = %config_path.display(), networks = config.networks.len(), "Configuration loaded");
        Ok(config)
    }

    /// Resolve a network by name. `RPC_URL` takes precedence over the configured URL.
    pub fn network(&self, name: &str, secrets: &Secrets) -> Result<NetworkConfig> {
        let mut network = self.networks.get(name).cloned().with_context(|| {
            format!(
                "Unknown network `{}` (configured: {})",
                name,
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })?;

        if let Some(url) = &secrets.rpc_url {
            tracing::debug!(network = %name, %url, "RPC_URL overrides the configured URL");
            network.url = url.clone();
        }

        Ok(network)
    }

    /// Default record file for a script on a network.
    pub fn records_path(&self, network: &str, script: &str) -> PathBuf {
        self.paths.records.join(network).join(format!("{}.json", script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;

    const CONFIG: &str = r#"
[compiler]
version = "0.8.19"
runs = 1000

[paths]
artifacts = "out"

[networks.base]
url = "https://mainnet.base.org"
chain_id = 8453
explorer_api_url = "https://api.basescan.org/api"
explorer_url = "https://basescan.org"

[networks.local]
url = "http://127.0.0.1:8545"
chain_id = 31337
"#;

    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join(CONFIG_FILENAME);
        std::fs::write(&path, CONFIG).unwrap();
        path
    }

    #[test]
    fn test_load_rebases_paths() {
        let dir = tempdir::TempDir::new("vedrome-config").unwrap();
        write_config(dir.path());

        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.compiler.runs, 1000);
        assert!(config.compiler.optimizer);
        assert_eq!(config.paths.artifacts, dir.path().join("out"));
        assert_eq!(config.paths.cache, dir.path().join("cache"));
        assert_eq!(
            config.records_path("base", "core"),
            dir.path().join("records").join("base").join("core.json")
        );
    }

    #[test]
    fn test_network_resolution_and_override() {
        let dir = tempdir::TempDir::new("vedrome-config").unwrap();
        let config = ProjectConfig::load(&write_config(dir.path())).unwrap();

        let base = config.network("base", &Secrets::default()).unwrap();
        assert_eq!(base.chain_id, 8453);
        assert_eq!(
            base.address_link(&"0xabc").as_deref(),
            Some("https://basescan.org/address/0xabc")
        );

        let secrets = Secrets {
            rpc_url: Some(Url::parse("http://10.0.0.2:8545").unwrap()),
            ..Default::default()
        };
        let overridden = config.network("base", &secrets).unwrap();
        assert_eq!(overridden.url.as_str(), "http://10.0.0.2:8545/");

        assert!(config.network("mainnet", &secrets).is_err());
    }

    #[test]
    fn test_missing_config() {
        let dir = tempdir::TempDir::new("vedrome-config").unwrap();
        assert!(ProjectConfig::load(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_secrets_extraction() {
        let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
            "private_key": "0x01",
            "scan_api_key": "KEY",
        })));
        let secrets = Secrets::from_figment(figment).unwrap();
        assert_eq!(secrets.private_key().unwrap(), "0x01");
        assert_eq!(secrets.scan_api_key.as_deref(), Some("KEY"));
        assert!(secrets.rpc_url.is_none());

        assert!(Secrets::default().private_key().is_err());
    }
}
