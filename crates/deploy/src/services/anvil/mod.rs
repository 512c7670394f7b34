//! Anvil devnet in Docker, used as the harness's simulated chain.

mod cmd;

use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::Address;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

pub use cmd::AnvilCmdBuilder;

use crate::{
    docker::{DevnetDocker, DockerImage, PortMapping, ServiceConfig},
    fs::FsHandler,
    rpc::{EthRpc, wait_until_ready},
};

/// Port anvil listens on inside the container.
pub const DEFAULT_PORT: u16 = 8545;

pub const DEFAULT_DOCKER_IMAGE: &str = "ghcr.io/foundry-rs/foundry";
pub const DEFAULT_DOCKER_TAG: &str = "latest";

/// Anvil's default chain id.
pub const DEFAULT_CHAIN_ID: u64 = 31337;

const CONFIG_OUT: &str = "anvil.json";

/// Configuration for the anvil container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AnvilConfig {
    pub docker_image: DockerImage,
    pub container_name: String,
    pub chain_id: u64,
    /// Host port for the RPC endpoint; `0` lets Docker pick a free one.
    pub host_port: u16,
    /// Number of funded dev accounts; harness actors index into them.
    pub accounts: usize,
    pub balance: Option<u64>,
    pub block_time: Option<u64>,
    pub timestamp: Option<u64>,
    pub fork_url: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for AnvilConfig {
    fn default() -> Self {
        Self {
            docker_image: DockerImage::new(DEFAULT_DOCKER_IMAGE, DEFAULT_DOCKER_TAG),
            container_name: "vedrome-anvil".to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            host_port: 0,
            accounts: 10,
            balance: None,
            block_time: None,
            timestamp: None,
            fork_url: None,
            extra_args: Vec::new(),
        }
    }
}

/// Accounts anvil writes to its `--config-out` file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct AnvilOutput {
    available_accounts: Vec<Address>,
}

/// A running anvil container.
#[derive(Debug, Clone)]
pub struct AnvilHandler {
    pub container_id: String,
    pub container_name: String,
    pub chain_id: u64,
    /// RPC endpoint reachable from the host.
    pub rpc_url: Url,
    /// Funded dev accounts, unlocked on the node, in index order.
    pub accounts: Vec<Address>,
}

impl AnvilConfig {
    /// Start anvil and wait until it answers JSON-RPC.
    ///
    /// `host_config_path` receives the account listing anvil writes on startup.
    pub async fn start(
        self,
        docker: &mut DevnetDocker,
        host_config_path: PathBuf,
    ) -> Result<AnvilHandler, anyhow::Error> {
        if !host_config_path.exists() {
            FsHandler::create_host_config_directory(&host_config_path)?;
        }

        let container_config_path = PathBuf::from("/data");
        let host_output = host_config_path.join(CONFIG_OUT);
        if host_output.exists() {
            std::fs::remove_file(&host_output)
                .with_context(|| format!("Failed to remove stale {}", host_output.display()))?;
        }

        let cmd = AnvilCmdBuilder::new(self.chain_id)
            .port(DEFAULT_PORT)
            .accounts(self.accounts)
            .balance(self.balance)
            .block_time(self.block_time)
            .timestamp(self.timestamp)
            .fork_url(self.fork_url.clone())
            .config_out(container_config_path.join(CONFIG_OUT))
            .extra_args(self.extra_args.clone())
            .build();

        let service = docker
            .start_service(
                &self.container_name,
                ServiceConfig::new(self.docker_image.clone())
                    .entrypoint("anvil")
                    .cmd(cmd)
                    .port(PortMapping::tcp(DEFAULT_PORT, self.host_port))
                    .bind(&host_config_path, &container_config_path, "rw"),
            )
            .await
            .context("Failed to start anvil container")?;

        FsHandler::wait_for_file(&host_output, Duration::from_secs(30))
            .await
            .context("Anvil did not write its account listing in time")?;

        let output: AnvilOutput = serde_json::from_str(
            &tokio::fs::read_to_string(&host_output)
                .await
                .with_context(|| format!("Failed to read {}", host_output.display()))?,
        )
        .context("Failed to parse anvil account listing")?;

        let host_port = service
            .host_ports
            .get(&DEFAULT_PORT)
            .copied()
            .context("Anvil RPC port is not published")?;
        let rpc_url = Url::parse(&format!("http://127.0.0.1:{}/", host_port))
            .context("Failed to build anvil RPC URL")?;

        let rpc = EthRpc::http(rpc_url.clone())?;
        wait_until_ready("anvil", 30, || async {
            rpc.chain_id().await.map(|_| ())
        })
        .await?;

        tracing::info!(
            container_name = %service.container_name,
            %rpc_url,
            accounts = output.available_accounts.len(),
            "Anvil started"
        );

        Ok(AnvilHandler {
            container_id: service.container_id,
            container_name: service.container_name,
            chain_id: self.chain_id,
            rpc_url,
            accounts: output.available_accounts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_anvil_output() {
        let output: AnvilOutput = serde_json::from_value(serde_json::json!({
            "available_accounts": [
                "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
                "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
            ],
            "private_keys": ["0xac09", "0x59c6"],
            "wallet": null
        }))
        .unwrap();

        assert_eq!(output.available_accounts.len(), 2);
    }

    #[test]
    fn test_default_config_from_partial_toml() {
        let config: AnvilConfig = toml::from_str("accounts = 20\nblock_time = 2").unwrap();
        assert_eq!(config.accounts, 20);
        assert_eq!(config.block_time, Some(2));
        assert_eq!(config.chain_id, DEFAULT_CHAIN_ID);
        assert_eq!(config.container_name, "vedrome-anvil");
    }
}
