//! The simulated chain a scenario runs against.

use std::{collections::BTreeMap, path::PathBuf};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use url::Url;

use crate::{
    docker::{DevnetDocker, DevnetDockerConfig},
    rpc::EthRpc,
    services::{AnvilConfig, AnvilHandler},
};

/// Where the harness gets its chain from.
#[derive(Debug, Clone)]
pub enum ChainSource {
    /// An already running dev node.
    Attach(Url),
    /// A fresh anvil container.
    Anvil {
        anvil: AnvilConfig,
        docker: DevnetDockerConfig,
        /// Host directory for anvil's startup output.
        data_dir: PathBuf,
    },
}

/// A dev node with unlocked, funded accounts.
pub struct LocalChain {
    pub rpc: EthRpc,
    pub chain_id: u64,
    /// Unlocked accounts in node order.
    pub accounts: Vec<Address>,
    pub anvil: Option<AnvilHandler>,
    // Dropped last: removes the container.
    _docker: Option<DevnetDocker>,
}

impl LocalChain {
    pub async fn start(source: ChainSource) -> Result<Self> {
        match source {
            ChainSource::Attach(url) => {
                tracing::info!(%url, "Attaching to dev node");
                Self::from_rpc(EthRpc::http(url)?).await
            }
            ChainSource::Anvil {
                anvil,
                docker,
                data_dir,
            } => {
                let mut docker = DevnetDocker::new(docker).await?;
                let handler = anvil.start(&mut docker, data_dir).await?;

                let mut chain = Self::from_rpc(EthRpc::http(handler.rpc_url.clone())?).await?;
                chain.anvil = Some(handler);
                chain._docker = Some(docker);
                Ok(chain)
            }
        }
    }

    /// Use any JSON-RPC client exposing unlocked accounts.
    pub async fn from_rpc(rpc: EthRpc) -> Result<Self> {
        let chain_id = rpc.chain_id().await.context("Dev node is not reachable")?;
        let accounts = rpc
            .accounts()
            .await
            .context("Failed to list unlocked accounts")?;

        tracing::debug!(chain_id, accounts = accounts.len(), "Dev node ready");

        Ok(Self {
            rpc,
            chain_id,
            accounts,
            anvil: None,
            _docker: None,
        })
    }

    /// Bind actor names to unlocked accounts by index.
    pub fn actors(&self, actors: &BTreeMap<String, usize>) -> Result<BTreeMap<String, Address>> {
        actors
            .iter()
            .map(|(name, index)| {
                let address = self.accounts.get(*index).copied().with_context(|| {
                    format!(
                        "Actor `{}` uses account #{} but the node only has {}",
                        name,
                        index,
                        self.accounts.len()
                    )
                })?;
                Ok((name.clone(), address))
            })
            .collect()
    }
}
