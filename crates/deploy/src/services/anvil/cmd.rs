//! Command line for the anvil devnet container.

use std::path::Path;

/// Builder for anvil arguments.
#[derive(Debug, Clone)]
pub struct AnvilCmdBuilder {
    port: u16,
    chain_id: u64,
    accounts: usize,
    balance: Option<u64>,
    block_time: Option<u64>,
    timestamp: Option<u64>,
    fork_url: Option<String>,
    config_out: Option<String>,
    extra_args: Vec<String>,
}

impl AnvilCmdBuilder {
    pub fn new(chain_id: u64) -> Self {
        Self {
            port: 8545,
            chain_id,
            accounts: 10,
            balance: None,
            block_time: None,
            timestamp: None,
            fork_url: None,
            config_out: None,
            extra_args: Vec::new(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Number of funded, unlocked dev accounts.
    pub fn accounts(mut self, accounts: usize) -> Self {
        self.accounts = accounts;
        self
    }

    /// Balance of each dev account, in ether.
    pub fn balance(mut self, balance: Option<u64>) -> Self {
        self.balance = balance;
        self
    }

    /// Interval mining. Blocks are mined per transaction when unset.
    pub fn block_time(mut self, block_time: Option<u64>) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn timestamp(mut self, timestamp: Option<u64>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn fork_url(mut self, url: Option<String>) -> Self {
        self.fork_url = url;
        self
    }

    /// Where anvil writes its accounts and keys once it is listening.
    pub fn config_out(mut self, path: impl AsRef<Path>) -> Self {
        self.config_out = Some(path.as_ref().display().to_string());
        self
    }

    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "--host".to_string(),
            "0.0.0.0".to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--chain-id".to_string(),
            self.chain_id.to_string(),
            "--accounts".to_string(),
            self.accounts.to_string(),
        ];

        let optional = [
            ("--balance", self.balance.map(|b| b.to_string())),
            ("--block-time", self.block_time.map(|t| t.to_string())),
            ("--timestamp", self.timestamp.map(|t| t.to_string())),
            ("--fork-url", self.fork_url),
            ("--config-out", self.config_out),
        ];
        for (flag, value) in optional {
            if let Some(value) = value {
                cmd.push(flag.to_string());
                cmd.push(value);
            }
        }

        cmd.extend(self.extra_args);
        cmd
    }
}
