use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use tracing::level_filters::LevelFilter;
use url::Url;
use vedrome_deploy::services::anvil::{DEFAULT_DOCKER_IMAGE, DEFAULT_DOCKER_TAG};

#[derive(Parser)]
#[command(name = "vedrome")]
#[command(
    author,
    version,
    about = "Deploy, wire and exercise the vedrome contract suite"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "VEDROME_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the project configuration file (or its directory).
    #[arg(long, global = true, env = "VEDROME_CONFIG", default_value = "vedrome.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a script and print its plan. Nothing is sent to the network.
    Plan(PlanArgs),
    /// Run a script against a network, resuming from its record file.
    Run(RunArgs),
    /// Run a harness scenario against a local chain.
    Test(TestArgs),
    /// Fetch a verified contract's ABI from the network's explorer.
    Abi(AbiArgs),
    /// Print shell completions.
    Completions {
        /// The shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct SelectionArgs {
    /// Comma-separated step ids to run instead of the script's `enabled` list.
    #[arg(long, value_delimiter = ',', env = "VEDROME_STEPS")]
    pub steps: Option<Vec<String>>,

    /// Record file to resume from.
    ///
    /// Defaults to `<paths.records>/<network>/<script>.json`.
    #[arg(long, env = "VEDROME_RECORDS")]
    pub records: Option<PathBuf>,

    /// Record files of other scripts whose contracts can be referenced as `@Name`.
    #[arg(long = "import", env = "VEDROME_IMPORTS", value_delimiter = ',')]
    pub imports: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// The pipeline script.
    pub script: PathBuf,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// The pipeline script.
    pub script: PathBuf,

    /// Network name from the project configuration.
    #[arg(short, long, env = "VEDROME_NETWORK")]
    pub network: String,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Log verification failures and continue with the remaining steps.
    #[arg(long, env = "VEDROME_KEEP_GOING")]
    pub keep_going: bool,

    /// Skip every verification step.
    #[arg(long, env = "VEDROME_SKIP_VERIFICATION")]
    pub skip_verification: bool,

    /// Ignore the existing record file and deploy everything again.
    #[arg(long, env = "VEDROME_FRESH")]
    pub fresh: bool,
}

#[derive(Debug, Args)]
pub struct TestArgs {
    /// The scenario file.
    pub scenario: PathBuf,

    /// Attach to a running dev node instead of starting anvil in Docker.
    #[arg(long, env = "VEDROME_RPC_URL")]
    pub rpc_url: Option<Url>,

    /// Docker image for anvil.
    #[arg(long, env = "VEDROME_ANVIL_IMAGE", default_value = DEFAULT_DOCKER_IMAGE)]
    pub anvil_image: String,

    /// Docker tag for anvil.
    #[arg(long, env = "VEDROME_ANVIL_TAG", default_value = DEFAULT_DOCKER_TAG)]
    pub anvil_tag: String,

    /// Number of dev accounts anvil creates.
    #[arg(long, env = "VEDROME_ANVIL_ACCOUNTS", default_value_t = 10)]
    pub accounts: usize,

    /// Directory for anvil's startup output.
    #[arg(long, env = "VEDROME_DATA_DIR", default_value = ".vedrome/anvil")]
    pub data_dir: PathBuf,

    /// Leave the anvil container running when the scenario ends.
    #[arg(long, env = "VEDROME_NO_CLEANUP")]
    pub no_cleanup: bool,

    /// Artifacts directory, overriding the project configuration.
    #[arg(long, env = "VEDROME_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct AbiArgs {
    /// The contract address.
    pub address: Address,

    /// Network name from the project configuration.
    #[arg(short, long, env = "VEDROME_NETWORK")]
    pub network: String,

    /// Write the ABI to a file instead of stdout.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "vedrome",
            "run",
            "scripts/core.toml",
            "--network",
            "base",
            "--steps",
            "deploy-token,deploy-voter",
            "--keep-going",
        ])
        .unwrap();

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.network, "base");
                assert_eq!(
                    args.selection.steps,
                    Some(vec!["deploy-token".to_string(), "deploy-voter".to_string()])
                );
                assert!(args.keep_going);
                assert!(!args.fresh);
            }
            _ => panic!("expected the run command"),
        }
    }

    #[test]
    fn test_run_requires_network() {
        assert!(Cli::try_parse_from(["vedrome", "run", "scripts/core.toml"]).is_err());
    }
}
