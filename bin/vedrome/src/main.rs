//! vedrome deploys the vedrome contract suite step by step and replays scenarios against it.

mod cli;

use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use cli::{AbiArgs, Cli, Command, PlanArgs, RunArgs, SelectionArgs, TestArgs};
use vedrome_deploy::{
    ArtifactStore, DeploymentBook, DevnetDockerConfig, DockerImage, EthRpc, ExplorerClient,
    Orchestrator, Plan, PriorState, ProjectConfig, RunOptions, Script, Secrets, Sender,
    harness::{ChainSource, LocalChain, Scenario, ScenarioRunner},
    services::AnvilConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Plan(args) => plan(args),
        Command::Run(args) => run(&cli.config, args).await,
        Command::Test(args) => test(&cli.config, args).await,
        Command::Abi(args) => abi(&cli.config, args).await,
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "vedrome", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Addresses recorded by other scripts, keyed by contract name.
fn imported_addresses(imports: &[std::path::PathBuf]) -> Result<BTreeMap<String, Address>> {
    let mut addresses = BTreeMap::new();
    for path in imports {
        let book = DeploymentBook::load(path)?
            .with_context(|| format!("Imported record file {} does not exist", path.display()))?;
        tracing::debug!(path = %path.display(), records = book.records.len(), "Importing records");
        addresses.extend(
            book.records
                .into_iter()
                .map(|(name, record)| (name, record.address)),
        );
    }
    Ok(addresses)
}

fn plan(args: PlanArgs) -> Result<()> {
    let script = Script::load(&args.script)?;
    let SelectionArgs {
        steps,
        records,
        imports,
    } = args.selection;

    let imports = imported_addresses(&imports)?;
    let prior = match records {
        Some(path) => PriorState::load_current(&path, &script, &imports)?,
        None => PriorState::default(),
    }
    .with_contracts(imports.into_keys());

    let plan = Plan::build(&script, steps.as_deref(), &prior)?;

    println!("{}", plan.table());
    tracing::info!(
        script = %script.name,
        steps = plan.steps.len(),
        pending = plan.pending().count(),
        "Plan is valid"
    );
    Ok(())
}

async fn run(config_path: &Path, args: RunArgs) -> Result<()> {
    let config = ProjectConfig::load(config_path)?;
    let secrets = Secrets::from_env()?;
    let network = config.network(&args.network, &secrets)?;

    let script = Script::load(&args.script)?;
    let records_path = args
        .selection
        .records
        .clone()
        .unwrap_or_else(|| config.records_path(&args.network, &script.name));

    let rpc = EthRpc::http(network.url.clone())?;
    let chain_id = rpc.chain_id().await.context("Failed to reach the network")?;
    if chain_id != network.chain_id {
        anyhow::bail!(
            "Network `{}` is configured with chain id {} but the endpoint reports {}",
            args.network,
            network.chain_id,
            chain_id
        );
    }

    let sender = Sender::from_private_key(secrets.private_key()?)?;

    let mut orchestrator = Orchestrator::new(
        script,
        rpc,
        sender,
        ArtifactStore::new(&config.paths.artifacts),
    )
    .network(&args.network)
    .known_addresses(imported_addresses(&args.selection.imports)?);

    match (&network.explorer_api_url, &secrets.scan_api_key) {
        (Some(api_url), Some(key)) => {
            let explorer = ExplorerClient::new(api_url.clone(), key.clone())?
                .with_poll_interval(Duration::from_secs(config.verify.status_interval_secs));
            orchestrator = orchestrator.verifier(Arc::new(explorer));
        }
        _ if !args.skip_verification => {
            tracing::warn!(
                network = %args.network,
                "No explorer API URL or SCAN_API_KEY, verification steps will fail"
            );
        }
        _ => {}
    }

    let report = orchestrator
        .run(&RunOptions {
            selection: args.selection.steps,
            keep_going: args.keep_going,
            skip_verification: args.skip_verification,
            records_path: Some(records_path.clone()),
            fresh: args.fresh,
        })
        .await?;

    println!("{}", report.book.summary_table());
    println!();
    println!("{}", report.book.contracts_snippet());

    for (name, record) in &report.book.records {
        if let Some(link) = network.address_link(&record.address) {
            tracing::debug!(contract = %name, %link, "Explorer link");
        }
    }

    tracing::info!(path = %records_path.display(), "Records written");

    if !report.is_clean() {
        for (step, error) in &report.failed_verifications {
            tracing::error!(%step, %error, "Verification failed");
        }
        anyhow::bail!(
            "{} verification step(s) failed",
            report.failed_verifications.len()
        );
    }

    Ok(())
}

async fn test(config_path: &Path, args: TestArgs) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;

    let artifacts = match args.artifacts {
        Some(path) => ArtifactStore::new(path),
        None if config_path.exists() => {
            ArtifactStore::new(ProjectConfig::load(config_path)?.paths.artifacts)
        }
        None => ArtifactStore::new("artifacts"),
    };

    let source = match args.rpc_url {
        Some(url) => ChainSource::Attach(url),
        None => ChainSource::Anvil {
            anvil: AnvilConfig {
                docker_image: DockerImage::new(args.anvil_image, args.anvil_tag),
                accounts: args.accounts,
                ..Default::default()
            },
            docker: DevnetDockerConfig {
                no_cleanup: args.no_cleanup,
                ..Default::default()
            },
            data_dir: args.data_dir,
        },
    };

    let chain = LocalChain::start(source).await?;
    let report = ScenarioRunner::new(scenario, chain)
        .artifacts(artifacts)
        .run()
        .await?;

    if let Some(book) = &report.deployment {
        println!("{}", book.summary_table());
    }
    println!("{}", report.summary_table());
    for query in &report.queries {
        println!("{} {}.{}", query.path, query.target, query.signature);
        println!("{}", query.table());
    }

    Ok(())
}

async fn abi(config_path: &Path, args: AbiArgs) -> Result<()> {
    let config = ProjectConfig::load(config_path)?;
    let secrets = Secrets::from_env()?;
    let network = config.network(&args.network, &secrets)?;

    let api_url = network
        .explorer_api_url
        .with_context(|| format!("Network `{}` has no explorer API URL", args.network))?;
    let key = secrets
        .scan_api_key
        .context("SCAN_API_KEY is not set")?;

    let abi = ExplorerClient::new(api_url, key)?
        .fetch_abi(args.address)
        .await?;
    let json = serde_json::to_string_pretty(&abi).context("Failed to serialize ABI")?;

    match args.out {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), address = %args.address, "ABI written");
        }
        None => println!("{}", json),
    }

    Ok(())
}
