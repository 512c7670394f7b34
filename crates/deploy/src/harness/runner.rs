//! Executes scenarios action by action.

use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::{Address, Bytes};
use anyhow::{Context, Result};
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{
    chain::LocalChain,
    scenario::{Action, EPOCH_SECONDS, Expect, RepeatMode, Scenario},
};
use crate::{
    abi::{FunctionSig, format_value},
    artifacts::ArtifactStore,
    confirm::{ConfirmationPolicy, wait_for_receipt},
    error::{ConfirmationError, LedgerError},
    pipeline::{Orchestrator, RunOptions, Script, value::{ValueResolver, contract_name}},
    record::DeploymentBook,
    rpc::{EthRpc, TransactionReceipt, TxRequest},
    signer::Sender,
};

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded { block: Option<u64> },
    /// Reverted as expected, with the node's message.
    Reverted(String),
    Advanced { timestamp: u64 },
    Queried,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    /// Position in the scenario, e.g. `3` or `4.2.1` (action, iteration, sub-action).
    pub path: String,
    pub description: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub path: String,
    pub target: String,
    pub signature: String,
    pub fields: Vec<(String, String)>,
}

impl QueryResult {
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_header(vec!["Field", "Value"]);
        for (label, value) in &self.fields {
            table.add_row(vec![label.clone(), value.clone()]);
        }
        table
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: String,
    /// Records of the script deployed for the scenario, if any.
    pub deployment: Option<DeploymentBook>,
    pub actions: Vec<ActionRecord>,
    pub queries: Vec<QueryResult>,
}

impl ScenarioReport {
    pub fn calls(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Succeeded { .. }))
    }

    pub fn expected_reverts(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Reverted(_)))
    }

    pub fn advances(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Advanced { .. }))
    }

    fn count(&self, filter: impl Fn(&Outcome) -> bool) -> usize {
        self.actions
            .iter()
            .filter(|action| filter(&action.outcome))
            .count()
    }

    pub fn summary_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_header(vec!["#", "Action", "Outcome"]);

        for action in &self.actions {
            let outcome = match &action.outcome {
                Outcome::Succeeded { block: Some(block) } => format!("ok (block {})", block),
                Outcome::Succeeded { block: None } => "ok".to_string(),
                Outcome::Reverted(message) => format!("reverted as expected: {}", message),
                Outcome::Advanced { timestamp } => format!("now {}", timestamp),
                Outcome::Queried => "queried".to_string(),
            };
            table.add_row(vec![action.path.clone(), action.description.clone(), outcome]);
        }
        table
    }
}

/// Runs a [`Scenario`] against a [`LocalChain`].
pub struct ScenarioRunner {
    scenario: Scenario,
    chain: LocalChain,
    artifacts: Option<ArtifactStore>,
    confirmation: ConfirmationPolicy,
}

impl ScenarioRunner {
    pub fn new(scenario: Scenario, chain: LocalChain) -> Self {
        Self {
            scenario,
            chain,
            artifacts: None,
            confirmation: ConfirmationPolicy::default(),
        }
    }

    /// Compiled artifacts, needed when the scenario deploys a script.
    pub fn artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn confirmation(mut self, confirmation: ConfirmationPolicy) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Deploy the scenario's script, if any, then run every action in order.
    ///
    /// The first action that does not meet its expectation fails the scenario.
    pub async fn run(self) -> Result<ScenarioReport> {
        let scenario = self.scenario;
        let actors = self.chain.actors(&scenario.actors)?;

        let mut addresses = scenario.contracts.clone();
        addresses.extend(actors.clone());

        let mut settings = BTreeMap::new();
        let deployment = match &scenario.script {
            Some(path) => {
                let (book, script_settings) = deploy_script(
                    path,
                    &scenario,
                    &self.chain.rpc,
                    &actors,
                    &addresses,
                    self.artifacts,
                    self.confirmation,
                )
                .await?;
                settings = script_settings;
                addresses.extend(
                    book.records
                        .iter()
                        .map(|(name, record)| (name.clone(), record.address)),
                );
                Some(book)
            }
            None => None,
        };
        settings.extend(scenario.settings.clone());

        let deployer = actors
            .get(&scenario.deployer)
            .copied()
            .or_else(|| actors.values().next().copied())
            .context("Scenario declares no actors")?;

        tracing::info!(
            scenario = %scenario.name,
            actors = actors.len(),
            actions = scenario.actions.len(),
            "Running scenario"
        );

        let mut session = Session {
            rpc: &self.chain.rpc,
            confirmation: self.confirmation,
            settings: &settings,
            addresses: &addresses,
            actors: &actors,
            deployer,
            actions: Vec::new(),
            queries: Vec::new(),
        };

        for (i, action) in scenario.actions.iter().enumerate() {
            let path = (i + 1).to_string();
            session
                .execute(&path, action)
                .await
                .with_context(|| format!("Action #{} ({}) failed", path, action.describe()))?;
        }

        let report = ScenarioReport {
            scenario: scenario.name.clone(),
            deployment,
            actions: session.actions,
            queries: session.queries,
        };

        tracing::info!(
            scenario = %report.scenario,
            calls = report.calls(),
            expected_reverts = report.expected_reverts(),
            advances = report.advances(),
            queries = report.queries.len(),
            "Scenario passed"
        );

        Ok(report)
    }
}

async fn deploy_script(
    path: &Path,
    scenario: &Scenario,
    rpc: &EthRpc,
    actors: &BTreeMap<String, Address>,
    addresses: &BTreeMap<String, Address>,
    artifacts: Option<ArtifactStore>,
    confirmation: ConfirmationPolicy,
) -> Result<(DeploymentBook, BTreeMap<String, toml::Value>)> {
    let mut script = Script::load(path)?;
    script.settings.extend(scenario.settings.clone());
    let settings = script.settings.clone();

    let deployer = actors
        .get(&scenario.deployer)
        .copied()
        .with_context(|| format!("Deployer `{}` is not a declared actor", scenario.deployer))?;
    let artifacts = artifacts.context("Deploying a script needs compiled artifacts")?;

    tracing::info!(script = %script.name, %deployer, "Deploying scenario contracts");

    let report = Orchestrator::new(script, rpc.clone(), Sender::Unlocked(deployer), artifacts)
        .network("harness")
        .confirmation(confirmation)
        .known_addresses(addresses.clone())
        .run(&RunOptions {
            selection: scenario.steps.clone(),
            skip_verification: true,
            ..Default::default()
        })
        .await
        .context("Scenario deployment failed")?;

    Ok((report.book, settings))
}

/// The node's message when `err` is a rejection or a reverted receipt.
fn revert_message(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        if let Some(LedgerError::Rejected { message, .. }) = cause.downcast_ref::<LedgerError>() {
            return Some(message.clone());
        }
        match cause.downcast_ref::<ConfirmationError>() {
            Some(ConfirmationError::Reverted { .. }) => Some(String::new()),
            _ => None,
        }
    })
}

struct Session<'a> {
    rpc: &'a EthRpc,
    confirmation: ConfirmationPolicy,
    settings: &'a BTreeMap<String, toml::Value>,
    addresses: &'a BTreeMap<String, Address>,
    actors: &'a BTreeMap<String, Address>,
    deployer: Address,
    actions: Vec<ActionRecord>,
    queries: Vec<QueryResult>,
}

impl Session<'_> {
    fn resolver(&self) -> ValueResolver<'_> {
        ValueResolver::new(self.settings, self.addresses)
    }

    fn address_of(&self, target: &str) -> Result<Address> {
        let name = contract_name(target);
        self.addresses
            .get(name)
            .copied()
            .with_context(|| format!("Unknown contract `{}`", name))
    }

    fn actor(&self, name: &str) -> Result<Address> {
        self.actors
            .get(name)
            .copied()
            .with_context(|| format!("Unknown actor `{}`", name))
    }

    async fn execute(&mut self, path: &str, action: &Action) -> Result<()> {
        let outcome = match action {
            Action::Repeat {
                times,
                mode,
                seed,
                actions,
            } => return self.repeat(path, *times, *mode, *seed, actions).await,
            Action::Call {
                actor,
                target,
                signature,
                args,
                expect,
            } => self.call(actor, target, signature, args, expect).await?,
            Action::Advance { weeks } => self.advance(*weeks).await?,
            Action::Query {
                target,
                signature,
                args,
                labels,
                expect,
                from,
            } => {
                self.query(path, target, signature, args, labels, expect.as_deref(), from.as_deref())
                    .await?
            }
        };

        self.actions.push(ActionRecord {
            path: path.to_string(),
            description: action.describe(),
            outcome,
        });
        Ok(())
    }

    async fn repeat(
        &mut self,
        path: &str,
        times: usize,
        mode: RepeatMode,
        seed: Option<u64>,
        actions: &[Action],
    ) -> Result<()> {
        let seed = seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        tracing::info!(times, %mode, seed, "Repeating actions");

        for iteration in 1..=times {
            match mode {
                RepeatMode::Sequential => {
                    for (j, action) in actions.iter().enumerate() {
                        let sub_path = format!("{}.{}.{}", path, iteration, j + 1);
                        Box::pin(self.execute(&sub_path, action))
                            .await
                            .with_context(|| format!("{} (seed {})", action.describe(), seed))?;
                    }
                }
                RepeatMode::Random => {
                    let pick = rng.random_range(0..actions.len());
                    let sub_path = format!("{}.{}.{}", path, iteration, pick + 1);
                    Box::pin(self.execute(&sub_path, &actions[pick]))
                        .await
                        .with_context(|| {
                            format!("{} (seed {})", actions[pick].describe(), seed)
                        })?;
                }
            }
        }

        Ok(())
    }

    async fn submit_as(&self, from: Address, to: Address, data: Bytes) -> Result<TransactionReceipt> {
        let tx_hash = Sender::Unlocked(from)
            .submit(self.rpc, TxRequest::call(to, data))
            .await?;
        wait_for_receipt(self.rpc, tx_hash, &self.confirmation).await
    }

    async fn call(
        &self,
        actor: &str,
        target: &str,
        signature: &str,
        args: &[toml::Value],
        expect: &Expect,
    ) -> Result<Outcome> {
        let from = self.actor(actor)?;
        let to = self.address_of(target)?;
        let sig = FunctionSig::parse(signature)?;
        let values = self
            .resolver()
            .resolve_all(&sig.inputs, args)
            .with_context(|| format!("Invalid arguments for {}", sig))?;

        tracing::debug!(
            actor,
            target = %contract_name(target),
            call = %sig,
            args = ?values.iter().map(format_value).collect::<Vec<_>>(),
            "Calling"
        );

        let result = self.submit_as(from, to, sig.encode_call(values)?).await;

        match (result, expect) {
            (Ok(receipt), Expect::Success) => Ok(Outcome::Succeeded {
                block: receipt.block(),
            }),
            (Ok(receipt), Expect::Revert { .. }) => anyhow::bail!(
                "{}.{} from {} was expected to revert but succeeded (tx {})",
                contract_name(target),
                sig,
                actor,
                receipt.transaction_hash
            ),
            (Err(e), Expect::Success) => Err(e),
            (Err(e), Expect::Revert { reason }) => {
                let Some(message) = revert_message(&e) else {
                    return Err(e.context("Expected a revert, got a different failure"));
                };
                if let Some(reason) = reason
                    && !message.contains(reason.as_str())
                {
                    anyhow::bail!(
                        "Reverted with `{}`, expected a reason containing `{}`",
                        message,
                        reason
                    );
                }
                tracing::info!(actor, target = %contract_name(target), call = %sig, %message, "Reverted as expected");
                Ok(Outcome::Reverted(message))
            }
        }
    }

    async fn advance(&self, weeks: u64) -> Result<Outcome> {
        let seconds = weeks
            .checked_mul(EPOCH_SECONDS)
            .with_context(|| format!("Advancing {} weeks overflows the clock", weeks))?;
        let before = self.rpc.latest_block().await?.timestamp.to::<u64>();
        let target = before
            .checked_add(seconds)
            .with_context(|| format!("Advancing {} s from {} overflows the clock", seconds, before))?;

        self.rpc.set_next_block_timestamp(target).await?;
        self.rpc.mine().await?;

        let after = self.rpc.latest_block().await?.timestamp.to::<u64>();
        if after != target {
            anyhow::bail!(
                "Chain clock is at {} after advancing {} s from {}",
                after,
                seconds,
                before
            );
        }

        tracing::info!(weeks, from = before, to = after, "Advanced chain clock");
        Ok(Outcome::Advanced { timestamp: after })
    }

    #[allow(clippy::too_many_arguments)]
    async fn query(
        &mut self,
        path: &str,
        target: &str,
        signature: &str,
        args: &[toml::Value],
        labels: &[String],
        expect: Option<&[toml::Value]>,
        from: Option<&str>,
    ) -> Result<Outcome> {
        let to = self.address_of(target)?;
        let caller = match from {
            Some(actor) => self.actor(actor)?,
            None => self.deployer,
        };
        let sig = FunctionSig::parse(signature)?;
        let values = self
            .resolver()
            .resolve_all(&sig.inputs, args)
            .with_context(|| format!("Invalid arguments for {}", sig))?;

        let output = self
            .rpc
            .call(&TxRequest::call(to, sig.encode_call(values)?).from(caller))
            .await
            .with_context(|| format!("{}.{} failed", contract_name(target), sig))?;
        let decoded = sig.decode_output(&output)?;

        let labels = (0..decoded.len())
            .map(|i| labels.get(i).cloned().unwrap_or_else(|| format!("#{}", i)))
            .collect::<Vec<_>>();

        let mut fields = Vec::with_capacity(decoded.len());
        for (label, value) in labels.iter().zip(&decoded) {
            let rendered = format_value(value);
            tracing::info!(target = %contract_name(target), field = %label, value = %rendered, "Query result");
            fields.push((label.clone(), rendered));
        }

        if let Some(expected) = expect {
            let resolver = self.resolver();
            for ((label, ty), (value, want)) in labels
                .iter()
                .zip(&sig.outputs)
                .zip(decoded.iter().zip(expected))
            {
                let want = resolver
                    .resolve(want, ty)
                    .with_context(|| format!("Expected value for `{}`", label))?;
                if *value != want {
                    anyhow::bail!(
                        "`{}` is {}, expected {}",
                        label,
                        format_value(value),
                        format_value(&want)
                    );
                }
            }
        }

        self.queries.push(QueryResult {
            path: path.to_string(),
            target: contract_name(target).to_string(),
            signature: sig.to_string(),
            fields,
        });

        Ok(Outcome::Queried)
    }
}
