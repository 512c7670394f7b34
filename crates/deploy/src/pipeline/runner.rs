//! Sequential execution of a validated plan.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};

use super::{
    context::RunContext,
    plan::{Plan, PriorState},
    script::Script,
    step::StepKind,
};
use crate::{
    artifacts::ArtifactStore,
    confirm::ConfirmationPolicy,
    deployment_hash::SettingsFingerprint,
    explorer::SourceVerifier,
    record::{DeploymentBook, RecordLock},
    rpc::EthRpc,
    signer::Sender,
};

/// Options for one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Step ids to run, overriding the script's `enabled` list.
    pub selection: Option<Vec<String>>,
    /// Log verification failures and continue instead of aborting.
    pub keep_going: bool,
    pub skip_verification: bool,
    /// Record file to resume from and checkpoint into. Nothing is persisted when absent.
    pub records_path: Option<PathBuf>,
    /// Ignore existing records and start over.
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub book: DeploymentBook,
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    /// Verification steps that failed under `keep_going`, with the error.
    pub failed_verifications: Vec<(String, String)>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed_verifications.is_empty()
    }
}

/// Runs one script against one network with one signing identity.
pub struct Orchestrator {
    script: Script,
    network: String,
    rpc: EthRpc,
    sender: Sender,
    artifacts: ArtifactStore,
    verifier: Option<Arc<dyn SourceVerifier>>,
    confirmation: ConfirmationPolicy,
    known: BTreeMap<String, Address>,
}

impl Orchestrator {
    pub fn new(script: Script, rpc: EthRpc, sender: Sender, artifacts: ArtifactStore) -> Self {
        let confirmation = script.confirmation.unwrap_or_default();
        Self {
            script,
            network: "local".to_string(),
            rpc,
            sender,
            artifacts,
            verifier: None,
            confirmation,
            known: BTreeMap::new(),
        }
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn SourceVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Overrides the script's confirmation policy.
    pub fn confirmation(mut self, confirmation: ConfirmationPolicy) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Extra `@Name` bindings, e.g. harness actors or contracts from another script's records.
    pub fn known_addresses(mut self, known: BTreeMap<String, Address>) -> Self {
        self.known.extend(known);
        self
    }

    /// Open the record book for this run, discarding it when the settings changed.
    fn open_book(&self, options: &RunOptions, chain_id: u64, hash: &str) -> Result<DeploymentBook> {
        let fresh = || DeploymentBook::new(&self.script.name, &self.network, chain_id, hash.to_string());

        let Some(path) = &options.records_path else {
            return Ok(fresh());
        };
        if options.fresh {
            tracing::info!(path = %path.display(), "Starting from fresh records");
            return Ok(fresh());
        }

        match DeploymentBook::load(path)? {
            Some(book) if book.version.settings_hash == hash => {
                tracing::info!(
                    path = %path.display(),
                    records = book.records.len(),
                    completed = book.completed.len(),
                    "Resuming from existing records"
                );
                Ok(book)
            }
            Some(book) => {
                tracing::warn!(
                    path = %path.display(),
                    recorded = %book.version.settings_hash,
                    current = %hash,
                    "Settings changed since the records were written, discarding them"
                );
                Ok(fresh())
            }
            None => Ok(fresh()),
        }
    }

    /// Validate the plan, then run every pending step in order.
    ///
    /// The first failing step aborts the run, except verification failures under
    /// `keep_going`. Records are saved after each completed step, so a rerun resumes
    /// after the last one.
    pub async fn run(self, options: &RunOptions) -> Result<RunReport> {
        let chain_id = self.rpc.chain_id().await.context("Failed to fetch chain id")?;
        let hash = SettingsFingerprint::from_script(&self.script, &self.network, chain_id)
            .with_known_addresses(&self.script, &self.known)
            .compute_hash()?;

        let _lock = options
            .records_path
            .as_deref()
            .map(RecordLock::acquire)
            .transpose()?;

        let book = self.open_book(options, chain_id, &hash)?;

        let prior = PriorState::from_book(&book).with_contracts(self.known.keys().cloned());
        let plan = Plan::build(&self.script, options.selection.as_deref(), &prior)?;

        tracing::info!(
            script = %self.script.name,
            network = %self.network,
            chain_id,
            deployer = %self.sender.address(),
            steps = plan.steps.len(),
            pending = plan.pending().count(),
            "Starting run"
        );

        let mut ctx = RunContext {
            script: self.script,
            network: self.network,
            rpc: self.rpc,
            sender: self.sender,
            artifacts: self.artifacts,
            verifier: self.verifier,
            confirmation: self.confirmation,
            book,
            known: self.known,
        };

        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut failed_verifications = Vec::new();

        for step in &plan.steps {
            let id = step.id();
            let is_verify = step.kind() == StepKind::Verify;

            if step.completed {
                tracing::info!(step = %id, "Already completed, skipping");
                skipped.push(id.to_string());
                continue;
            }
            if is_verify && options.skip_verification {
                tracing::info!(step = %id, "Verification disabled, skipping");
                skipped.push(id.to_string());
                continue;
            }

            tracing::info!(step = %id, kind = %step.kind(), action = %step.spec.action.summary(), "Running step");

            match step.spec.action.run(id, &mut ctx).await {
                Ok(()) => {
                    ctx.book.mark_completed(id);
                    if let Some(path) = &options.records_path {
                        ctx.book
                            .save(path)
                            .with_context(|| format!("Failed to checkpoint after step `{}`", id))?;
                    }
                    tracing::info!(step = %id, "Step completed");
                    executed.push(id.to_string());
                }
                Err(e) if is_verify && options.keep_going => {
                    tracing::error!(step = %id, error = %format!("{:#}", e), "Verification failed, continuing");
                    failed_verifications.push((id.to_string(), format!("{:#}", e)));
                }
                Err(e) => {
                    if let Some(path) = &options.records_path
                        && let Err(save_err) = ctx.book.save(path)
                    {
                        tracing::warn!(error = %format!("{:#}", save_err), "Failed to save records after failure");
                    }
                    return Err(e.context(format!("Step `{}` failed", id)));
                }
            }
        }

        tracing::info!(
            executed = executed.len(),
            skipped = skipped.len(),
            failed_verifications = failed_verifications.len(),
            "Run complete"
        );

        Ok(RunReport {
            book: ctx.book,
            executed,
            skipped,
            failed_verifications,
        })
    }
}
