//! Step specifications and the trait every step kind implements.

use std::future::Future;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{
    context::RunContext,
    script::Script,
    steps::{AttachStep, CallStep, DeployStep, FactoryStep, TransferOwnershipStep, VerifyStep},
};

/// The kinds of step a script can declare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    Attach,
    Deploy,
    Verify,
    Call,
    Factory,
    TransferOwnership,
}

/// Core trait for pipeline steps.
///
/// The plan uses the static description (`produces`, `requires`, `values`,
/// `authority_targets`) to validate ordering before anything is submitted; `run`
/// performs the step against the ledger.
pub trait PipelineStep {
    const KIND: StepKind;

    /// Contracts this step adds to the records.
    fn produces(&self, _script: &Script) -> Vec<String> {
        Vec::new()
    }

    /// Contracts that must be known before this step runs, besides `@` references.
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// Argument values, scanned for `@Name` and `${KEY}` references.
    fn values(&self) -> Vec<&toml::Value> {
        Vec::new()
    }

    /// Contracts the deployer acts on using its own authority.
    fn authority_targets(&self) -> Vec<String> {
        Vec::new()
    }

    /// Static checks that need no network, reported as plan errors.
    fn validate(&self, _script: &Script) -> Result<(), String> {
        Ok(())
    }

    /// One-line description for plan listings.
    fn summary(&self) -> String;

    fn run(&self, id: &str, ctx: &mut RunContext) -> impl Future<Output = Result<()>>;
}

/// A named step in a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepAction {
    Attach(AttachStep),
    Deploy(DeployStep),
    Verify(VerifyStep),
    Call(CallStep),
    Factory(FactoryStep),
    TransferOwnership(TransferOwnershipStep),
}

macro_rules! dispatch {
    ($action:expr, $step:ident => $body:expr) => {
        match $action {
            StepAction::Attach($step) => $body,
            StepAction::Deploy($step) => $body,
            StepAction::Verify($step) => $body,
            StepAction::Call($step) => $body,
            StepAction::Factory($step) => $body,
            StepAction::TransferOwnership($step) => $body,
        }
    };
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Attach(_) => AttachStep::KIND,
            Self::Deploy(_) => DeployStep::KIND,
            Self::Verify(_) => VerifyStep::KIND,
            Self::Call(_) => CallStep::KIND,
            Self::Factory(_) => FactoryStep::KIND,
            Self::TransferOwnership(_) => TransferOwnershipStep::KIND,
        }
    }

    pub fn produces(&self, script: &Script) -> Vec<String> {
        dispatch!(self, step => step.produces(script))
    }

    pub fn requires(&self) -> Vec<String> {
        dispatch!(self, step => step.requires())
    }

    pub fn values(&self) -> Vec<&toml::Value> {
        dispatch!(self, step => step.values())
    }

    pub fn authority_targets(&self) -> Vec<String> {
        dispatch!(self, step => step.authority_targets())
    }

    pub fn validate(&self, script: &Script) -> Result<(), String> {
        dispatch!(self, step => step.validate(script))
    }

    pub fn summary(&self) -> String {
        dispatch!(self, step => step.summary())
    }

    pub async fn run(&self, id: &str, ctx: &mut RunContext) -> Result<()> {
        dispatch!(self, step => step.run(id, ctx).await)
    }
}
