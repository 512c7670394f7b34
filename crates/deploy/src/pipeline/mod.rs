//! Deployment pipelines: ordered, resumable steps per contract family.

mod context;
mod plan;
mod runner;
mod script;
mod step;
mod steps;
pub mod value;

pub use context::RunContext;
pub use plan::{Plan, PlannedStep, PriorState};
pub use runner::{Orchestrator, RunOptions, RunReport};
pub use script::Script;
pub use step::{PipelineStep, StepAction, StepKind, StepSpec};
pub use steps::{
    AttachStep, CallStep, DeployStep, FactoryStep, TransferOwnershipStep, VerifyStep,
};
pub use value::AddressLookup;
