//! vedrome-deploy - Deployment and integration-test library for the vedrome contract suite.
//!
//! Scripts describe ordered, resumable deployment pipelines per contract family; the
//! [`pipeline::Orchestrator`] validates and runs them against a JSON-RPC endpoint. The
//! [`harness`] replays multi-actor scenarios against a local dev chain.

pub mod abi;
pub mod artifacts;
pub mod config;
pub mod confirm;
pub mod deployment_hash;
mod docker;
pub mod error;
pub mod explorer;
mod fs;
pub mod harness;
pub mod pipeline;
pub mod record;
pub mod rpc;
pub mod services;
pub mod signer;

pub use artifacts::{Artifact, ArtifactStore};
pub use config::{NetworkConfig, ProjectConfig, Secrets};
pub use confirm::ConfirmationPolicy;
pub use docker::{DevnetDocker, DevnetDockerConfig, DockerImage};
pub use error::{ConfirmationError, ExplorerError, LedgerError, PlanError};
pub use explorer::{ExplorerClient, SourceVerifier, VerificationOutcome, VerificationRequest};
pub use pipeline::{Orchestrator, Plan, PriorState, RunOptions, RunReport, Script};
pub use record::{DeploymentBook, DeploymentRecord, RecordLock};
pub use rpc::{EthRpc, HttpTransport, Transport};
pub use services::{AnvilConfig, AnvilHandler};
pub use signer::Sender;
