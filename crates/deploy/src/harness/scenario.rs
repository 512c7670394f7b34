//! Scenario definitions loaded from TOML.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::abi::FunctionSig;

/// Length of one emission epoch, in seconds.
pub const EPOCH_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Largest single `advance`, about a century of epochs.
pub const MAX_ADVANCE_WEEKS: u64 = 5_200;

/// Whether a call is expected to go through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Expect {
    #[default]
    Success,
    /// The call must be rejected; `reason` must appear in the node's message when given.
    Revert {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RepeatMode {
    /// Every sub-action, in order, each iteration.
    #[default]
    Sequential,
    /// One randomly chosen sub-action per iteration.
    Random,
}

/// One scripted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    /// State-changing call from an actor.
    Call {
        actor: String,
        target: String,
        signature: String,
        #[serde(default)]
        args: Vec<toml::Value>,
        #[serde(default)]
        expect: Expect,
    },
    /// Move the chain clock forward by whole epochs and mine a block.
    Advance { weeks: u64 },
    /// Read-only call; decoded fields are logged and reported.
    Query {
        target: String,
        /// Must declare `returns (...)`.
        signature: String,
        #[serde(default)]
        args: Vec<toml::Value>,
        /// Field names for the returned values.
        #[serde(default)]
        labels: Vec<String>,
        /// Expected values, compared field by field.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<Vec<toml::Value>>,
        /// Caller for the query; the deployer when unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Repeat {
        times: usize,
        #[serde(default)]
        mode: RepeatMode,
        /// Seed for `random` mode; one is drawn and logged when unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
        actions: Vec<Action>,
    },
}

impl Action {
    pub fn describe(&self) -> String {
        match self {
            Self::Call {
                actor,
                target,
                signature,
                ..
            } => format!("{} calls {}.{}", actor, target, signature),
            Self::Advance { weeks } => format!("advance {} week(s)", weeks),
            Self::Query {
                target, signature, ..
            } => format!("query {}.{}", target, signature),
            Self::Repeat {
                times,
                mode,
                actions,
                ..
            } => format!("repeat {} action(s) {} times ({})", actions.len(), times, mode),
        }
    }

    fn validate(&self, actors: &BTreeMap<String, usize>, nested: bool) -> Result<()> {
        match self {
            Self::Call {
                actor,
                signature,
                args,
                ..
            } => {
                if !actors.contains_key(actor) {
                    anyhow::bail!("Unknown actor `{}`", actor);
                }
                let sig = FunctionSig::parse(signature)?;
                if sig.inputs.len() != args.len() {
                    anyhow::bail!(
                        "{} takes {} argument(s) but {} are given",
                        sig.canonical(),
                        sig.inputs.len(),
                        args.len()
                    );
                }
            }
            Self::Advance { weeks } => {
                if *weeks == 0 {
                    anyhow::bail!("`advance` needs at least one week");
                }
                if *weeks > MAX_ADVANCE_WEEKS {
                    anyhow::bail!(
                        "`advance` of {} weeks exceeds the limit of {}",
                        weeks,
                        MAX_ADVANCE_WEEKS
                    );
                }
            }
            Self::Query {
                signature,
                args,
                labels,
                expect,
                from,
                ..
            } => {
                let sig = FunctionSig::parse(signature)?;
                if sig.outputs.is_empty() {
                    anyhow::bail!("Query {} must declare `returns (...)`", sig.canonical());
                }
                if sig.inputs.len() != args.len() {
                    anyhow::bail!(
                        "{} takes {} argument(s) but {} are given",
                        sig.canonical(),
                        sig.inputs.len(),
                        args.len()
                    );
                }
                if !labels.is_empty() && labels.len() != sig.outputs.len() {
                    anyhow::bail!(
                        "{} label(s) for {} returned value(s)",
                        labels.len(),
                        sig.outputs.len()
                    );
                }
                if let Some(expect) = expect
                    && expect.len() != sig.outputs.len()
                {
                    anyhow::bail!(
                        "{} expected value(s) for {} returned value(s)",
                        expect.len(),
                        sig.outputs.len()
                    );
                }
                if let Some(from) = from
                    && !actors.contains_key(from)
                {
                    anyhow::bail!("Unknown actor `{}`", from);
                }
            }
            Self::Repeat { times, actions, .. } => {
                if nested {
                    anyhow::bail!("`repeat` actions cannot be nested");
                }
                if *times == 0 || actions.is_empty() {
                    anyhow::bail!("`repeat` needs at least one iteration and one action");
                }
                for action in actions {
                    action.validate(actors, true)?;
                }
            }
        }
        Ok(())
    }
}

/// A scripted multi-actor scenario against a local chain.
///
/// ```toml
/// name = "epoch-distribution"
/// script = "../scripts/core.toml"
///
/// [actors]
/// deployer = 0
/// alice = 1
///
/// [[actions]]
/// kind = "advance"
/// weeks = 1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Pipeline deployed before the actions run, relative to the scenario file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    /// Subset of the script's steps to deploy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
    /// Actor that deploys the script.
    #[serde(default = "default_deployer")]
    pub deployer: String,
    /// Settings layered over the script's, also available to actions.
    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,
    /// Actor name to dev-account index.
    #[serde(default)]
    pub actors: BTreeMap<String, usize>,
    /// Contracts already on the chain.
    #[serde(default)]
    pub contracts: BTreeMap<String, Address>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_deployer() -> String {
    "deployer".to_string()
}

impl Scenario {
    /// Load a scenario; a relative `script` path is rebased onto the scenario's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let mut scenario = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))?;

        if let (Some(script), Some(dir)) = (&scenario.script, path.parent())
            && script.is_relative()
        {
            scenario.script = Some(dir.join(script));
        }

        Ok(scenario)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut scenario: Self = toml::from_str(content)?;

        if scenario.actors.is_empty() {
            scenario.actors.insert(scenario.deployer.clone(), 0);
        }
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Scenario name must not be empty");
        }
        if self.script.is_some() && !self.actors.contains_key(&self.deployer) {
            anyhow::bail!("Deployer `{}` is not a declared actor", self.deployer);
        }
        for (i, action) in self.actions.iter().enumerate() {
            action
                .validate(&self.actors, false)
                .with_context(|| format!("Action #{} ({})", i, action.describe()))?;
        }
        Ok(())
    }
}
