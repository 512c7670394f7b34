//! Plan validation: everything that can be checked before a transaction is sent.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use alloy_core::{dyn_abi::DynSolType, primitives::Address};
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};

use super::{
    script::Script,
    step::{StepAction, StepKind, StepSpec},
    value::{Canonical, References, contract_name},
};
use crate::{deployment_hash::SettingsFingerprint, error::PlanError, record::DeploymentBook};

/// What is already known before the plan starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorState {
    /// Contracts (and actors) that can be referenced without being produced.
    pub contracts: BTreeSet<String>,
    /// Contract name to the id of the step that transferred its ownership.
    pub transferred: BTreeMap<String, String>,
    /// Steps that already completed.
    pub completed: BTreeSet<String>,
}

impl PriorState {
    pub fn from_book(book: &DeploymentBook) -> Self {
        Self {
            contracts: book.records.keys().cloned().collect(),
            transferred: book
                .ownership
                .iter()
                .map(|(contract, transfer)| (contract.clone(), transfer.step.clone()))
                .collect(),
            completed: book.completed.clone(),
        }
    }

    /// Prior state from a record file, as a run of `script` would see it.
    ///
    /// Records written with other settings are stale and ignored, since a run discards
    /// them. The network and chain id are taken from the book itself.
    pub fn load_current(
        path: &Path,
        script: &Script,
        known: &BTreeMap<String, Address>,
    ) -> anyhow::Result<Self> {
        let Some(book) = DeploymentBook::load(path)? else {
            return Ok(Self::default());
        };

        let hash = SettingsFingerprint::from_script(script, &book.network, book.chain_id)
            .with_known_addresses(script, known)
            .compute_hash()?;
        if book.version.settings_hash != hash {
            tracing::warn!(
                path = %path.display(),
                "Settings changed since the records were written, a run will start over"
            );
            return Ok(Self::default());
        }

        Ok(Self::from_book(&book))
    }

    pub fn with_contracts(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.contracts.extend(names);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub spec: StepSpec,
    /// Completed in an earlier run; skipped.
    pub completed: bool,
}

impl PlannedStep {
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn kind(&self) -> StepKind {
        self.spec.action.kind()
    }
}

/// The validated, ordered list of steps to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub script: String,
    pub steps: Vec<PlannedStep>,
}

impl Plan {
    /// Validate `script` and select the steps to run.
    ///
    /// `selection` overrides the script's `enabled` list. Selected steps always run in
    /// declaration order.
    pub fn build(
        script: &Script,
        selection: Option<&[String]>,
        prior: &PriorState,
    ) -> Result<Self, PlanError> {
        let mut declared = BTreeSet::new();
        for spec in &script.steps {
            if !declared.insert(spec.id.as_str()) {
                return Err(PlanError::DuplicateStep(spec.id.clone()));
            }
        }

        let selected: Option<BTreeSet<&str>> = match selection.or(script.enabled.as_deref()) {
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !declared.contains(id.as_str())) {
                    return Err(PlanError::UnknownStep(unknown.clone()));
                }
                Some(ids.iter().map(String::as_str).collect())
            }
            None => None,
        };

        let mut known = prior.contracts.clone();
        known.extend(script.contracts.keys().cloned());
        let mut transferred = prior.transferred.clone();
        let mut steps = Vec::new();

        for spec in &script.steps {
            if selected
                .as_ref()
                .is_some_and(|selected| !selected.contains(spec.id.as_str()))
            {
                continue;
            }

            let completed = prior.completed.contains(&spec.id);
            let action = &spec.action;

            action.validate(script).map_err(|reason| PlanError::Invalid {
                step: spec.id.clone(),
                reason,
            })?;

            let refs = References::collect(action.values(), &script.settings);
            if let Some(key) = refs.settings.iter().find(|key| !script.settings.contains_key(*key)) {
                return Err(PlanError::UnknownSetting {
                    step: spec.id.clone(),
                    key: key.clone(),
                });
            }

            if !completed {
                for contract in action.requires().into_iter().chain(refs.contracts) {
                    if !known.contains(&contract) {
                        return Err(PlanError::MissingDependency {
                            step: spec.id.clone(),
                            contract,
                        });
                    }
                }

                for contract in action.authority_targets() {
                    // A transfer step that stopped partway resumes over its own targets.
                    if let Some(transfer_step) = transferred.get(&contract)
                        && *transfer_step != spec.id
                    {
                        return Err(PlanError::AfterOwnershipTransfer {
                            step: spec.id.clone(),
                            contract,
                            transfer_step: transfer_step.clone(),
                        });
                    }
                }

                check_verify_args(script, spec)?;
            }

            known.extend(action.produces(script));
            if let StepAction::TransferOwnership(_) = action {
                for contract in action.authority_targets() {
                    transferred.insert(contract, spec.id.clone());
                }
            }

            steps.push(PlannedStep {
                spec: spec.clone(),
                completed,
            });
        }

        Ok(Self {
            script: script.name.clone(),
            steps,
        })
    }

    pub fn pending(&self) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter().filter(|step| !step.completed)
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_header(vec!["#", "Step", "Kind", "Action", "Status"]);

        for (i, step) in self.steps.iter().enumerate() {
            table.add_row(vec![
                (i + 1).to_string(),
                step.id().to_string(),
                step.kind().to_string(),
                step.spec.action.summary(),
                if step.completed { "done" } else { "pending" }.to_string(),
            ]);
        }

        table
    }
}

/// Explicit verification arguments must match the arguments the script deploys with.
///
/// Arguments are compared after expanding settings and coercing literals to the
/// constructor types, when the script declares them. `@Name` references compare by name.
fn check_verify_args(script: &Script, spec: &StepSpec) -> Result<(), PlanError> {
    let StepAction::Verify(verify) = &spec.action else {
        return Ok(());
    };
    let Some(args) = &verify.args else {
        return Ok(());
    };

    let contract = contract_name(&verify.contract);
    let deployed = script.steps.iter().find_map(|other| match &other.action {
        StepAction::Deploy(deploy) if deploy.record_name() == contract => Some(deploy),
        _ => None,
    });

    if let Some(deploy) = deployed {
        let types_differ = matches!(
            (&verify.constructor, &deploy.constructor),
            (Some(a), Some(b)) if a != b
        );
        let types: Vec<Option<DynSolType>> = verify
            .constructor
            .as_ref()
            .or(deploy.constructor.as_ref())
            .map(|types| types.iter().map(|ty| DynSolType::parse(ty.trim()).ok()).collect())
            .unwrap_or_default();
        let canonical = |values: &[toml::Value]| {
            values
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    Canonical::of(value, types.get(i).and_then(Option::as_ref), &script.settings)
                })
                .collect::<Vec<_>>()
        };

        if canonical(args) != canonical(&deploy.args) || types_differ {
            return Err(PlanError::ConstructorArgsMismatch {
                step: spec.id.clone(),
                contract: contract.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
name = "core"

[settings]
TREASURY = "0x00000000000000000000000000000000000000aa"
RATE = 100

[contracts]
WETH = "0x4200000000000000000000000000000000000006"

[[steps]]
id = "deploy-token"
kind = "deploy"
artifact = "OTOKEN"
constructor = ["address", "uint256"]
args = ["@WETH", "${RATE}"]

[[steps]]
id = "deploy-voter"
kind = "deploy"
artifact = "Voter"
constructor = ["address"]
args = ["@OTOKEN"]

[[steps]]
id = "wire-minter"
kind = "call"
target = "OTOKEN"
signature = "setMinter(address)"
args = ["@Voter"]

[[steps]]
id = "verify-token"
kind = "verify"
contract = "OTOKEN"

[[steps]]
id = "handover"
kind = "transfer-ownership"
targets = ["OTOKEN", "Voter"]
new_owner = "${TREASURY}"
"#;

    fn script() -> Script {
        Script::from_toml_str(SCRIPT).unwrap()
    }

    fn ids(plan: &Plan) -> Vec<&str> {
        plan.steps.iter().map(|step| step.id()).collect()
    }

    #[test]
    fn test_full_plan_in_declaration_order() {
        let plan = Plan::build(&script(), None, &PriorState::default()).unwrap();
        assert_eq!(
            ids(&plan),
            vec!["deploy-token", "deploy-voter", "wire-minter", "verify-token", "handover"]
        );
        assert_eq!(plan.pending().count(), 5);
    }

    #[test]
    fn test_selection_keeps_declaration_order() {
        let selection = vec!["deploy-voter".to_string(), "deploy-token".to_string()];
        let plan = Plan::build(&script(), Some(&selection), &PriorState::default()).unwrap();
        assert_eq!(ids(&plan), vec!["deploy-token", "deploy-voter"]);
    }

    #[test]
    fn test_unknown_and_duplicate_steps() {
        let selection = vec!["deploy-gauge".to_string()];
        assert_eq!(
            Plan::build(&script(), Some(&selection), &PriorState::default()),
            Err(PlanError::UnknownStep("deploy-gauge".to_string()))
        );

        let mut duplicated = script();
        duplicated.steps.push(duplicated.steps[0].clone());
        assert_eq!(
            Plan::build(&duplicated, None, &PriorState::default()),
            Err(PlanError::DuplicateStep("deploy-token".to_string()))
        );
    }

    #[test]
    fn test_wiring_before_deploy_rejected() {
        let selection = vec!["wire-minter".to_string()];
        let err = Plan::build(&script(), Some(&selection), &PriorState::default()).unwrap_err();
        assert!(matches!(err, PlanError::MissingDependency { ref contract, .. } if contract == "OTOKEN"));
    }

    #[test]
    fn test_wiring_allowed_when_recorded_earlier() {
        let selection = vec!["wire-minter".to_string()];
        let prior = PriorState::default()
            .with_contracts(["OTOKEN".to_string(), "Voter".to_string()]);
        assert!(Plan::build(&script(), Some(&selection), &prior).is_ok());
    }

    #[test]
    fn test_undeclared_setting_rejected() {
        let mut script = script();
        script.settings.remove("RATE");
        assert_eq!(
            Plan::build(&script, None, &PriorState::default()),
            Err(PlanError::UnknownSetting {
                step: "deploy-token".to_string(),
                key: "RATE".to_string()
            })
        );
    }

    #[test]
    fn test_call_after_ownership_transfer_rejected() {
        let mut script = script();
        let wire = script.steps.remove(2);
        script.steps.push(wire);

        assert_eq!(
            Plan::build(&script, None, &PriorState::default()),
            Err(PlanError::AfterOwnershipTransfer {
                step: "wire-minter".to_string(),
                contract: "OTOKEN".to_string(),
                transfer_step: "handover".to_string(),
            })
        );
    }

    #[test]
    fn test_transfer_recorded_in_earlier_run_blocks_wiring() {
        let selection = vec!["wire-minter".to_string()];
        let mut prior = PriorState::default()
            .with_contracts(["OTOKEN".to_string(), "Voter".to_string()]);
        prior
            .transferred
            .insert("OTOKEN".to_string(), "handover".to_string());

        assert!(matches!(
            Plan::build(&script(), Some(&selection), &prior),
            Err(PlanError::AfterOwnershipTransfer { .. })
        ));
    }

    #[test]
    fn test_verify_args_must_match_deploy_args() {
        let mut script = script();
        if let StepAction::Verify(verify) = &mut script.steps[3].action {
            verify.args = Some(vec![
                toml::Value::String("@WETH".to_string()),
                toml::Value::Integer(101),
            ]);
        }
        assert_eq!(
            Plan::build(&script, None, &PriorState::default()),
            Err(PlanError::ConstructorArgsMismatch {
                step: "verify-token".to_string(),
                contract: "OTOKEN".to_string(),
            })
        );

        if let StepAction::Verify(verify) = &mut script.steps[3].action {
            verify.args = Some(vec![
                toml::Value::String("@WETH".to_string()),
                toml::Value::String("${RATE}".to_string()),
            ]);
        }
        assert!(Plan::build(&script, None, &PriorState::default()).is_ok());

        // Same values, different spelling.
        if let StepAction::Verify(verify) = &mut script.steps[3].action {
            verify.args = Some(vec![
                toml::Value::String("@WETH".to_string()),
                toml::Value::String("100".to_string()),
            ]);
        }
        assert!(Plan::build(&script, None, &PriorState::default()).is_ok());
    }

    #[test]
    fn test_partial_transfer_resumes_own_step() {
        let mut prior = PriorState::default()
            .with_contracts(["OTOKEN".to_string(), "Voter".to_string()]);
        prior.completed.extend(
            ["deploy-token", "deploy-voter", "wire-minter", "verify-token"].map(String::from),
        );
        prior
            .transferred
            .insert("OTOKEN".to_string(), "handover".to_string());

        let plan = Plan::build(&script(), None, &prior).unwrap();
        assert_eq!(
            plan.pending().map(|step| step.id()).collect::<Vec<_>>(),
            vec!["handover"]
        );
    }

    #[test]
    fn test_load_current_ignores_stale_records() {
        let dir = tempdir::TempDir::new("vedrome-plan").unwrap();
        let path = dir.path().join("core.json");
        let known = BTreeMap::new();

        let hash = SettingsFingerprint::from_script(&script(), "local", 31337)
            .compute_hash()
            .unwrap();
        let mut book = DeploymentBook::new("core", "local", 31337, hash);
        book.mark_completed("deploy-token");
        book.save(&path).unwrap();

        let current = PriorState::load_current(&path, &script(), &known).unwrap();
        assert!(current.completed.contains("deploy-token"));

        let mut changed = script();
        changed
            .settings
            .insert("RATE".to_string(), toml::Value::Integer(200));
        let stale = PriorState::load_current(&path, &changed, &known).unwrap();
        assert_eq!(stale, PriorState::default());

        let missing = PriorState::load_current(&dir.path().join("none.json"), &script(), &known)
            .unwrap();
        assert_eq!(missing, PriorState::default());
    }

    #[test]
    fn test_completed_steps_are_kept_but_marked() {
        let mut prior = PriorState::default();
        prior.completed.insert("deploy-token".to_string());
        prior.contracts.insert("OTOKEN".to_string());

        let plan = Plan::build(&script(), None, &prior).unwrap();
        assert!(plan.steps[0].completed);
        assert_eq!(plan.pending().count(), 4);
    }

    #[test]
    fn test_invalid_signature_reported_with_step() {
        let mut script = script();
        if let StepAction::Call(call) = &mut script.steps[2].action {
            call.signature = "setMinter(address".to_string();
        }
        assert!(matches!(
            Plan::build(&script, None, &PriorState::default()),
            Err(PlanError::Invalid { ref step, .. }) if step == "wire-minter"
        ));
    }

    #[test]
    fn test_table_lists_steps() {
        let plan = Plan::build(&script(), None, &PriorState::default()).unwrap();
        let rendered = plan.table().to_string();
        assert!(rendered.contains("deploy-token"));
        assert!(rendered.contains("transfer-ownership"));
    }
}
