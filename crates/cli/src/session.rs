//! Scripted client sessions.
//!
//! A session script is a JSON array of steps, each naming a branch workflow
//! and the branch it runs on. `apply` steps carry the operation in its wire
//! form.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use modelsync_core::wire::OperationMessage;
use modelsync_core::{BranchCoordinator, CommitOutcome};

/// Branch workflow a step runs.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Checkout,
    Apply,
    Update,
    Commit,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Checkout => write!(f, "checkout"),
            Self::Apply => write!(f, "apply"),
            Self::Update => write!(f, "update"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// One scripted step.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub action: Action,
    pub branch: String,
    #[serde(default)]
    pub operation: Option<OperationMessage>,
}

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub action: Action,
    pub branch: String,
    /// Operations the step replayed, recorded or published.
    pub operations: usize,
    pub detail: String,
    pub rejected: bool,
}

pub fn load_script(path: &Path) -> Result<Vec<Step>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    parse_script(&contents).with_context(|| format!("invalid script {}", path.display()))
}

pub fn parse_script(contents: &str) -> Result<Vec<Step>> {
    Ok(serde_json::from_str(contents)?)
}

/// Run every step in order, stopping at the first failure.
pub fn execute(coordinator: &BranchCoordinator, steps: Vec<Step>) -> Result<Vec<StepOutcome>> {
    let mut outcomes = Vec::with_capacity(steps.len());
    for (index, step) in steps.into_iter().enumerate() {
        let number = index + 1;
        let outcome = execute_step(coordinator, step).with_context(|| format!("step {number} failed"))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

fn execute_step(coordinator: &BranchCoordinator, step: Step) -> Result<StepOutcome> {
    let Step {
        action,
        branch,
        operation,
    } = step;

    let (operations, detail, rejected) = match action {
        Action::Checkout => {
            let history = coordinator.checkout(&branch)?;
            (history.len(), format!("{} operation(s) replayed", history.len()), false)
        }
        Action::Apply => {
            let Some(message) = operation else {
                bail!("apply on '{branch}' has no operation");
            };
            let operation = message.into_operation(&branch)?;
            let kind = operation.operation_type();
            let element = operation.element_id.clone();
            let id = coordinator.apply_local(&branch, operation)?;
            (1, format!("{kind} on '{element}' recorded as {id}"), false)
        }
        Action::Update => {
            let report = coordinator.update_with_report(&branch)?;
            (
                report.absorbed.len() + report.resolutions.len(),
                format!(
                    "{} absorbed, {} conflict(s), {} resolution(s)",
                    report.absorbed.len(),
                    report.conflicts.len(),
                    report.resolutions.len()
                ),
                false,
            )
        }
        Action::Commit => match coordinator.commit_with_outcome(&branch)? {
            CommitOutcome::Published { operations } => (
                operations.len(),
                format!(
                    "{} operation(s) published to '{}'",
                    operations.len(),
                    coordinator.primary_branch()
                ),
                false,
            ),
            CommitOutcome::Rejected { pending } => (
                0,
                format!(
                    "rejected: '{}' has {pending} newer operation(s), update first",
                    coordinator.primary_branch()
                ),
                true,
            ),
        },
    };

    Ok(StepOutcome {
        action,
        branch,
        operations,
        detail,
        rejected,
    })
}
