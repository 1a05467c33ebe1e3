//! Branch coordination on top of the shared operation log.
//!
//! The [`BranchCoordinator`] owns the log, one materialized [`Model`] per
//! branch and the live listener hub. It implements the four branch
//! workflows:
//!
//! 1. **checkout** -- bind a branch to the primary tip (first time only) and
//!    rebuild its model from history.
//! 2. **apply_local** -- record a client operation on a branch and mutate its
//!    model.
//! 3. **update** -- absorb primary changes made since divergence, detecting
//!    and resolving conflicts with the branch's own changes.
//! 4. **commit** -- fast-forward the primary branch onto a branch tip when
//!    the primary has not moved since divergence.
//!
//! Locks are always taken in the order: model table, one branch model, log.
//! Every multi-step log traversal runs under a single log lock, and live
//! publication happens while that lock is still held so subscribers observe
//! operations in log order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::conflict::{Conflict, ConflictDetector, ConflictResolver};
use crate::errors::CoordinatorError;
use crate::hub::{OperationHub, Subscription};
use crate::model::{ApplyMode, Model, SchemaRegistry};
use crate::operation::Operation;
use crate::oplog::{branch_key, LogSnapshot, OperationLog};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Everything an update did to a branch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    /// Primary operations absorbed into the branch model, in log order.
    pub absorbed: Vec<Operation>,
    /// Conflicts found between the primary delta and the branch delta.
    pub conflicts: Vec<Conflict>,
    /// Resolutions recorded on the branch, one per conflict.
    pub resolutions: Vec<Operation>,
}

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// The primary branch now points at the branch tip. Holds the operations
    /// that became part of the primary history.
    Published { operations: Vec<Operation> },
    /// The primary moved since divergence; the branch must update first.
    Rejected { pending: usize },
}

impl CommitOutcome {
    /// Operations that reached the primary branch; empty when rejected.
    pub fn into_operations(self) -> Vec<Operation> {
        match self {
            Self::Published { operations } => operations,
            Self::Rejected { .. } => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BranchSlot {
    model: Model,
    checked_out: bool,
}

/// Coordinates per-branch models over one shared operation log.
#[derive(Debug)]
pub struct BranchCoordinator {
    primary: String,
    schema: SchemaRegistry,
    models: Mutex<HashMap<String, Arc<Mutex<BranchSlot>>>>,
    log: Mutex<OperationLog>,
    hub: OperationHub,
}

impl Default for BranchCoordinator {
    fn default() -> Self {
        Self::new(&AppConfig::default())
    }
}

impl BranchCoordinator {
    /// Create a coordinator whose log holds only the root, bound to the
    /// configured primary branch.
    pub fn new(config: &AppConfig) -> Self {
        let primary = config.branches.primary.clone();
        let schema = config.schema();

        let mut models = HashMap::new();
        models.insert(
            branch_key(&primary),
            Arc::new(Mutex::new(BranchSlot {
                model: Model::with_schema(primary.as_str(), schema.clone()),
                checked_out: true,
            })),
        );

        info!(
            primary = %primary,
            element_types = schema.len(),
            "branch coordinator initialised"
        );

        Self {
            log: Mutex::new(OperationLog::new(&primary)),
            hub: OperationHub::new(config.hub.channel_capacity),
            models: Mutex::new(models),
            primary,
            schema,
        }
    }

    /// Shorthand for a default configuration with a different primary name.
    pub fn with_primary(primary: &str) -> Self {
        let mut config = AppConfig::default();
        config.branches.primary = primary.to_string();
        Self::new(&config)
    }

    pub fn primary_branch(&self) -> &str {
        &self.primary
    }

    pub fn hub(&self) -> &OperationHub {
        &self.hub
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    fn log(&self) -> MutexGuard<'_, OperationLog> {
        self.log.lock().unwrap_or_else(|poisoned| {
            warn!("operation log mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_slot(slot: &Mutex<BranchSlot>) -> MutexGuard<'_, BranchSlot> {
        slot.lock().unwrap_or_else(|poisoned| {
            warn!("branch model mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Get or create the slot for `branch`. The table lock is released
    /// before the caller locks the slot.
    fn slot(&self, branch: &str) -> Arc<Mutex<BranchSlot>> {
        let mut models = self.models.lock().unwrap_or_else(|poisoned| {
            warn!("model table mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(models.entry(branch_key(branch)).or_insert_with(|| {
            debug!(branch, "created branch model");
            Arc::new(Mutex::new(BranchSlot {
                model: Model::with_schema(branch, self.schema.clone()),
                checked_out: false,
            }))
        }))
    }

    fn existing_slot(&self, branch: &str) -> Option<Arc<Mutex<BranchSlot>>> {
        let models = self.models.lock().unwrap_or_else(|poisoned| {
            warn!("model table mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        models.get(&branch_key(branch)).cloned()
    }

    // -----------------------------------------------------------------------
    // Materialization
    // -----------------------------------------------------------------------

    /// Bind `branch` to the primary tip if it has never been seen, then
    /// rebuild its model from scratch. Returns the replayed history.
    fn materialize(
        &self,
        branch: &str,
        slot: &mut BranchSlot,
        log: &mut OperationLog,
    ) -> Result<Vec<Operation>, CoordinatorError> {
        if !log.has_token(branch) {
            let base = log.tip_id(&self.primary);
            log.set_token(branch, base)
                .map_err(|e| CoordinatorError::structural(branch, e))?;
            info!(branch, base = %base, "branch bound to primary tip");
        }

        let history = log
            .full_history(branch)
            .map_err(|e| CoordinatorError::structural(branch, e))?;

        slot.model.reset();
        slot.model
            .apply_all(&history, ApplyMode::Replaying)
            .map_err(|e| CoordinatorError::structural(branch, e))?;
        slot.checked_out = true;

        debug!(branch, replayed = history.len(), "branch model materialized");
        Ok(history)
    }

    fn ensure_materialized(
        &self,
        branch: &str,
        slot: &mut BranchSlot,
        log: &mut OperationLog,
    ) -> Result<(), CoordinatorError> {
        if !slot.checked_out {
            self.materialize(branch, slot, log)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Materialize `branch` and return its full history, oldest first.
    ///
    /// A branch seen for the first time starts at the current primary tip.
    /// Checking out an already-bound branch rebuilds its model from the log
    /// without moving the branch.
    pub fn checkout(&self, branch: &str) -> Result<Vec<Operation>, CoordinatorError> {
        let slot = self.slot(branch);
        let mut slot = Self::lock_slot(&slot);
        let mut log = self.log();

        let history = self.materialize(branch, &mut slot, &mut log)?;
        info!(branch, operations = history.len(), "checked out branch");
        Ok(history)
    }

    /// Record a client operation on `branch` and apply it to the branch
    /// model. The operation is re-stamped with the branch name and published
    /// to the branch's live listeners.
    pub fn apply_local(
        &self,
        branch: &str,
        mut operation: Operation,
    ) -> Result<Uuid, CoordinatorError> {
        let slot = self.slot(branch);
        let mut slot = Self::lock_slot(&slot);
        let mut log = self.log();
        self.ensure_materialized(branch, &mut slot, &mut log)?;

        operation.branch = branch.to_string();
        slot.model
            .apply(&operation, ApplyMode::Committing(&mut log))
            .map_err(|e| CoordinatorError::from_append(branch, e))?;

        let listeners = self.hub.publish(branch, &operation);
        debug!(
            branch,
            op = %operation.id,
            kind = %operation.operation_type(),
            element = %operation.element_id,
            listeners,
            "applied local operation"
        );
        Ok(operation.id)
    }

    /// Absorb primary changes into `branch` and return the resolutions that
    /// were recorded on it.
    pub fn update(&self, branch: &str) -> Result<Vec<Operation>, CoordinatorError> {
        Ok(self.update_with_report(branch)?.resolutions)
    }

    /// Like [`update`](Self::update) but reports the absorbed delta and the
    /// detected conflicts too.
    ///
    /// The primary delta is replayed into the branch model without being
    /// recorded on the branch. Each resolution is recorded on the branch
    /// after the whole delta has been replayed, so resolutions win.
    pub fn update_with_report(&self, branch: &str) -> Result<UpdateReport, CoordinatorError> {
        let slot = self.slot(branch);
        let mut slot = Self::lock_slot(&slot);
        let mut log = self.log();
        self.ensure_materialized(branch, &mut slot, &mut log)?;

        let structural = |e| CoordinatorError::structural(branch, e);
        let ancestor = log
            .lowest_common_ancestor(branch, &self.primary)
            .map_err(structural)?;
        let public_delta = log
            .path_operations(ancestor, log.tip_id(&self.primary))
            .map_err(structural)?;
        let local_delta = log
            .path_operations(ancestor, log.tip_id(branch))
            .map_err(structural)?;

        let mut conflicts = ConflictDetector::detect(&public_delta, &local_delta);
        let resolutions = ConflictResolver::resolve(&mut conflicts);

        slot.model
            .apply_all(&public_delta, ApplyMode::Replaying)
            .map_err(structural)?;

        for resolution in &resolutions {
            slot.model
                .apply(resolution, ApplyMode::Committing(&mut log))
                .map_err(|e| CoordinatorError::from_append(branch, e))?;
            self.hub.publish(branch, resolution);
        }

        info!(
            branch,
            ancestor = %ancestor,
            absorbed = public_delta.len(),
            local = local_delta.len(),
            conflicts = conflicts.len(),
            "updated branch from primary"
        );

        Ok(UpdateReport {
            absorbed: public_delta,
            conflicts,
            resolutions,
        })
    }

    /// Fast-forward the primary branch onto `branch` and return the
    /// operations it gained. Returns an empty list when the primary moved
    /// since divergence.
    pub fn commit(&self, branch: &str) -> Result<Vec<Operation>, CoordinatorError> {
        Ok(self.commit_with_outcome(branch)?.into_operations())
    }

    /// Like [`commit`](Self::commit) but distinguishes a rejected commit from
    /// one with nothing to publish.
    pub fn commit_with_outcome(&self, branch: &str) -> Result<CommitOutcome, CoordinatorError> {
        {
            let slot = self.slot(branch);
            let mut slot = Self::lock_slot(&slot);
            let mut log = self.log();
            self.ensure_materialized(branch, &mut slot, &mut log)?;
        }

        let public = self.slot(&self.primary);
        let mut public = Self::lock_slot(&public);
        let mut log = self.log();

        let structural = |e| CoordinatorError::structural(branch, e);
        let ancestor = log
            .lowest_common_ancestor(branch, &self.primary)
            .map_err(structural)?;
        let pending = log
            .path_exclusive(ancestor, log.tip_id(&self.primary))
            .map_err(structural)?;

        if !pending.is_empty() {
            info!(
                branch,
                pending = pending.len(),
                "commit rejected, primary moved since divergence"
            );
            return Ok(CommitOutcome::Rejected {
                pending: pending.len(),
            });
        }

        let branch_tip = log.tip_id(branch);
        let local_delta = log
            .path_operations(ancestor, branch_tip)
            .map_err(structural)?;

        public
            .model
            .apply_all(&local_delta, ApplyMode::Replaying)
            .map_err(structural)?;
        log.set_token(&self.primary, branch_tip)
            .map_err(structural)?;

        for operation in &local_delta {
            self.hub.publish(&self.primary, operation);
        }

        info!(
            branch,
            primary = %self.primary,
            tip = %branch_tip,
            operations = local_delta.len(),
            "committed branch to primary"
        );
        Ok(CommitOutcome::Published {
            operations: local_delta,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Subscribe to live operations on `branch`, returning its history up to
    /// the moment of subscription. Nothing recorded afterwards is missed or
    /// delivered twice.
    pub fn subscribe(
        &self,
        branch: &str,
    ) -> Result<(Vec<Operation>, Subscription), CoordinatorError> {
        let slot = self.slot(branch);
        let mut slot = Self::lock_slot(&slot);
        let mut log = self.log();
        self.ensure_materialized(branch, &mut slot, &mut log)?;

        let history = log
            .full_history(branch)
            .map_err(|e| CoordinatorError::structural(branch, e))?;
        let subscription = self.hub.subscribe(branch);
        info!(branch, history = history.len(), "listener attached");
        Ok((history, subscription))
    }

    /// Full history of `branch` as currently recorded, without materializing
    /// it. An unbound branch reads as the primary history would from the root.
    pub fn history(&self, branch: &str) -> Result<Vec<Operation>, CoordinatorError> {
        self.log()
            .full_history(branch)
            .map_err(|e| CoordinatorError::structural(branch, e))
    }

    /// Copy of the materialized model of `branch`, if it has been checked out.
    pub fn model(&self, branch: &str) -> Option<Model> {
        let slot = self.existing_slot(branch)?;
        let slot = Self::lock_slot(&slot);
        slot.checked_out.then(|| slot.model.clone())
    }

    /// The most recent operation on `branch`, `None` if it was never bound.
    /// A branch still at the root yields the root sentinel.
    pub fn tip(&self, branch: &str) -> Option<Operation> {
        self.log().tip(branch).cloned()
    }

    /// Serializable view of the whole log.
    pub fn snapshot(&self) -> LogSnapshot {
        self.log().snapshot()
    }
}
