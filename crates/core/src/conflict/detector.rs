//! Conflict detection logic.
//!
//! Given the two operation sequences recorded on either side of a common
//! ancestor, the detector finds every (entity, property) pair written on both
//! sides.
//!
//! The shorter sequence is indexed and the longer one is scanned. Which side
//! plays which role depends only on the two lengths (the first argument is
//! indexed on a tie), and the scanned side later wins resolution.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::operation::Operation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Categorisation of a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides wrote the same property of the same entity.
    PropertyWrite,
    /// One side deleted an entity the other side touched.
    ElementDelete,
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PropertyWrite => write!(f, "property_write"),
            Self::ElementDelete => write!(f, "element_delete"),
        }
    }
}

/// A detected conflict between two divergent sequences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conflict {
    /// Unique conflict ID.
    pub id: Uuid,
    /// Operation from the shorter (indexed) sequence.
    pub left: Operation,
    /// Operation from the longer (scanned) sequence. Always the winner.
    pub right: Operation,
    pub conflict_type: ConflictType,
    /// Operation synthesized to settle the conflict, once resolved.
    pub resolution: Option<Operation>,
}

impl Conflict {
    /// Create a new conflict with a fresh UUID.
    pub fn new(left: Operation, right: Operation, conflict_type: ConflictType) -> Self {
        Self {
            id: Uuid::new_v4(),
            left,
            right,
            conflict_type,
            resolution: None,
        }
    }

    pub fn element_id(&self) -> &str {
        &self.right.element_id
    }

    pub fn property_name(&self) -> Option<&str> {
        self.right.property_name()
    }
}

/// (entity id, lowercased property name).
type ConflictKey<'a> = (&'a str, String);

fn conflict_key(op: &Operation) -> Option<ConflictKey<'_>> {
    op.property_name()
        .filter(|name| !name.trim().is_empty())
        .map(|name| (op.element_id.as_str(), name.to_ascii_lowercase()))
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless conflict detector that compares two operation sequences.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Compare two sequences recorded since a common ancestor.
    ///
    /// Operations without a property name never participate, which excludes
    /// entity deletes. Each (entity, property) pair yields at most one
    /// conflict, pairing the last indexed operation with the last scanned
    /// operation for that pair. Conflicts come out in the scanned sequence's
    /// order.
    pub fn detect(first: &[Operation], second: &[Operation]) -> Vec<Conflict> {
        let (shorter, longer) = if first.len() <= second.len() {
            (first, second)
        } else {
            (second, first)
        };

        info!(
            indexed = shorter.len(),
            scanned = longer.len(),
            "detecting conflicts"
        );

        let mut index: HashMap<ConflictKey<'_>, &Operation> = HashMap::new();
        for op in shorter {
            if let Some(key) = conflict_key(op) {
                index.insert(key, op);
            }
        }

        let mut seen = HashSet::new();
        let mut conflicts = Vec::new();
        for op in longer.iter().rev() {
            let Some(key) = conflict_key(op) else {
                continue;
            };
            let Some(indexed) = index.get(&key) else {
                continue;
            };
            if !seen.insert(key) {
                continue;
            }
            if let Some(conflict_type) = classify_conflict(indexed, op) {
                debug!(
                    element = %op.element_id,
                    property = op.property_name().unwrap_or_default(),
                    conflict_type = %conflict_type,
                    "conflict detected"
                );
                conflicts.push(Conflict::new((*indexed).clone(), op.clone(), conflict_type));
            }
        }
        conflicts.reverse();

        info!(count = conflicts.len(), "conflict detection complete");
        conflicts
    }
}

/// Classify what kind of conflict exists between two operations on the same
/// entity, or `None` if they do not conflict.
pub(crate) fn classify_conflict(left: &Operation, right: &Operation) -> Option<ConflictType> {
    if left.element_id != right.element_id {
        return None;
    }

    if left.kind.is_delete() || right.kind.is_delete() {
        return Some(ConflictType::ElementDelete);
    }

    match (left.property_name(), right.property_name()) {
        (Some(l), Some(r)) if l.eq_ignore_ascii_case(r) => Some(ConflictType::PropertyWrite),
        _ => None,
    }
}
