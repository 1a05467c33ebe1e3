//! Conflict resolution.
//!
//! The [`ConflictResolver`] turns detected conflicts into resolution
//! operations. The winner is always the operation from the longer input
//! sequence (the conflict's `right` side).

use tracing::{debug, info};

use super::detector::{Conflict, ConflictType};
use crate::operation::{Operation, OperationKind};

/// Stateless conflict resolution.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Produce one resolution operation per conflict, in conflict order.
    ///
    /// Each resolution is a copy of the winner under a fresh id. When an
    /// entity delete loses to a write, the resolution instead recreates the
    /// entity. The resolution is also recorded on its conflict.
    pub fn resolve(conflicts: &mut [Conflict]) -> Vec<Operation> {
        info!(count = conflicts.len(), "resolving conflicts");

        conflicts
            .iter_mut()
            .map(|conflict| {
                let resolution = Self::resolution_for(conflict);
                debug!(
                    conflict = %conflict.id,
                    element = %conflict.element_id(),
                    winner = %conflict.right.id,
                    resolution = %resolution.id,
                    "conflict resolved"
                );
                conflict.resolution = Some(resolution.clone());
                resolution
            })
            .collect()
    }

    fn resolution_for(conflict: &Conflict) -> Operation {
        let winner = &conflict.right;
        if conflict.conflict_type == ConflictType::ElementDelete && !winner.kind.is_delete() {
            let deleted = if conflict.left.kind.is_delete() {
                &conflict.left
            } else {
                winner
            };
            return Self::undelete(deleted);
        }
        winner.with_fresh_id()
    }

    /// A CreateElement that brings back the entity `delete` removed.
    fn undelete(delete: &Operation) -> Operation {
        Operation::new(
            delete.branch.clone(),
            delete.element_id.clone(),
            OperationKind::CreateElement { element_type: None },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictDetector;
    use crate::operation::{OperationType, PropertyValue};

    fn set(element: &str, value: &str) -> Operation {
        Operation::set_property(element, "status", PropertyValue::string(value)).on_branch("public")
    }

    #[test]
    fn test_winner_is_cloned_with_fresh_id() {
        let local = vec![set("e1", "L1")];
        let public = vec![set("e1", "P1"), set("e1", "P2")];
        let mut conflicts = ConflictDetector::detect(&public, &local);
        let resolutions = ConflictResolver::resolve(&mut conflicts);

        assert_eq!(resolutions.len(), 1);
        let resolution = &resolutions[0];
        assert_ne!(resolution.id, public[1].id);
        assert_eq!(resolution.kind, public[1].kind);
        assert_eq!(resolution.branch, "public");
        assert_eq!(resolution.element_id, "e1");
        assert_eq!(conflicts[0].resolution.as_ref(), Some(resolution));
    }

    #[test]
    fn test_delete_losing_to_write_is_undone() {
        let delete = Operation::delete_element("e1").on_branch("alice");
        let write = set("e1", "P");
        let mut conflicts = vec![Conflict::new(delete.clone(), write, ConflictType::ElementDelete)];

        let resolutions = ConflictResolver::resolve(&mut conflicts);
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].operation_type(), OperationType::CreateElement);
        assert_eq!(resolutions[0].element_id, "e1");
        assert_eq!(resolutions[0].branch, "alice");
        assert_ne!(resolutions[0].id, delete.id);
    }

    #[test]
    fn test_winning_delete_is_cloned() {
        let write = set("e1", "P");
        let delete = Operation::delete_element("e1");
        let mut conflicts = vec![Conflict::new(write, delete.clone(), ConflictType::ElementDelete)];

        let resolutions = ConflictResolver::resolve(&mut conflicts);
        assert_eq!(resolutions[0].operation_type(), OperationType::DeleteElement);
        assert_ne!(resolutions[0].id, delete.id);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(ConflictResolver::resolve(&mut []).is_empty());
    }
}
