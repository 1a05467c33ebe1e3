//! The persistent operation log.
//!
//! Operations are stored in an arena of [`LogNode`]s addressed by operation
//! id. Each node records its single parent and its children, so the log is a
//! tree rooted at a sentinel node. Branch tokens map a branch name to the id
//! of its current tip; a branch without a token behaves as if it pointed at
//! the root.
//!
//! The log only grows. Nodes are never removed, because other branches may
//! still reference a shared prefix.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::LogError;
use crate::operation::Operation;

/// Normalized lookup key for a branch name (names are case-insensitive).
pub(crate) fn branch_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// One operation in the log, linked to its parent and children by id.
#[derive(Debug, Clone)]
pub struct LogNode {
    pub operation: Operation,
    /// `None` only for the root sentinel.
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
}

/// Serializable view of a single node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub id: Uuid,
    pub operation: Operation,
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
}

/// Read-only copy of the whole node graph, for visualization tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogSnapshot {
    pub root_id: Uuid,
    pub nodes: BTreeMap<Uuid, NodeSnapshot>,
    /// Branch name (lowercased) to tip node id.
    pub tokens: BTreeMap<String, Uuid>,
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

/// Append-only tree of operations plus the branch token table.
#[derive(Debug)]
pub struct OperationLog {
    nodes: HashMap<Uuid, LogNode>,
    tokens: HashMap<String, Uuid>,
    root_id: Uuid,
}

impl OperationLog {
    /// Create a log holding only the root sentinel, owned by and bound to
    /// `primary_branch`.
    pub fn new(primary_branch: &str) -> Self {
        let root = Operation::root(primary_branch);
        let root_id = root.id;

        let mut nodes = HashMap::new();
        nodes.insert(
            root_id,
            LogNode {
                operation: root,
                parent: None,
                children: Vec::new(),
            },
        );

        let mut tokens = HashMap::new();
        tokens.insert(branch_key(primary_branch), root_id);

        debug!(root = %root_id, primary = primary_branch, "created operation log");
        Self {
            nodes,
            tokens,
            root_id,
        }
    }

    pub fn root_id(&self) -> Uuid {
        self.root_id
    }

    /// Number of nodes, the root sentinel included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the root sentinel is present from construction.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: Uuid) -> Option<&LogNode> {
        self.nodes.get(&id)
    }

    pub fn operation(&self, id: Uuid) -> Option<&Operation> {
        self.nodes.get(&id).map(|node| &node.operation)
    }

    // -----------------------------------------------------------------------
    // Tokens
    // -----------------------------------------------------------------------

    pub fn has_token(&self, branch: &str) -> bool {
        self.tokens.contains_key(&branch_key(branch))
    }

    /// Id of the branch's tip node, or the root if the branch has no token.
    pub fn tip_id(&self, branch: &str) -> Uuid {
        self.tokens
            .get(&branch_key(branch))
            .copied()
            .unwrap_or(self.root_id)
    }

    /// The operation at the branch's tip, or `None` if the branch has no
    /// token. A branch bound to the root yields the root sentinel.
    pub fn tip(&self, branch: &str) -> Option<&Operation> {
        self.tokens
            .get(&branch_key(branch))
            .and_then(|id| self.operation(*id))
    }

    /// Bind `branch` to an existing node.
    pub fn set_token(&mut self, branch: &str, node_id: Uuid) -> Result<(), LogError> {
        if !self.nodes.contains_key(&node_id) {
            return Err(LogError::UnknownNode(node_id));
        }
        debug!(branch, tip = %node_id, "moving branch token");
        self.tokens.insert(branch_key(branch), node_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Record `operation` as the new tip of `branch`.
    ///
    /// The new node's parent is the branch's current tip (the root if the
    /// branch has no token yet). Returns the new node's id.
    pub fn append(&mut self, branch: &str, operation: Operation) -> Result<Uuid, LogError> {
        let id = operation.id;
        if self.nodes.contains_key(&id) {
            return Err(LogError::DuplicateOperation(id));
        }

        let parent = self.tip_id(branch);
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or(LogError::UnknownNode(parent))?;
        parent_node.children.push(id);

        self.nodes.insert(
            id,
            LogNode {
                operation,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        self.tokens.insert(branch_key(branch), id);

        debug!(branch, id = %id, parent = %parent, "appended operation");
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Iterate from `from` up to the root, `from` included.
    fn ancestry(&self, from: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        std::iter::successors(
            self.nodes.contains_key(&from).then_some(from),
            move |current| self.nodes.get(current).and_then(|node| node.parent),
        )
    }

    /// Node ids strictly after `ancestor` up to and including `descendant`,
    /// oldest first.
    ///
    /// Fails if the walk up from `descendant` reaches the root without
    /// meeting `ancestor`.
    pub fn path_exclusive(&self, ancestor: Uuid, descendant: Uuid) -> Result<Vec<Uuid>, LogError> {
        let mut path = Vec::new();
        let mut current = descendant;

        while current != ancestor {
            let node = self
                .nodes
                .get(&current)
                .ok_or(LogError::UnknownNode(current))?;
            path.push(current);
            current = node.parent.ok_or(LogError::AncestorNotReachable {
                ancestor,
                descendant,
            })?;
        }

        path.reverse();
        Ok(path)
    }

    /// Same as [`path_exclusive`](Self::path_exclusive), resolved to operations.
    pub fn path_operations(
        &self,
        ancestor: Uuid,
        descendant: Uuid,
    ) -> Result<Vec<Operation>, LogError> {
        self.path_exclusive(ancestor, descendant)?
            .into_iter()
            .map(|id| {
                self.operation(id)
                    .cloned()
                    .ok_or(LogError::UnknownNode(id))
            })
            .collect()
    }

    /// Every operation on the branch, oldest first, root sentinel excluded.
    pub fn full_history(&self, branch: &str) -> Result<Vec<Operation>, LogError> {
        self.path_operations(self.root_id, self.tip_id(branch))
    }

    /// Nearest node reachable from both branch tips via parent links.
    pub fn lowest_common_ancestor(&self, left: &str, right: &str) -> Result<Uuid, LogError> {
        let left_ancestors: HashSet<Uuid> = self.ancestry(self.tip_id(left)).collect();

        self.ancestry(self.tip_id(right))
            .find(|id| left_ancestors.contains(id))
            .ok_or_else(|| LogError::NoCommonAncestor {
                left: left.to_string(),
                right: right.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> LogSnapshot {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, node)| {
                (
                    *id,
                    NodeSnapshot {
                        id: *id,
                        operation: node.operation.clone(),
                        parent: node.parent,
                        children: node.children.clone(),
                    },
                )
            })
            .collect();

        LogSnapshot {
            root_id: self.root_id,
            nodes,
            tokens: self.tokens.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationKind, PropertyValue};

    fn set(element: &str, value: &str) -> Operation {
        Operation::set_property(element, "status", PropertyValue::string(value))
    }

    #[test]
    fn test_new_log_binds_primary_to_root() {
        let log = OperationLog::new("public");
        assert_eq!(log.len(), 1);
        assert!(log.has_token("public"));
        assert!(log.has_token("PUBLIC"));
        assert_eq!(log.tip_id("public"), log.root_id());
        assert!(log.full_history("public").unwrap().is_empty());
    }

    #[test]
    fn test_tip_of_branch_bound_to_root_is_sentinel() {
        let mut log = OperationLog::new("public");
        let root = log.tip("public").unwrap();
        assert_eq!(root.id, log.root_id());
        assert_eq!(root.kind, OperationKind::None);

        log.set_token("alice", log.root_id()).unwrap();
        assert_eq!(log.tip("alice").unwrap().id, log.root_id());
        assert!(log.tip("bob").is_none());
    }

    #[test]
    fn test_unset_branch_behaves_as_root() {
        let log = OperationLog::new("public");
        assert!(log.tip("alice").is_none());
        assert_eq!(log.tip_id("alice"), log.root_id());
        assert!(log.full_history("alice").unwrap().is_empty());
    }

    #[test]
    fn test_append_links_parent_and_children() {
        let mut log = OperationLog::new("public");
        let a = log.append("public", set("e1", "A")).unwrap();
        let b = log.append("public", set("e1", "B")).unwrap();

        assert_eq!(log.node(a).unwrap().parent, Some(log.root_id()));
        assert_eq!(log.node(b).unwrap().parent, Some(a));
        assert_eq!(log.node(a).unwrap().children, vec![b]);
        assert_eq!(log.tip("public").unwrap().id, b);

        let history: Vec<Uuid> = log
            .full_history("public")
            .unwrap()
            .iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(history, vec![a, b]);
    }

    #[test]
    fn test_append_rejects_duplicate_id() {
        let mut log = OperationLog::new("public");
        let op = set("e1", "A");
        log.append("public", op.clone()).unwrap();
        let err = log.append("alice", op.clone()).unwrap_err();
        assert_eq!(err, LogError::DuplicateOperation(op.id));
    }

    #[test]
    fn test_set_token_requires_existing_node() {
        let mut log = OperationLog::new("public");
        let missing = Uuid::new_v4();
        assert_eq!(
            log.set_token("alice", missing),
            Err(LogError::UnknownNode(missing))
        );
    }

    #[test]
    fn test_path_exclusive_excludes_ancestor() {
        let mut log = OperationLog::new("public");
        let a = log.append("public", set("e1", "A")).unwrap();
        let b = log.append("public", set("e1", "B")).unwrap();
        let c = log.append("public", set("e1", "C")).unwrap();

        assert_eq!(log.path_exclusive(a, c).unwrap(), vec![b, c]);
        assert!(log.path_exclusive(c, c).unwrap().is_empty());
    }

    #[test]
    fn test_path_exclusive_fails_for_non_ancestor() {
        let mut log = OperationLog::new("public");
        let a = log.append("public", set("e1", "A")).unwrap();
        log.set_token("alice", log.root_id()).unwrap();
        let b = log.append("alice", set("e1", "B")).unwrap();

        let err = log.path_exclusive(a, b).unwrap_err();
        assert_eq!(
            err,
            LogError::AncestorNotReachable {
                ancestor: a,
                descendant: b
            }
        );
    }

    #[test]
    fn test_lca_of_diverged_branches() {
        let mut log = OperationLog::new("public");
        let base = log.append("public", set("e1", "A")).unwrap();
        log.set_token("alice", base).unwrap();
        log.set_token("bob", base).unwrap();

        let p1 = log.append("public", set("e1", "P1")).unwrap();
        let a1 = log.append("alice", set("e1", "L1")).unwrap();
        log.append("bob", set("e2", "X")).unwrap();

        assert_eq!(log.lowest_common_ancestor("alice", "public").unwrap(), base);
        assert_eq!(log.lowest_common_ancestor("public", "alice").unwrap(), base);
        assert_eq!(log.lowest_common_ancestor("alice", "bob").unwrap(), base);
        assert_eq!(log.node(base).unwrap().children, vec![p1, a1, log.tip_id("bob")]);
    }

    #[test]
    fn test_lca_when_one_tip_is_ancestor_of_other() {
        let mut log = OperationLog::new("public");
        let base = log.append("public", set("e1", "A")).unwrap();
        log.set_token("alice", base).unwrap();
        log.append("alice", set("e1", "B")).unwrap();

        assert_eq!(log.lowest_common_ancestor("alice", "public").unwrap(), base);
        assert_eq!(log.lowest_common_ancestor("alice", "alice").unwrap(), log.tip_id("alice"));
    }

    #[test]
    fn test_history_is_ancestor_history_plus_delta() {
        let mut log = OperationLog::new("public");
        log.append("public", set("e1", "A")).unwrap();
        let base = log.append("public", set("e1", "B")).unwrap();
        log.set_token("alice", base).unwrap();
        log.append("alice", set("e1", "C")).unwrap();
        log.append("alice", set("e2", "D")).unwrap();
        log.append("public", set("e3", "E")).unwrap();

        let ancestor = log.lowest_common_ancestor("alice", "public").unwrap();
        let mut combined: Vec<Uuid> = log
            .path_exclusive(log.root_id(), ancestor)
            .unwrap();
        combined.extend(log.path_exclusive(ancestor, log.tip_id("alice")).unwrap());

        let history: Vec<Uuid> = log
            .full_history("alice")
            .unwrap()
            .iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(combined, history);
    }

    #[test]
    fn test_snapshot_contains_every_node() {
        let mut log = OperationLog::new("public");
        let a = log.append("public", set("e1", "A")).unwrap();
        let snapshot = log.snapshot();

        assert_eq!(snapshot.root_id, log.root_id());
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.nodes[&a].parent, Some(log.root_id()));
        assert_eq!(snapshot.tokens["public"], a);
        assert!(serde_json::to_string(&snapshot).is_ok());
    }
}
