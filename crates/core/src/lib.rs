//! ModelSync core library.
//!
//! Collaborative editing of structured models through an operation log kept
//! as a tree. Each branch is a path from the root to its tip; branch models
//! are rebuilt by replaying that path. This crate provides the operation
//! types, the log, materialized models, conflict detection and resolution,
//! live fan-out, the wire format, configuration, and the branch coordinator
//! that ties them together.

pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod errors;
pub mod hub;
pub mod model;
pub mod operation;
pub mod oplog;
pub mod wire;

// Re-exports for convenience.
pub use config::AppConfig;
pub use coordinator::{BranchCoordinator, CommitOutcome, UpdateReport};
pub use model::Model;
pub use operation::{Operation, OperationKind, PropertyValue};
pub use oplog::{LogSnapshot, OperationLog};
pub use wire::OperationMessage;
