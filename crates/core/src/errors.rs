//! Error types for the ModelSync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

// ---------------------------------------------------------------------------
// Operation log errors
// ---------------------------------------------------------------------------

/// Structural errors from the operation log.
///
/// Every variant means the log's tree invariants were violated or a caller
/// asked for a path that cannot exist. None of them is recoverable by
/// retrying; they are surfaced instead of producing a truncated delta.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    /// The upward walk from `descendant` reached the root without meeting
    /// `ancestor`.
    #[error("node {ancestor} is not an ancestor of {descendant}")]
    AncestorNotReachable { ancestor: Uuid, descendant: Uuid },

    /// Two branch tips share no common ancestor.
    #[error("no common ancestor between branches '{left}' and '{right}'")]
    NoCommonAncestor { left: String, right: String },

    /// An operation with this id is already recorded.
    #[error("operation {0} is already recorded in the log")]
    DuplicateOperation(Uuid),

    /// A node id was referenced that the log does not contain.
    #[error("log node {0} does not exist")]
    UnknownNode(Uuid),
}

// ---------------------------------------------------------------------------
// Coordinator errors
// ---------------------------------------------------------------------------

/// Errors from the branch coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The shared log is structurally broken for this branch.
    #[error("structural failure on branch '{branch}': {source}")]
    Structural {
        branch: String,
        #[source]
        source: LogError,
    },

    /// A submitted operation reuses an id already in the log.
    #[error("operation {id} submitted to branch '{branch}' is already recorded")]
    DuplicateOperation { branch: String, id: Uuid },
}

impl CoordinatorError {
    pub(crate) fn structural(branch: &str, source: LogError) -> Self {
        Self::Structural {
            branch: branch.to_string(),
            source,
        }
    }

    /// Classify a log error raised while recording an operation.
    pub(crate) fn from_append(branch: &str, source: LogError) -> Self {
        match source {
            LogError::DuplicateOperation(id) => Self::DuplicateOperation {
                branch: branch.to_string(),
                id,
            },
            other => Self::structural(branch, other),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Wire errors
// ---------------------------------------------------------------------------

/// Errors converting wire messages into operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The message names a kind that cannot be applied (the root sentinel).
    #[error("operation type '{0}' cannot be submitted")]
    UnsupportedOperationType(String),

    /// A field the operation kind needs is absent or empty.
    #[error("{kind} operation is missing required field '{field}'")]
    MissingField { kind: String, field: &'static str },

    /// The timestamp is outside the representable range.
    #[error("invalid timestamp: {0} ms since epoch")]
    InvalidTimestamp(i64),
}
