//! Conflict detection and resolution between divergent branches.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- finding (entity, property) pairs written on both sides
//!    of a common ancestor.
//! 2. **Resolution** -- synthesizing the operations that settle each conflict.

pub mod detector;
pub mod resolver;

pub use detector::{Conflict, ConflictDetector, ConflictType};
pub use resolver::ConflictResolver;
