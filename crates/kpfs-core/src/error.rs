//! Error types for the kpfs-core crate

// Re-export error types from submodules
pub use crate::loader::LoadError;
pub use crate::projection::{ProjectionError, ProjectionResult};
