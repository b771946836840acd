//! Caller-visible error type.
//!
//! Only malformed inputs and invalid configuration are errors. A sample that
//! yields no model, or a refinement that cannot run, is reported through empty
//! results and statistics instead.

use thiserror::Error;

/// Errors returned by the public estimation entry points and by
/// configuration validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HybridPoseError {
    #[error("input length mismatch: {what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("non-finite value in {what} at index {index}")]
    NonFinite { what: &'static str, index: usize },

    #[error("negative weight {value} at index {index}")]
    NegativeWeight { index: usize, value: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, HybridPoseError>;
