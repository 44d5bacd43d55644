//! Unified error interface for actflow.
//!
//! This module provides the [`ErrorCode`] trait implemented by every
//! actflow error type, plus [`TypesError`] for failures in this crate.
//!
//! # Code Format
//!
//! Error codes are UPPER_SNAKE_CASE, prefixed with the layer that
//! produced them (`TYPES_`, `LOGIC_`, `HOST_`), and stable once defined.
//!
//! # Example
//!
//! ```
//! use actflow_types::{ErrorCode, TypesError};
//!
//! let err = TypesError::NotActionShaped("missing type".into());
//! assert_eq!(err.code(), "TYPES_NOT_ACTION_SHAPED");
//! assert!(!err.is_recoverable());
//! ```

use thiserror::Error;

/// Machine-readable error interface.
///
/// Implement this for all error types so that the runtime can log and
/// report failures consistently.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    ///
    /// - UPPER_SNAKE_CASE
    /// - Prefixed with the owning layer
    /// - Stable across versions
    fn code(&self) -> &'static str;

    /// Returns `true` if retrying the failed operation may succeed.
    ///
    /// Configuration errors are never recoverable.
    fn is_recoverable(&self) -> bool;
}

/// Errors produced by the core types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// A regular expression matcher could not be compiled.
    #[error("invalid type pattern: {0}")]
    InvalidPattern(String),

    /// A JSON value is not an object with a string `type` field.
    #[error("value is not action-shaped: {0}")]
    NotActionShaped(String),
}

impl ErrorCode for TypesError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidPattern(_) => "TYPES_INVALID_PATTERN",
            Self::NotActionShaped(_) => "TYPES_NOT_ACTION_SHAPED",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_pattern() {
        let err = TypesError::InvalidPattern("unclosed group".into());
        assert_eq!(err.to_string(), "invalid type pattern: unclosed group");
    }

    #[test]
    fn codes_are_prefixed() {
        let errors = [
            TypesError::InvalidPattern("x".into()),
            TypesError::NotActionShaped("x".into()),
        ];
        for err in &errors {
            assert!(err.code().starts_with("TYPES_"));
            assert!(!err.is_recoverable());
        }
    }
}
