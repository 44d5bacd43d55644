//! Configuration errors.
//!
//! Every variant is raised synchronously when logic is defined or
//! registered, and none of them is recoverable.
//!
//! | Error | Code |
//! |-------|------|
//! | [`LogicError::TypeRequired`] | `LOGIC_TYPE_REQUIRED` |
//! | [`LogicError::UndefinedType`] | `LOGIC_UNDEFINED_TYPE` |
//! | [`LogicError::ConflictingIntercept`] | `LOGIC_CONFLICTING_INTERCEPT` |
//! | [`LogicError::MisplacedWarnTimeout`] | `LOGIC_MISPLACED_WARN_TIMEOUT` |
//! | [`LogicError::UnknownOption`] | `LOGIC_UNKNOWN_OPTION` |
//! | [`LogicError::InvalidDef`] | `LOGIC_INVALID_DEF` |
//! | [`LogicError::DuplicateLogic`] | `LOGIC_DUPLICATE` |
//! | [`LogicError::DepConflict`] | `LOGIC_DEP_CONFLICT` |
//! | [`LogicError::MultipleHosts`] | `LOGIC_MULTIPLE_HOSTS` |

use actflow_types::ErrorCode;
use thiserror::Error;

/// Errors raised while defining or registering logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogicError {
    /// No type matcher was given.
    #[error("logic '{label}': type is required")]
    TypeRequired { label: String },

    /// The type matcher is the string "undefined".
    #[error(
        "logic '{label}': type is the string \"undefined\", check that the action type constant is defined"
    )]
    UndefinedType { label: String },

    /// Both validate and transform were given.
    #[error("logic '{label}': validate and transform are aliases, define only one")]
    ConflictingIntercept { label: String },

    /// `warnTimeout` was nested in `processOptions`.
    #[error("logic '{label}': warnTimeout is a top level option, not a processOptions option")]
    MisplacedWarnTimeout { label: String },

    /// An option outside the allow-list was given.
    #[error("unknown or misspelled option '{key}' in {scope}")]
    UnknownOption { scope: String, key: String },

    /// A declarative definition could not be decoded.
    #[error("invalid logic definition: {0}")]
    InvalidDef(String),

    /// The same logic reference appears more than once.
    #[error("duplicate logic, indexes: {indexes:?}")]
    DuplicateLogic { indexes: Vec<usize> },

    /// A dependency key already holds a different value.
    #[error("add_deps cannot override an existing dep value: {key}")]
    DepConflict { key: String },

    /// The middleware was bound to a second host.
    #[error("cannot bind a logic middleware to multiple hosts, create a separate instance for each")]
    MultipleHosts,
}

impl ErrorCode for LogicError {
    fn code(&self) -> &'static str {
        match self {
            Self::TypeRequired { .. } => "LOGIC_TYPE_REQUIRED",
            Self::UndefinedType { .. } => "LOGIC_UNDEFINED_TYPE",
            Self::ConflictingIntercept { .. } => "LOGIC_CONFLICTING_INTERCEPT",
            Self::MisplacedWarnTimeout { .. } => "LOGIC_MISPLACED_WARN_TIMEOUT",
            Self::UnknownOption { .. } => "LOGIC_UNKNOWN_OPTION",
            Self::InvalidDef(_) => "LOGIC_INVALID_DEF",
            Self::DuplicateLogic { .. } => "LOGIC_DUPLICATE",
            Self::DepConflict { .. } => "LOGIC_DEP_CONFLICT",
            Self::MultipleHosts => "LOGIC_MULTIPLE_HOSTS",
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
    fn display_type_required() {
        let err = LogicError::TypeRequired {
            label: "<anonymous>".into(),
        };
        assert_eq!(err.to_string(), "logic '<anonymous>': type is required");
    }

    #[test]
    fn display_duplicate_lists_indexes() {
        let err = LogicError::DuplicateLogic {
            indexes: vec![0, 2],
        };
        assert_eq!(err.to_string(), "duplicate logic, indexes: [0, 2]");
    }

    #[test]
    fn display_unknown_option() {
        let err = LogicError::UnknownOption {
            scope: "processOptions".into(),
            key: "dispatchReturns".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown or misspelled option 'dispatchReturns' in processOptions"
        );
    }

    #[test]
    fn codes_are_stable_and_fatal() {
        let err = LogicError::MultipleHosts;
        assert_eq!(err.code(), "LOGIC_MULTIPLE_HOSTS");
        assert!(!err.is_recoverable());
    }
}
