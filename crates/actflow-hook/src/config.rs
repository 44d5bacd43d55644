//! Declarative logic definitions and global defaults.
//!
//! The non-hook options of a logic unit can be written as data and
//! combined with hooks in code via
//! [`LogicSpec::from_def`](crate::LogicSpec::from_def).
//!
//! # Example JSON
//!
//! ```json
//! {
//!   "name": "fetchPolls",
//!   "type": "POLLS_FETCH",
//!   "cancelType": "POLLS_FETCH_CANCEL",
//!   "latest": true,
//!   "processOptions": {
//!     "successType": "POLLS_FETCH_FULFILLED",
//!     "failType": "POLLS_FETCH_REJECTED"
//!   }
//! }
//! ```
//!
//! Unknown keys are rejected. `warnTimeout` belongs at the top level;
//! nesting it under `processOptions` is a distinct error.

use crate::LogicError;
use actflow_types::TypeMatcher;
use parking_lot::{const_rwlock, RwLock};
use serde::Deserialize;
use serde_json::Value;

/// Default warn timeout for unresolved occurrences.
pub const DEFAULT_WARN_TIMEOUT_MS: u64 = 60_000;

/// Top-level keys accepted in a [`LogicDef`].
pub const LOGIC_OPTION_KEYS: &[&str] = &[
    "name",
    "type",
    "cancelType",
    "latest",
    "debounce",
    "throttle",
    "warnTimeout",
    "processOptions",
];

/// Keys accepted in a [`ProcessOptionsDef`].
pub const PROCESS_OPTION_KEYS: &[&str] =
    &["dispatchReturn", "dispatchMultiple", "successType", "failType"];

/// Data-only part of a logic unit.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LogicDef {
    /// Display name. Auto-generated if not specified.
    pub name: Option<String>,

    /// Action types that trigger the unit.
    #[serde(rename = "type")]
    pub type_matcher: Option<TypeMatcher>,

    /// Action types that cancel in-flight occurrences.
    pub cancel_type: Option<TypeMatcher>,

    /// Cancel the previous occurrence when a new one starts.
    #[serde(default)]
    pub latest: bool,

    /// Debounce window in ms. 0 disables.
    #[serde(default)]
    pub debounce: u64,

    /// Throttle window in ms. 0 disables.
    #[serde(default)]
    pub throttle: u64,

    /// Watchdog timeout in ms. 0 disables. Default: global default.
    pub warn_timeout: Option<u64>,

    /// Dispatch behavior.
    #[serde(default)]
    pub process_options: ProcessOptionsDef,
}

/// Data-only process options. Targets are action type strings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ProcessOptionsDef {
    pub dispatch_return: Option<bool>,
    pub dispatch_multiple: Option<bool>,
    pub success_type: Option<String>,
    pub fail_type: Option<String>,
}

impl LogicDef {
    /// Decodes a definition, checking option names first.
    ///
    /// # Errors
    ///
    /// - [`LogicError::MisplacedWarnTimeout`] for `processOptions.warnTimeout`
    /// - [`LogicError::UnknownOption`] for any other unknown key
    /// - [`LogicError::InvalidDef`] when a known key has the wrong shape
    pub fn from_value(value: Value) -> Result<Self, LogicError> {
        let label = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<anonymous>")
            .to_string();

        let Value::Object(map) = &value else {
            return Err(LogicError::InvalidDef(format!(
                "logic '{label}': expected an object"
            )));
        };

        if let Some(key) = map.keys().find(|k| !LOGIC_OPTION_KEYS.contains(&k.as_str())) {
            return Err(LogicError::UnknownOption {
                scope: "logic".into(),
                key: key.clone(),
            });
        }

        if let Some(Value::Object(options)) = map.get("processOptions") {
            if options.contains_key("warnTimeout") {
                return Err(LogicError::MisplacedWarnTimeout { label });
            }
            if let Some(key) = options
                .keys()
                .find(|k| !PROCESS_OPTION_KEYS.contains(&k.as_str()))
            {
                return Err(LogicError::UnknownOption {
                    scope: "processOptions".into(),
                    key: key.clone(),
                });
            }
        }

        serde_json::from_value(value)
            .map_err(|e| LogicError::InvalidDef(format!("logic '{label}': {e}")))
    }

    /// Returns the name or `<anonymous>`, for error messages.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Process-wide defaults applied to logic built afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LogicDefaults {
    /// Default warn timeout in ms.
    #[serde(rename = "warnTimeout", default = "default_warn_timeout")]
    pub warn_timeout_ms: u64,
}

fn default_warn_timeout() -> u64 {
    DEFAULT_WARN_TIMEOUT_MS
}

impl Default for LogicDefaults {
    fn default() -> Self {
        Self {
            warn_timeout_ms: DEFAULT_WARN_TIMEOUT_MS,
        }
    }
}

static DEFAULTS: RwLock<LogicDefaults> = const_rwlock(LogicDefaults {
    warn_timeout_ms: DEFAULT_WARN_TIMEOUT_MS,
});

/// Replaces the process-wide logic defaults.
///
/// Only logic built after this call is affected.
pub fn configure_logic(defaults: LogicDefaults) {
    tracing::debug!(warn_timeout_ms = defaults.warn_timeout_ms, "logic defaults configured");
    *DEFAULTS.write() = defaults;
}

/// Returns the current process-wide logic defaults.
#[must_use]
pub fn logic_defaults() -> LogicDefaults {
    *DEFAULTS.read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_full_def() {
        let def = LogicDef::from_value(json!({
            "name": "fetchPolls",
            "type": ["POLLS_FETCH", "POLLS_REFRESH"],
            "cancelType": "POLLS_FETCH_CANCEL",
            "latest": true,
            "debounce": 100,
            "warnTimeout": 0,
            "processOptions": {
                "successType": "POLLS_FETCH_FULFILLED",
                "failType": "POLLS_FETCH_REJECTED"
            }
        }))
        .expect("valid def");

        assert_eq!(def.label(), "fetchPolls");
        assert!(def.latest);
        assert_eq!(def.debounce, 100);
        assert_eq!(def.throttle, 0);
        assert_eq!(def.warn_timeout, Some(0));
        let matcher = def.type_matcher.expect("type present");
        assert!(matcher.matches("POLLS_REFRESH"));
        assert_eq!(
            def.process_options.success_type.as_deref(),
            Some("POLLS_FETCH_FULFILLED")
        );
        assert_eq!(def.process_options.dispatch_return, None);
    }

    #[test]
    fn decode_minimal_def() {
        let def = LogicDef::from_value(json!({"type": "*"})).expect("valid def");
        assert_eq!(def.type_matcher, Some(TypeMatcher::Any));
        assert_eq!(def.label(), "<anonymous>");
        assert_eq!(def.process_options, ProcessOptionsDef::default());
    }

    #[test]
    fn unknown_top_level_key() {
        let err = LogicDef::from_value(json!({"type": "FOO", "lates": true}))
            .expect_err("misspelled key");
        assert_eq!(
            err,
            LogicError::UnknownOption {
                scope: "logic".into(),
                key: "lates".into(),
            }
        );
    }

    #[test]
    fn unknown_process_option_key() {
        let err = LogicDef::from_value(json!({
            "type": "FOO",
            "processOptions": {"dispatchReturns": true}
        }))
        .expect_err("misspelled key");
        assert_eq!(
            err,
            LogicError::UnknownOption {
                scope: "processOptions".into(),
                key: "dispatchReturns".into(),
            }
        );
    }

    #[test]
    fn misplaced_warn_timeout() {
        let err = LogicDef::from_value(json!({
            "name": "poll",
            "type": "FOO",
            "processOptions": {"warnTimeout": 0}
        }))
        .expect_err("misplaced");
        assert_eq!(
            err,
            LogicError::MisplacedWarnTimeout {
                label: "poll".into()
            }
        );
    }

    #[test]
    fn wrong_shape_is_invalid_def() {
        let err = LogicDef::from_value(json!({"type": "FOO", "debounce": "soon"}))
            .expect_err("wrong shape");
        assert!(matches!(err, LogicError::InvalidDef(_)));
    }

    #[test]
    fn non_object_is_invalid_def() {
        let err = LogicDef::from_value(json!("FOO")).expect_err("not an object");
        assert!(matches!(err, LogicError::InvalidDef(_)));
    }

    #[test]
    fn defaults_deserialize_with_fallback() {
        let d: LogicDefaults = serde_json::from_value(json!({})).expect("empty ok");
        assert_eq!(d, LogicDefaults::default());
        let d: LogicDefaults =
            serde_json::from_value(json!({"warnTimeout": 5})).expect("override ok");
        assert_eq!(d.warn_timeout_ms, 5);
    }

    #[test]
    fn configure_and_read_defaults() {
        let before = logic_defaults();
        configure_logic(LogicDefaults {
            warn_timeout_ms: 1234,
        });
        assert_eq!(logic_defaults().warn_timeout_ms, 1234);
        configure_logic(before);
        assert_eq!(logic_defaults(), before);
    }
}
