//! Actions: the tagged records flowing through the pipeline.
//!
//! An [`Action`] serializes to the familiar flux-standard shape:
//!
//! ```text
//! { "type": "FETCH_USER", "payload": {...}, "meta": {...}, "error": true }
//! ```
//!
//! `type` is the only required field. Any extra top-level keys are kept
//! in [`Action::extra`] so that hooks can spread an action and add
//! fields without losing them.

use crate::TypesError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Type used for failures that no logic unit mapped to an action.
pub const UNHANDLED_LOGIC_ERROR: &str = "UNHANDLED_LOGIC_ERROR";

/// A tagged event record.
///
/// # Variants
///
/// - *standard*: `error == false`
/// - *erroneous*: `error == true`, `payload` conventionally carries the error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// The dispatch and matching key.
    #[serde(rename = "type")]
    pub action_type: String,

    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    /// Marks an erroneous action.
    #[serde(default, skip_serializing_if = "is_false")]
    pub error: bool,

    /// Additional top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Action {
    /// Creates a standard action with no payload.
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: None,
            meta: None,
            error: false,
            extra: Map::new(),
        }
    }

    /// Creates an erroneous action carrying `payload`.
    #[must_use]
    pub fn failure(action_type: impl Into<String>, payload: Value) -> Self {
        Self::new(action_type).with_payload(payload).with_error(true)
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Sets the error flag.
    #[must_use]
    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }

    /// Adds an extra top-level field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Returns `true` for erroneous actions.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Returns an extra top-level field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Parses an action-shaped JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::NotActionShaped`] unless `value` is an object
    /// with a string `type`.
    pub fn from_value(value: Value) -> Result<Self, TypesError> {
        match value.get("type") {
            Some(Value::String(_)) => serde_json::from_value(value)
                .map_err(|e| TypesError::NotActionShaped(e.to_string())),
            Some(_) => Err(TypesError::NotActionShaped("'type' is not a string".into())),
            None => Err(TypesError::NotActionShaped("missing 'type'".into())),
        }
    }

    /// Converts this action into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.action_type)?;
        if self.error {
            f.write_str(" (error)")?;
        }
        Ok(())
    }
}

/// A named action factory.
///
/// Its string projection ([`Display`](fmt::Display)) is the action type,
/// so a creator can be used wherever a type matcher is expected.
///
/// ```
/// use actflow_types::{ActionCreator, TypeMatcher};
/// use serde_json::json;
///
/// let fetch = ActionCreator::new("FETCH_USER");
/// let action = fetch.create(json!({"id": 1}));
/// assert_eq!(action.action_type, "FETCH_USER");
/// assert!(TypeMatcher::from(&fetch).matches("FETCH_USER"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionCreator {
    action_type: String,
}

impl ActionCreator {
    /// Creates a creator for `action_type`.
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
        }
    }

    /// Returns the action type produced by this creator.
    #[must_use]
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// Creates an action carrying `payload`.
    #[must_use]
    pub fn create(&self, payload: Value) -> Action {
        Action::new(self.action_type.clone()).with_payload(payload)
    }

    /// Creates an action without payload.
    #[must_use]
    pub fn empty(&self) -> Action {
        Action::new(self.action_type.clone())
    }
}

impl fmt::Display for ActionCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.action_type)
    }
}
