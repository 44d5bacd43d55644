//! Values a process hook can hand to the dispatch channel.
//!
//! A process hook may produce nothing, a single value, a failure, a
//! value that arrives later, or a sequence of values. All of these are
//! expressed as one [`Dispatchable`]:
//!
//! ```text
//! Dispatchable::Empty                  → nothing is dispatched
//! Dispatchable::Ready(Item)            → one item, now
//! Dispatchable::Future(BoxFuture<Item>) → one item, later
//! Dispatchable::Stream(BoxStream<Item>) → zero or more items, later
//! ```
//!
//! Each resolved [`Item`] becomes exactly one outgoing action.

use actflow_types::{Action, ErrorCode, TypesError};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{Future, Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A failure produced by a hook.
///
/// Routed through the failure path of the dispatch channel:
///
/// - with a `fail_type`, wrapped as `{type: fail_type, payload, error: true}`
/// - else, if it carries its own type, dispatched as that type
/// - else, dispatched as `UNHANDLED_LOGIC_ERROR`
///
/// The payload defaults to the message.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct LogicFailure {
    message: String,
    action_type: Option<String>,
    payload: Option<Value>,
}

impl LogicFailure {
    /// Creates a failure with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            action_type: None,
            payload: None,
        }
    }

    /// Creates a failure from any error's display text.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(err.to_string())
    }

    /// Gives the failure its own action type.
    #[must_use]
    pub fn with_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    /// Sets the payload dispatched for this failure.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The failure's own action type, if any.
    #[must_use]
    pub fn action_type(&self) -> Option<&str> {
        self.action_type.as_deref()
    }

    /// The payload to dispatch: the explicit payload or the message.
    #[must_use]
    pub fn payload(&self) -> Value {
        self.payload
            .clone()
            .unwrap_or_else(|| Value::String(self.message.clone()))
    }
}

impl ErrorCode for LogicFailure {
    fn code(&self) -> &'static str {
        "LOGIC_HOOK_FAILED"
    }

    fn is_recoverable(&self) -> bool {
        true
    }
}

impl From<&str> for LogicFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for LogicFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<Action> for LogicFailure {
    fn from(action: Action) -> Self {
        let mut failure = Self::new(action.action_type.clone()).with_type(action.action_type);
        failure.payload = action.payload;
        failure
    }
}

impl From<TypesError> for LogicFailure {
    fn from(err: TypesError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for LogicFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// One resolved dispatch channel item.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// An action, dispatched as-is unless a success type wraps it.
    Action(Action),
    /// A bare value; needs a success type to become an action.
    Value(Value),
    /// A failure, routed through the failure path.
    Failure(LogicFailure),
    /// An action re-routed by the intercept stage; always dispatched verbatim.
    Intercepted(Action),
}

impl Item {
    /// Returns `true` for failures.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

impl From<Action> for Item {
    fn from(action: Action) -> Self {
        Self::Action(action)
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<LogicFailure> for Item {
    fn from(failure: LogicFailure) -> Self {
        Self::Failure(failure)
    }
}

impl<T: Into<Item>> From<Result<T, LogicFailure>> for Item {
    fn from(result: Result<T, LogicFailure>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(failure) => Self::Failure(failure),
        }
    }
}

/// Anything a process hook can dispatch.
pub enum Dispatchable {
    /// Nothing to dispatch.
    Empty,
    /// One item available now.
    Ready(Item),
    /// One item available later.
    Future(BoxFuture<'static, Item>),
    /// Items available later; a failure ends the sequence.
    Stream(BoxStream<'static, Item>),
}

impl Dispatchable {
    /// Wraps a future resolving to a value or a failure.
    #[must_use]
    pub fn future<F, T>(future: F) -> Self
    where
        F: Future<Output = Result<T, LogicFailure>> + Send + 'static,
        T: Into<Item>,
    {
        Self::Future(Box::pin(async move { Item::from(future.await) }))
    }

    /// Wraps a stream of values or failures.
    #[must_use]
    pub fn stream<S, T>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, LogicFailure>> + Send + 'static,
        T: Into<Item> + 'static,
    {
        Self::Stream(stream.map(Item::from).boxed())
    }

    /// Returns `true` for [`Dispatchable::Empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Debug for Dispatchable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Ready(item) => f.debug_tuple("Ready").field(item).finish(),
            Self::Future(_) => f.write_str("Future(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Item> for Dispatchable {
    fn from(item: Item) -> Self {
        Self::Ready(item)
    }
}

impl From<Action> for Dispatchable {
    fn from(action: Action) -> Self {
        Self::Ready(Item::Action(action))
    }
}

impl From<Value> for Dispatchable {
    fn from(value: Value) -> Self {
        Self::Ready(Item::Value(value))
    }
}

impl From<LogicFailure> for Dispatchable {
    fn from(failure: LogicFailure) -> Self {
        Self::Ready(Item::Failure(failure))
    }
}

impl From<Option<Action>> for Dispatchable {
    fn from(action: Option<Action>) -> Self {
        action.map_or(Self::Empty, Self::from)
    }
}

impl From<Option<Value>> for Dispatchable {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::Empty, Self::from)
    }
}

impl From<()> for Dispatchable {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl From<Result<Action, LogicFailure>> for Dispatchable {
    fn from(result: Result<Action, LogicFailure>) -> Self {
        Self::Ready(Item::from(result))
    }
}

impl From<Result<Value, LogicFailure>> for Dispatchable {
    fn from(result: Result<Value, LogicFailure>) -> Self {
        Self::Ready(Item::from(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    #[test]
    fn failure_payload_defaults_to_message() {
        let failure = LogicFailure::new("boom");
        assert_eq!(failure.payload(), json!("boom"));
        assert_eq!(failure.to_string(), "boom");
    }

    #[test]
    fn failure_explicit_payload() {
        let failure = LogicFailure::new("boom").with_payload(json!({"status": 500}));
        assert_eq!(failure.payload(), json!({"status": 500}));
    }

    #[test]
    fn failure_from_action_keeps_type_and_payload() {
        let failure = LogicFailure::from(Action::new("FETCH_FAILED").with_payload(json!(1)));
        assert_eq!(failure.action_type(), Some("FETCH_FAILED"));
        assert_eq!(failure.payload(), json!(1));
    }

    #[test]
    fn failure_from_error() {
        let err = "x".parse::<u32>().unwrap_err();
        let failure = LogicFailure::from_error(&err);
        assert!(failure.message().contains("invalid digit"));
    }

    #[test]
    fn item_from_result() {
        assert_eq!(
            Item::from(Ok::<_, LogicFailure>(json!(1))),
            Item::Value(json!(1))
        );
        assert!(Item::from(Err::<Value, _>(LogicFailure::new("no"))).is_failure());
    }

    #[test]
    fn none_is_empty() {
        assert!(Dispatchable::from(None::<Action>).is_empty());
        assert!(Dispatchable::from(()).is_empty());
        assert!(!Dispatchable::from(Action::new("FOO")).is_empty());
    }

    #[tokio::test]
    async fn future_resolves_to_item() {
        let d = Dispatchable::future(async { Ok::<_, LogicFailure>(json!(42)) });
        let Dispatchable::Future(fut) = d else {
            panic!("expected Future");
        };
        assert_eq!(fut.await, Item::Value(json!(42)));
    }

    #[tokio::test]
    async fn stream_maps_items() {
        let d = Dispatchable::stream(stream::iter(vec![
            Ok(Action::new("A")),
            Err(LogicFailure::new("bad")),
        ]));
        let Dispatchable::Stream(s) = d else {
            panic!("expected Stream");
        };
        let items: Vec<Item> = s.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Item::Action(Action::new("A")));
        assert!(items[1].is_failure());
    }
}
