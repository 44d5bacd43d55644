//! Logic units and their builder.
//!
//! A [`LogicSpec`] collects options and hooks; [`LogicSpec::build`]
//! validates them, applies defaults and freezes the result into an
//! immutable [`LogicUnit`].
//!
//! # Defaults
//!
//! | Option | Default |
//! |--------|---------|
//! | `name` | auto: `L(<type>)-<index>` at registration |
//! | `cancel_type` | none |
//! | `latest` | `false` |
//! | `debounce_ms` / `throttle_ms` | `0` (disabled) |
//! | `warn_timeout_ms` | [`logic_defaults`] (60000) |
//! | intercept | pass-through allow |
//! | process | none |
//!
//! # Dispatch mode
//!
//! The process hook's arity picks the default mode; explicit options win.
//!
//! | Arity | `dispatch_return` | `dispatch_multiple` | Mode |
//! |-------|-------------------|---------------------|------|
//! | `(ctx)` | `true` | `false` | [`ProcessMode::ReturnValue`] |
//! | `(ctx, dispatch)` | `false` | `false` | [`ProcessMode::SingleDispatch`] |
//! | `(ctx, dispatch, done)` | `false` | `true` | [`ProcessMode::MultiDispatch`] |
//!
//! # Example
//!
//! ```
//! use actflow_hook::{LogicSpec, ProcessMode};
//! use serde_json::json;
//!
//! let unit = LogicSpec::new("POLLS_FETCH")
//!     .name("fetchPolls")
//!     .latest(true)
//!     .success_type("POLLS_FETCH_FULFILLED")
//!     .process(|_ctx| Ok(json!(["a", "b"])))
//!     .build()
//!     .expect("valid logic");
//!
//! assert_eq!(unit.name(), Some("fetchPolls"));
//! assert_eq!(unit.process_options().mode(), ProcessMode::ReturnValue);
//! ```

use crate::config::logic_defaults;
use crate::{
    Allow, Dispatcher, Done, ExecutionContext, HookArity, InterceptHook, InterceptKind, Item,
    LogicDef, LogicError, LogicFailure, ProcessHook, Reject,
};
use actflow_types::{Action, ActionCreator, TypeMatcher};
use futures::Future;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

const UNDEFINED_TYPE: &str = "undefined";

// ── Process options ─────────────────────────────────────────────────

/// How a process hook's results reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// The hook's return value is dispatched, then the channel completes.
    ReturnValue,
    /// The first dispatch call completes the channel.
    SingleDispatch,
    /// The channel stays open until done is called.
    MultiDispatch,
}

type CreatorFn = dyn Fn(Value) -> Action + Send + Sync;

/// Turns a success or failure payload into an action.
#[derive(Clone)]
pub enum ActionTarget {
    /// Wrap as `{type, payload}` (plus `error: true` on failure).
    Type(String),
    /// Call a creator with the payload.
    Creator(Arc<CreatorFn>),
}

impl ActionTarget {
    /// Creates a target from a creator function.
    pub fn creator<F>(f: F) -> Self
    where
        F: Fn(Value) -> Action + Send + Sync + 'static,
    {
        Self::Creator(Arc::new(f))
    }

    /// Builds the outgoing action for `payload`.
    ///
    /// `error` sets the error flag for type targets; creators decide
    /// for themselves.
    #[must_use]
    pub fn make(&self, payload: Value, error: bool) -> Action {
        match self {
            Self::Type(action_type) => Action::new(action_type.clone())
                .with_payload(payload)
                .with_error(error),
            Self::Creator(create) => create(payload),
        }
    }
}

impl fmt::Debug for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(t) => f.debug_tuple("Type").field(t).finish(),
            Self::Creator(_) => f.write_str("Creator(..)"),
        }
    }
}

impl From<&str> for ActionTarget {
    fn from(action_type: &str) -> Self {
        Self::Type(action_type.to_string())
    }
}

impl From<String> for ActionTarget {
    fn from(action_type: String) -> Self {
        Self::Type(action_type)
    }
}

impl From<ActionCreator> for ActionTarget {
    fn from(creator: ActionCreator) -> Self {
        Self::creator(move |payload| creator.create(payload))
    }
}

impl From<&ActionCreator> for ActionTarget {
    fn from(creator: &ActionCreator) -> Self {
        Self::from(creator.clone())
    }
}

/// Resolved dispatch options of a unit.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub dispatch_return: bool,
    pub dispatch_multiple: bool,
    pub success_type: Option<ActionTarget>,
    pub fail_type: Option<ActionTarget>,
}

impl ProcessOptions {
    /// Dispatch mode selected by the flags.
    #[must_use]
    pub fn mode(&self) -> ProcessMode {
        if self.dispatch_multiple {
            ProcessMode::MultiDispatch
        } else if self.dispatch_return {
            ProcessMode::ReturnValue
        } else {
            ProcessMode::SingleDispatch
        }
    }
}

// ── Unit ────────────────────────────────────────────────────────────

/// A validated, immutable logic unit.
///
/// Registered by reference ([`Arc`]); registering the same `Arc` twice
/// is an error.
#[derive(Debug)]
pub struct LogicUnit {
    name: Option<String>,
    type_matcher: TypeMatcher,
    cancel_type: Option<TypeMatcher>,
    latest: bool,
    debounce_ms: u64,
    throttle_ms: u64,
    warn_timeout_ms: u64,
    intercept: Option<InterceptHook>,
    process: Option<ProcessHook>,
    process_options: ProcessOptions,
}

impl LogicUnit {
    /// Explicit name, if one was given.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name used for monitor events: the explicit name or
    /// `L(<type>)-<index>`.
    #[must_use]
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("L({})-{}", self.type_matcher, index),
        }
    }

    #[must_use]
    pub fn type_matcher(&self) -> &TypeMatcher {
        &self.type_matcher
    }

    #[must_use]
    pub fn cancel_type(&self) -> Option<&TypeMatcher> {
        self.cancel_type.as_ref()
    }

    #[must_use]
    pub fn latest(&self) -> bool {
        self.latest
    }

    #[must_use]
    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    #[must_use]
    pub fn throttle_ms(&self) -> u64 {
        self.throttle_ms
    }

    #[must_use]
    pub fn warn_timeout_ms(&self) -> u64 {
        self.warn_timeout_ms
    }

    /// The validate/transform hook. `None` means pass-through allow.
    #[must_use]
    pub fn intercept(&self) -> Option<&InterceptHook> {
        self.intercept.as_ref()
    }

    #[must_use]
    pub fn process(&self) -> Option<&ProcessHook> {
        self.process.as_ref()
    }

    #[must_use]
    pub fn process_options(&self) -> &ProcessOptions {
        &self.process_options
    }

    /// Returns `true` if `action_type` triggers this unit.
    #[must_use]
    pub fn matches(&self, action_type: &str) -> bool {
        self.type_matcher.matches(action_type)
    }

    /// Returns `true` if `action_type` cancels in-flight occurrences.
    ///
    /// With `latest`, the unit's own type is a cancel source too.
    #[must_use]
    pub fn is_cancelled_by(&self, action_type: &str) -> bool {
        self.cancel_type
            .as_ref()
            .is_some_and(|m| m.matches(action_type))
            || (self.latest && self.type_matcher.matches(action_type))
    }
}

// ── Builder ─────────────────────────────────────────────────────────

/// Builder for a [`LogicUnit`].
#[derive(Debug, Default)]
pub struct LogicSpec {
    name: Option<String>,
    type_matcher: Option<TypeMatcher>,
    cancel_type: Option<TypeMatcher>,
    latest: bool,
    debounce_ms: u64,
    throttle_ms: u64,
    warn_timeout_ms: Option<u64>,
    validate: Option<InterceptHook>,
    transform: Option<InterceptHook>,
    process: Option<ProcessHook>,
    dispatch_return: Option<bool>,
    dispatch_multiple: Option<bool>,
    success_type: Option<ActionTarget>,
    fail_type: Option<ActionTarget>,
}

impl LogicSpec {
    /// Starts a spec triggered by `type_matcher`.
    #[must_use]
    pub fn new(type_matcher: impl Into<TypeMatcher>) -> Self {
        Self {
            type_matcher: Some(type_matcher.into()),
            ..Self::default()
        }
    }

    /// Starts a spec from a declarative definition.
    #[must_use]
    pub fn from_def(def: LogicDef) -> Self {
        let options = def.process_options;
        Self {
            name: def.name,
            type_matcher: def.type_matcher,
            cancel_type: def.cancel_type,
            latest: def.latest,
            debounce_ms: def.debounce,
            throttle_ms: def.throttle,
            warn_timeout_ms: def.warn_timeout,
            dispatch_return: options.dispatch_return,
            dispatch_multiple: options.dispatch_multiple,
            success_type: options.success_type.map(ActionTarget::Type),
            fail_type: options.fail_type.map(ActionTarget::Type),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn type_matcher(mut self, type_matcher: impl Into<TypeMatcher>) -> Self {
        self.type_matcher = Some(type_matcher.into());
        self
    }

    #[must_use]
    pub fn cancel_type(mut self, cancel_type: impl Into<TypeMatcher>) -> Self {
        self.cancel_type = Some(cancel_type.into());
        self
    }

    #[must_use]
    pub fn latest(mut self, latest: bool) -> Self {
        self.latest = latest;
        self
    }

    #[must_use]
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    #[must_use]
    pub fn throttle_ms(mut self, ms: u64) -> Self {
        self.throttle_ms = ms;
        self
    }

    /// Watchdog timeout. 0 disables the warning.
    #[must_use]
    pub fn warn_timeout_ms(mut self, ms: u64) -> Self {
        self.warn_timeout_ms = Some(ms);
        self
    }

    // ── intercept ──

    #[must_use]
    pub fn validate<F>(mut self, hook: F) -> Self
    where
        F: Fn(ExecutionContext, Allow, Reject) -> Result<(), LogicFailure> + Send + Sync + 'static,
    {
        self.validate = Some(InterceptHook::new(InterceptKind::Validate, hook));
        self
    }

    #[must_use]
    pub fn validate_async<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ExecutionContext, Allow, Reject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), LogicFailure>> + Send + 'static,
    {
        self.validate = Some(InterceptHook::new_async(InterceptKind::Validate, hook));
        self
    }

    #[must_use]
    pub fn transform<F>(mut self, hook: F) -> Self
    where
        F: Fn(ExecutionContext, Allow, Reject) -> Result<(), LogicFailure> + Send + Sync + 'static,
    {
        self.transform = Some(InterceptHook::new(InterceptKind::Transform, hook));
        self
    }

    #[must_use]
    pub fn transform_async<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ExecutionContext, Allow, Reject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), LogicFailure>> + Send + 'static,
    {
        self.transform = Some(InterceptHook::new_async(InterceptKind::Transform, hook));
        self
    }

    // ── process ──

    /// `process(ctx)`: the return value is dispatched.
    #[must_use]
    pub fn process<F, R>(mut self, hook: F) -> Self
    where
        F: Fn(ExecutionContext) -> Result<R, LogicFailure> + Send + Sync + 'static,
        R: Into<crate::Dispatchable>,
    {
        self.process = Some(ProcessHook::returning(hook));
        self
    }

    /// `process(ctx)` returning a future; its output is dispatched.
    #[must_use]
    pub fn process_async<F, Fut, T>(mut self, hook: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LogicFailure>> + Send + 'static,
        T: Into<Item>,
    {
        self.process = Some(ProcessHook::returning_async(hook));
        self
    }

    /// `process(ctx, dispatch)`: single dispatch.
    #[must_use]
    pub fn process_dispatch<F>(mut self, hook: F) -> Self
    where
        F: Fn(ExecutionContext, Dispatcher) -> Result<(), LogicFailure> + Send + Sync + 'static,
    {
        self.process = Some(ProcessHook::dispatching(hook));
        self
    }

    /// `process(ctx, dispatch, done)`: multi dispatch.
    #[must_use]
    pub fn process_multi<F>(mut self, hook: F) -> Self
    where
        F: Fn(ExecutionContext, Dispatcher, Done) -> Result<(), LogicFailure>
            + Send
            + Sync
            + 'static,
    {
        self.process = Some(ProcessHook::dispatching_multi(hook));
        self
    }

    // ── process options ──

    #[must_use]
    pub fn dispatch_return(mut self, enabled: bool) -> Self {
        self.dispatch_return = Some(enabled);
        self
    }

    #[must_use]
    pub fn dispatch_multiple(mut self, enabled: bool) -> Self {
        self.dispatch_multiple = Some(enabled);
        self
    }

    /// Sets both dispatch flags from `mode`.
    #[must_use]
    pub fn process_mode(mut self, mode: ProcessMode) -> Self {
        let (dispatch_return, dispatch_multiple) = match mode {
            ProcessMode::ReturnValue => (true, false),
            ProcessMode::SingleDispatch => (false, false),
            ProcessMode::MultiDispatch => (false, true),
        };
        self.dispatch_return = Some(dispatch_return);
        self.dispatch_multiple = Some(dispatch_multiple);
        self
    }

    #[must_use]
    pub fn success_type(mut self, target: impl Into<ActionTarget>) -> Self {
        self.success_type = Some(target.into());
        self
    }

    #[must_use]
    pub fn fail_type(mut self, target: impl Into<ActionTarget>) -> Self {
        self.fail_type = Some(target.into());
        self
    }

    /// Validates the spec and builds the unit.
    ///
    /// # Errors
    ///
    /// - [`LogicError::TypeRequired`] when no type was given
    /// - [`LogicError::UndefinedType`] when the type is the string `"undefined"`
    /// - [`LogicError::ConflictingIntercept`] when validate and transform are both set
    pub fn build(self) -> Result<Arc<LogicUnit>, LogicError> {
        let label = self.name.as_deref().unwrap_or("<anonymous>").to_string();

        let Some(type_matcher) = self.type_matcher else {
            return Err(LogicError::TypeRequired { label });
        };
        let type_matcher = type_matcher.normalize();
        if type_matcher.contains_exact(UNDEFINED_TYPE) {
            return Err(LogicError::UndefinedType { label });
        }
        if type_matcher.is_empty() {
            tracing::warn!(logic = %label, "type list is empty, this logic never runs");
        }

        let intercept = match (self.validate, self.transform) {
            (Some(_), Some(_)) => return Err(LogicError::ConflictingIntercept { label }),
            (validate, transform) => validate.or(transform),
        };

        let arity = self.process.as_ref().map(ProcessHook::arity);
        let dispatch_return = self
            .dispatch_return
            .unwrap_or(arity == Some(HookArity::Context));
        let dispatch_multiple = self
            .dispatch_multiple
            .unwrap_or(arity == Some(HookArity::ContextDispatchDone));

        if cfg!(debug_assertions) && arity == Some(HookArity::ContextDispatch) && !dispatch_multiple
        {
            tracing::warn!(
                logic = %label,
                "process(ctx, dispatch) is deprecated, use process(ctx, dispatch, done) \
                 and call done() when finished, or set dispatch_multiple"
            );
        }

        Ok(Arc::new(LogicUnit {
            name: self.name,
            type_matcher,
            cancel_type: self.cancel_type.map(TypeMatcher::normalize),
            latest: self.latest,
            debounce_ms: self.debounce_ms,
            throttle_ms: self.throttle_ms,
            warn_timeout_ms: self
                .warn_timeout_ms
                .unwrap_or_else(|| logic_defaults().warn_timeout_ms),
            intercept,
            process: self.process,
            process_options: ProcessOptions {
                dispatch_return,
                dispatch_multiple,
                success_type: self.success_type,
                fail_type: self.fail_type,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── validation ──

    #[test]
    fn empty_type_list_builds_but_never_matches() {
        let unit = LogicSpec::new(TypeMatcher::one_of(Vec::<&str>::new()))
            .build()
            .expect("empty list is allowed");
        assert!(unit.type_matcher().is_empty());
        assert!(!unit.matches("FOO"));
    }

    #[test]
    fn type_is_required() {
        let err = LogicSpec::default().name("x").build().expect_err("no type");
        assert_eq!(err, LogicError::TypeRequired { label: "x".into() });
    }

    #[test]
    fn undefined_type_string_is_rejected() {
        let err = LogicSpec::new("undefined").build().expect_err("undefined");
        assert!(matches!(err, LogicError::UndefinedType { .. }));

        let err = LogicSpec::new(vec!["FOO", "undefined"])
            .build()
            .expect_err("undefined in list");
        assert!(matches!(err, LogicError::UndefinedType { .. }));
    }

    #[test]
    fn validate_and_transform_conflict() {
        let err = LogicSpec::new("FOO")
            .validate(|ctx, allow, _| {
                allow.pass(ctx.action);
                Ok(())
            })
            .transform(|ctx, allow, _| {
                allow.pass(ctx.action);
                Ok(())
            })
            .build()
            .expect_err("both intercepts");
        assert!(matches!(err, LogicError::ConflictingIntercept { .. }));
    }

    #[test]
    fn transform_alone_is_the_intercept() {
        let unit = LogicSpec::new("FOO")
            .transform(|ctx, allow, _| {
                allow.pass(ctx.action);
                Ok(())
            })
            .build()
            .expect("valid");
        assert_eq!(
            unit.intercept().map(InterceptHook::kind),
            Some(InterceptKind::Transform)
        );
    }

    #[test]
    fn no_intercept_means_pass_through() {
        let unit = LogicSpec::new("FOO").build().expect("valid");
        assert!(unit.intercept().is_none());
        assert!(unit.process().is_none());
    }

    // ── dispatch mode ──

    #[test]
    fn arity_one_defaults_to_return_value() {
        let unit = LogicSpec::new("FOO")
            .process(|_| Ok(json!(1)))
            .build()
            .expect("valid");
        assert!(unit.process_options().dispatch_return);
        assert_eq!(unit.process_options().mode(), ProcessMode::ReturnValue);
    }

    #[test]
    fn arity_two_defaults_to_single_dispatch() {
        let unit = LogicSpec::new("FOO")
            .process_dispatch(|_, _| Ok(()))
            .build()
            .expect("valid");
        assert_eq!(unit.process_options().mode(), ProcessMode::SingleDispatch);
    }

    #[test]
    fn arity_three_defaults_to_multi_dispatch() {
        let unit = LogicSpec::new("FOO")
            .process_multi(|_, _, _| Ok(()))
            .build()
            .expect("valid");
        assert_eq!(unit.process_options().mode(), ProcessMode::MultiDispatch);
    }

    #[test]
    fn explicit_options_override_arity() {
        let unit = LogicSpec::new("FOO")
            .process(|_| Ok(json!(1)))
            .dispatch_return(false)
            .build()
            .expect("valid");
        assert_eq!(unit.process_options().mode(), ProcessMode::SingleDispatch);

        let unit = LogicSpec::new("FOO")
            .process_dispatch(|_, _| Ok(()))
            .dispatch_multiple(true)
            .build()
            .expect("valid");
        assert_eq!(unit.process_options().mode(), ProcessMode::MultiDispatch);
    }

    #[test]
    fn process_mode_sets_both_flags() {
        let unit = LogicSpec::new("FOO")
            .process_multi(|_, _, _| Ok(()))
            .process_mode(ProcessMode::ReturnValue)
            .build()
            .expect("valid");
        assert!(unit.process_options().dispatch_return);
        assert!(!unit.process_options().dispatch_multiple);
        assert_eq!(unit.process_options().mode(), ProcessMode::ReturnValue);
    }

    // ── naming and matching ──

    #[test]
    fn display_name_auto_format() {
        let unit = LogicSpec::new(vec!["FOO", "BAR"]).build().expect("valid");
        assert_eq!(unit.display_name(3), "L(FOO,BAR)-3");

        let named = LogicSpec::new("FOO").name("fooLogic").build().expect("valid");
        assert_eq!(named.display_name(3), "fooLogic");
    }

    #[test]
    fn single_member_list_is_normalized() {
        let unit = LogicSpec::new(vec!["FOO"]).build().expect("valid");
        assert_eq!(unit.type_matcher(), &TypeMatcher::exact("FOO"));
        assert_eq!(unit.display_name(0), "L(FOO)-0");
    }

    #[test]
    fn cancel_sources_include_latest_type() {
        let unit = LogicSpec::new("FETCH")
            .cancel_type("FETCH_CANCEL")
            .build()
            .expect("valid");
        assert!(unit.is_cancelled_by("FETCH_CANCEL"));
        assert!(!unit.is_cancelled_by("FETCH"));

        let latest = LogicSpec::new("FETCH").latest(true).build().expect("valid");
        assert!(latest.is_cancelled_by("FETCH"));
    }

    #[test]
    fn explicit_warn_timeout() {
        let unit = LogicSpec::new("FOO")
            .warn_timeout_ms(0)
            .build()
            .expect("valid");
        assert_eq!(unit.warn_timeout_ms(), 0);
    }

    // ── targets ──

    #[test]
    fn type_target_wraps_payload() {
        let target = ActionTarget::from("DONE");
        let action = target.make(json!(1), true);
        assert_eq!(action.action_type, "DONE");
        assert_eq!(action.payload, Some(json!(1)));
        assert!(action.is_error());
    }

    #[test]
    fn creator_target_decides_shape() {
        let target = ActionTarget::from(ActionCreator::new("CREATED"));
        let action = target.make(json!("x"), true);
        assert_eq!(action.action_type, "CREATED");
        assert!(!action.is_error());
    }

    // ── definitions ──

    #[test]
    fn from_def_carries_options() {
        let def = LogicDef::from_value(json!({
            "name": "poll",
            "type": "POLL",
            "throttle": 50,
            "processOptions": {"successType": "POLL_OK", "dispatchMultiple": true}
        }))
        .expect("valid def");
        let unit = LogicSpec::from_def(def)
            .process_dispatch(|_, _| Ok(()))
            .build()
            .expect("valid");
        assert_eq!(unit.name(), Some("poll"));
        assert_eq!(unit.throttle_ms(), 50);
        assert_eq!(unit.process_options().mode(), ProcessMode::MultiDispatch);
        assert!(matches!(
            unit.process_options().success_type,
            Some(ActionTarget::Type(ref t)) if t == "POLL_OK"
        ));
    }
}
