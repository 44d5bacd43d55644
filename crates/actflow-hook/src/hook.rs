//! Hook signatures and the handles passed into them.
//!
//! A logic unit has up to two hooks:
//!
//! | Hook | Signature | Role |
//! |------|-----------|------|
//! | intercept | `(ctx, Allow, Reject)` | validate or transform the action before it moves on |
//! | process | `(ctx)`, `(ctx, Dispatcher)` or `(ctx, Dispatcher, Done)` | side effects after the action moved on |
//!
//! The handles do not act on their own. They forward to sinks
//! implemented by the runtime ([`VerdictSink`], [`DispatchSink`]), which
//! enforce the one-verdict and channel-lifetime rules.
//!
//! # Process arity
//!
//! The number of parameters a process hook takes selects its default
//! dispatch mode (see [`HookArity`]):
//!
//! ```text
//! process(ctx)                  → return value is dispatched
//! process(ctx, dispatch)        → first dispatch completes the channel
//! process(ctx, dispatch, done)  → channel stays open until done()
//! ```

use crate::{Dispatchable, ExecutionContext, LogicFailure};
use actflow_types::Action;
use futures::future::BoxFuture;
use futures::Future;
use std::fmt;
use std::sync::Arc;

// ── Arity ───────────────────────────────────────────────────────────

/// Declared parameter shape of a process hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookArity {
    /// `process(ctx)`
    Context,
    /// `process(ctx, dispatch)`
    ContextDispatch,
    /// `process(ctx, dispatch, done)`
    ContextDispatchDone,
}

impl HookArity {
    /// Number of parameters.
    #[must_use]
    pub fn params(self) -> usize {
        match self {
            Self::Context => 1,
            Self::ContextDispatch => 2,
            Self::ContextDispatchDone => 3,
        }
    }
}

// ── Intercept ───────────────────────────────────────────────────────

/// Which alias an intercept hook was declared under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptKind {
    Validate,
    Transform,
}

impl InterceptKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Transform => "transform",
        }
    }
}

/// Outcome of invoking an intercept hook.
pub enum InterceptFlow {
    /// The hook returned; any verdict it gave has been delivered.
    Done,
    /// The hook continues asynchronously; the verdict arrives later.
    Pending(BoxFuture<'static, Result<(), LogicFailure>>),
}

type InterceptFn =
    dyn Fn(ExecutionContext, Allow, Reject) -> Result<InterceptFlow, LogicFailure> + Send + Sync;

/// A validate or transform hook.
#[derive(Clone)]
pub struct InterceptHook {
    kind: InterceptKind,
    call: Arc<InterceptFn>,
}

impl InterceptHook {
    /// Wraps a synchronous hook.
    pub fn new<F>(kind: InterceptKind, hook: F) -> Self
    where
        F: Fn(ExecutionContext, Allow, Reject) -> Result<(), LogicFailure> + Send + Sync + 'static,
    {
        Self {
            kind,
            call: Arc::new(move |ctx, allow, reject| {
                hook(ctx, allow, reject).map(|()| InterceptFlow::Done)
            }),
        }
    }

    /// Wraps an asynchronous hook.
    pub fn new_async<F, Fut>(kind: InterceptKind, hook: F) -> Self
    where
        F: Fn(ExecutionContext, Allow, Reject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), LogicFailure>> + Send + 'static,
    {
        Self {
            kind,
            call: Arc::new(move |ctx, allow, reject| {
                Ok(InterceptFlow::Pending(Box::pin(hook(ctx, allow, reject))))
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> InterceptKind {
        self.kind
    }

    /// Invokes the hook.
    ///
    /// # Errors
    ///
    /// Returns the failure raised synchronously by the hook.
    pub fn invoke(
        &self,
        ctx: ExecutionContext,
        allow: Allow,
        reject: Reject,
    ) -> Result<InterceptFlow, LogicFailure> {
        (self.call)(ctx, allow, reject)
    }
}

impl fmt::Debug for InterceptHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptHook")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ── Process ─────────────────────────────────────────────────────────

type ProcessFn =
    dyn Fn(ExecutionContext, Dispatcher) -> Result<Dispatchable, LogicFailure> + Send + Sync;

/// A process hook of any arity.
///
/// Internally every arity is normalized to `(ctx, dispatcher) ->
/// Dispatchable`; the return value is only dispatched in return-value
/// mode.
#[derive(Clone)]
pub struct ProcessHook {
    arity: HookArity,
    call: Arc<ProcessFn>,
}

impl ProcessHook {
    /// `process(ctx)` returning something dispatchable.
    pub fn returning<F, R>(hook: F) -> Self
    where
        F: Fn(ExecutionContext) -> Result<R, LogicFailure> + Send + Sync + 'static,
        R: Into<Dispatchable>,
    {
        Self {
            arity: HookArity::Context,
            call: Arc::new(move |ctx, _| hook(ctx).map(Into::into)),
        }
    }

    /// `process(ctx)` returning a future.
    pub fn returning_async<F, Fut, T>(hook: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LogicFailure>> + Send + 'static,
        T: Into<crate::Item>,
    {
        Self {
            arity: HookArity::Context,
            call: Arc::new(move |ctx, _| Ok(Dispatchable::future(hook(ctx)))),
        }
    }

    /// `process(ctx, dispatch)`.
    pub fn dispatching<F>(hook: F) -> Self
    where
        F: Fn(ExecutionContext, Dispatcher) -> Result<(), LogicFailure> + Send + Sync + 'static,
    {
        Self {
            arity: HookArity::ContextDispatch,
            call: Arc::new(move |ctx, dispatcher| {
                hook(ctx, dispatcher).map(|()| Dispatchable::Empty)
            }),
        }
    }

    /// `process(ctx, dispatch, done)`.
    pub fn dispatching_multi<F>(hook: F) -> Self
    where
        F: Fn(ExecutionContext, Dispatcher, Done) -> Result<(), LogicFailure>
            + Send
            + Sync
            + 'static,
    {
        Self {
            arity: HookArity::ContextDispatchDone,
            call: Arc::new(move |ctx, dispatcher| {
                let done = dispatcher.done_handle();
                hook(ctx, dispatcher, done).map(|()| Dispatchable::Empty)
            }),
        }
    }

    #[must_use]
    pub fn arity(&self) -> HookArity {
        self.arity
    }

    /// Invokes the hook.
    ///
    /// # Errors
    ///
    /// Returns the failure raised synchronously by the hook.
    pub fn invoke(
        &self,
        ctx: ExecutionContext,
        dispatcher: Dispatcher,
    ) -> Result<Dispatchable, LogicFailure> {
        (self.call)(ctx, dispatcher)
    }
}

impl fmt::Debug for ProcessHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHook")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

// ── Verdict handles ─────────────────────────────────────────────────

/// Which intercept handle was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Reject,
}

/// How a verdict action is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UseDispatch {
    /// Forward when the type is unchanged, dispatch when it changed.
    #[default]
    Auto,
    /// Always dispatch to the host.
    Always,
    /// Always forward down the pipeline.
    Never,
}

/// Receives intercept verdicts. Implemented by the runtime.
pub trait VerdictSink: Send + Sync {
    /// Delivers a verdict. Only the first delivery per occurrence counts.
    fn deliver(&self, verdict: Verdict, action: Option<Action>, use_dispatch: UseDispatch);
}

/// Lets the action continue, with processing.
#[derive(Clone)]
pub struct Allow {
    sink: Arc<dyn VerdictSink>,
}

impl Allow {
    #[must_use]
    pub fn new(sink: Arc<dyn VerdictSink>) -> Self {
        Self { sink }
    }

    /// Passes `action` on, possibly modified.
    pub fn pass(&self, action: Action) {
        self.pass_with(Some(action), UseDispatch::Auto);
    }

    /// Passes `action` on with an explicit routing choice.
    pub fn pass_with(&self, action: Option<Action>, use_dispatch: UseDispatch) {
        self.sink.deliver(Verdict::Allow, action, use_dispatch);
    }

    /// Passes nothing on. Process still runs.
    pub fn filter(&self) {
        self.pass_with(None, UseDispatch::Auto);
    }
}

/// Lets the action continue, without processing.
#[derive(Clone)]
pub struct Reject {
    sink: Arc<dyn VerdictSink>,
}

impl Reject {
    #[must_use]
    pub fn new(sink: Arc<dyn VerdictSink>) -> Self {
        Self { sink }
    }

    /// Passes `action` on but skips process.
    pub fn pass(&self, action: Action) {
        self.pass_with(Some(action), UseDispatch::Auto);
    }

    /// Passes `action` on with an explicit routing choice.
    pub fn pass_with(&self, action: Option<Action>, use_dispatch: UseDispatch) {
        self.sink.deliver(Verdict::Reject, action, use_dispatch);
    }

    /// Drops the action entirely.
    pub fn filter(&self) {
        self.pass_with(None, UseDispatch::Auto);
    }
}

// ── Dispatch handles ────────────────────────────────────────────────

/// Receives dispatches from a process hook. Implemented by the runtime.
pub trait DispatchSink: Send + Sync {
    /// Adds a source to the channel.
    ///
    /// `allow_more` keeps a single-dispatch channel open.
    fn dispatch(&self, value: Dispatchable, allow_more: bool);

    /// Closes the channel to new sources.
    fn done(&self);
}

/// Dispatches values from a process hook.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn DispatchSink>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(sink: Arc<dyn DispatchSink>) -> Self {
        Self { sink }
    }

    /// Dispatches `value`.
    ///
    /// In single-dispatch mode this is the only dispatch.
    pub fn dispatch(&self, value: impl Into<Dispatchable>) {
        self.sink.dispatch(value.into(), false);
    }

    /// Dispatches `value` and keeps a single-dispatch channel open.
    pub fn dispatch_more(&self, value: impl Into<Dispatchable>) {
        self.sink.dispatch(value.into(), true);
    }

    /// Signals that no more dispatches follow.
    pub fn done(&self) {
        self.sink.done();
    }

    /// Returns a standalone [`Done`] handle for the same channel.
    #[must_use]
    pub fn done_handle(&self) -> Done {
        Done {
            sink: Arc::clone(&self.sink),
        }
    }
}

/// Completes a multi-dispatch channel.
#[derive(Clone)]
pub struct Done {
    sink: Arc<dyn DispatchSink>,
}

impl Done {
    /// Signals that no more dispatches follow.
    pub fn call(&self) {
        self.sink.done();
    }
}
