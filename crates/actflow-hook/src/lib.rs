//! Logic definitions for actflow.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  actflow-types   : Action, TypeMatcher, ErrorCode           │
//! │  actflow-event   : MonitorEvent, Monitor, CancelSignal      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  actflow-hook    : LogicSpec, LogicUnit, hook handles ◄HERE │
//! ├─────────────────────────────────────────────────────────────┤
//! │  actflow-runtime : Stage, DispatchChannel, LogicMiddleware  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Overview
//!
//! A logic unit watches for actions of certain types and runs two
//! optional hooks on each one:
//!
//! - **intercept** (`validate`/`transform`): decides whether the action
//!   moves on, possibly modified, and whether process runs
//! - **process**: performs side effects and dispatches resulting actions
//!
//! This crate defines the unit ([`LogicSpec`] → [`LogicUnit`]), the hook
//! signatures, the handles passed to hooks ([`Allow`], [`Reject`],
//! [`Dispatcher`], [`Done`]) and the [`ExecutionContext`]. Running
//! units is the job of `actflow-runtime`.
//!
//! # Configuration
//!
//! Non-hook options can be declared as data ([`LogicDef`]) and
//! process-wide defaults set with [`configure_logic`].

mod config;
mod context;
mod dispatchable;
mod error;
mod hook;
mod logic;

pub use config::{
    configure_logic, logic_defaults, LogicDef, LogicDefaults, ProcessOptionsDef,
    DEFAULT_WARN_TIMEOUT_MS, LOGIC_OPTION_KEYS, PROCESS_OPTION_KEYS,
};
pub use context::{Dep, Deps, ExecutionContext, SharedCtx, StateSource};
pub use dispatchable::{Dispatchable, Item, LogicFailure};
pub use error::LogicError;
pub use hook::{
    Allow, DispatchSink, Dispatcher, Done, HookArity, InterceptFlow, InterceptHook,
    InterceptKind, ProcessHook, Reject, UseDispatch, Verdict, VerdictSink,
};
pub use logic::{ActionTarget, LogicSpec, LogicUnit, ProcessMode, ProcessOptions};
