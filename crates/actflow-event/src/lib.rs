//! Observability and cancellation primitives for actflow.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  actflow-types   : Action, TypeMatcher, ErrorCode           │
//! │  actflow-event   : MonitorEvent, Monitor, CancelSignal ◄HERE│
//! │  actflow-hook    : LogicSpec, LogicUnit, hook handles       │
//! │  actflow-runtime : Stage, DispatchChannel, LogicMiddleware  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Monitor
//!
//! [`Monitor`] is a broadcast bus of [`MonitorEvent`]s with an attached
//! pending counter. The runtime publishes one event per step an action
//! takes; subscribers use them for logging and tests.
//!
//! # Cancellation
//!
//! [`CancelSignal`] is the one-shot notifier created per action
//! occurrence. Process hooks can await it or register callbacks to
//! release resources when a newer action supersedes theirs.

mod monitor;
mod signal;

pub use monitor::{Monitor, MonitorEvent, MonitorOp, DEFAULT_MONITOR_CAPACITY};
pub use signal::{CancelSignal, SignalState};
