//! Test doubles for the host side of the middleware.
//!
//! [`RecordingHost`] plays both collaborators: it records actions that
//! logic dispatches and, through [`RecordingHost::next_fn`], actions that
//! leave the pipeline.
//!
//! ```
//! use actflow_hook::LogicSpec;
//! use actflow_runtime::testing::RecordingHost;
//! use actflow_runtime::{Deps, LogicMiddleware};
//! use actflow_types::Action;
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let unit = LogicSpec::new("FOO")
//!     .validate(|ctx, allow, _| {
//!         allow.pass(ctx.action.with_field("checked", Value::Bool(true)));
//!         Ok(())
//!     })
//!     .build()
//!     .expect("valid logic");
//!
//! let host = Arc::new(RecordingHost::new());
//! let mw = LogicMiddleware::new(vec![unit], Deps::new()).expect("no duplicates");
//! let call = mw
//!     .bind(host.clone())
//!     .expect("first host")
//!     .connect(host.next_fn());
//!
//! call.call(Action::new("FOO"));
//! assert_eq!(host.forwarded()[0].field("checked"), Some(&Value::Bool(true)));
//! # }
//! ```

use crate::host::{Host, HostError, Next};
use crate::middleware::MiddlewareFn;
use actflow_event::MonitorEvent;
use actflow_types::Action;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A host that records everything it receives.
#[derive(Default)]
pub struct RecordingHost {
    state: Mutex<Value>,
    dispatched: Mutex<Vec<Action>>,
    forwarded: Mutex<Vec<Action>>,
    failing: Mutex<HashSet<String>>,
    loopback: Mutex<Option<MiddlewareFn>>,
}

impl RecordingHost {
    /// Creates a host with `null` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a host with the given state.
    #[must_use]
    pub fn with_state(state: Value) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Replaces the state.
    pub fn set_state(&self, state: Value) {
        *self.state.lock() = state;
    }

    /// Makes [`Host::dispatch`] fail for actions of `action_type`.
    pub fn fail_dispatch_of(&self, action_type: impl Into<String>) {
        self.failing.lock().insert(action_type.into());
    }

    /// Feeds dispatched actions back into `middleware`, like a store does.
    pub fn loop_back(&self, middleware: MiddlewareFn) {
        *self.loopback.lock() = Some(middleware);
    }

    /// Actions dispatched by logic, in order.
    #[must_use]
    pub fn dispatched(&self) -> Vec<Action> {
        self.dispatched.lock().clone()
    }

    /// Types of [`dispatched`](Self::dispatched) actions.
    #[must_use]
    pub fn dispatched_types(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .iter()
            .map(|a| a.action_type.clone())
            .collect()
    }

    /// Actions that left the pipeline, in order.
    #[must_use]
    pub fn forwarded(&self) -> Vec<Action> {
        self.forwarded.lock().clone()
    }

    /// Types of [`forwarded`](Self::forwarded) actions.
    #[must_use]
    pub fn forwarded_types(&self) -> Vec<String> {
        self.forwarded
            .lock()
            .iter()
            .map(|a| a.action_type.clone())
            .collect()
    }

    /// A continuation that records into this host.
    #[must_use]
    pub fn next_fn(self: &Arc<Self>) -> impl Next + 'static {
        let host = Arc::clone(self);
        move |action: Action| -> Result<(), HostError> {
            host.forwarded.lock().push(action);
            Ok(())
        }
    }
}

impl Host for RecordingHost {
    fn state(&self) -> Value {
        self.state.lock().clone()
    }

    fn dispatch(&self, action: Action) -> Result<(), HostError> {
        if self.failing.lock().contains(&action.action_type) {
            return Err(HostError::rejected(&action, "configured to fail"));
        }
        self.dispatched.lock().push(action.clone());
        let loopback = self.loopback.lock().clone();
        if let Some(middleware) = loopback {
            middleware.call(action);
        }
        Ok(())
    }
}

/// Drains every event currently buffered in `rx`.
pub fn drain(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}
