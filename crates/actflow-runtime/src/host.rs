//! Host-side collaborators.
//!
//! The runtime never owns application state or the downstream action
//! handling. It talks to two collaborators:
//!
//! - [`Host`]: reads state and accepts actions dispatched by logic
//! - [`Next`]: the continuation the pipeline forwards actions to
//!
//! Both are called without any runtime lock held, so implementations
//! may re-enter the middleware (a host usually feeds dispatched actions
//! back into it).

use actflow_hook::StateSource;
use actflow_types::{Action, ErrorCode};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by [`Host::dispatch`] and [`Next::next`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The collaborator refused the action.
    #[error("action {action_type} rejected: {reason}")]
    Rejected { action_type: String, reason: String },

    /// The collaborator no longer accepts actions.
    #[error("host closed")]
    Closed,
}

impl HostError {
    /// Creates a [`HostError::Rejected`] for `action`.
    #[must_use]
    pub fn rejected(action: &Action, reason: impl Into<String>) -> Self {
        Self::Rejected {
            action_type: action.action_type.clone(),
            reason: reason.into(),
        }
    }
}

impl ErrorCode for HostError {
    fn code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "HOST_REJECTED",
            Self::Closed => "HOST_CLOSED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// The application the middleware is bound to.
pub trait Host: Send + Sync {
    /// Returns the current application state.
    fn state(&self) -> Value;

    /// Accepts an action dispatched by logic.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the action could not be dispatched. The
    /// runtime logs it and reports `dispatchError`; it never propagates.
    fn dispatch(&self, action: Action) -> Result<(), HostError>;
}

/// The continuation that receives actions leaving the pipeline.
pub trait Next: Send + Sync {
    /// Forwards `action` downstream.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if downstream failed. The runtime logs it and
    /// reports `nextError`; it never propagates.
    fn next(&self, action: Action) -> Result<(), HostError>;
}

impl<F> Next for F
where
    F: Fn(Action) -> Result<(), HostError> + Send + Sync,
{
    fn next(&self, action: Action) -> Result<(), HostError> {
        self(action)
    }
}

/// Exposes a host's state to execution contexts.
pub(crate) struct HostState(pub(crate) Arc<dyn Host>);

impl StateSource for HostState {
    fn state(&self) -> Value {
        self.0.state()
    }
}

/// Returns `true` if both handles point at the same host.
pub(crate) fn same_host(a: &Arc<dyn Host>, b: &Arc<dyn Host>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticHost;

    impl Host for StaticHost {
        fn state(&self) -> Value {
            json!({"ready": true})
        }

        fn dispatch(&self, action: Action) -> Result<(), HostError> {
            Err(HostError::rejected(&action, "read only"))
        }
    }

    #[test]
    fn rejected_display_and_code() {
        let err = HostError::rejected(&Action::new("FOO"), "full");
        assert_eq!(err.to_string(), "action FOO rejected: full");
        assert_eq!(err.code(), "HOST_REJECTED");
        assert!(err.is_recoverable());
        assert!(!HostError::Closed.is_recoverable());
    }

    #[test]
    fn closure_is_next() {
        let next = |action: Action| {
            if action.action_type == "BAD" {
                Err(HostError::Closed)
            } else {
                Ok(())
            }
        };
        assert!(next.next(Action::new("OK")).is_ok());
        assert_eq!(next.next(Action::new("BAD")), Err(HostError::Closed));
    }

    #[test]
    fn host_state_reads_through() {
        let host: Arc<dyn Host> = Arc::new(StaticHost);
        let state = HostState(Arc::clone(&host));
        assert_eq!(state.state(), json!({"ready": true}));
        assert!(host.dispatch(Action::new("X")).is_err());
    }

    #[test]
    fn host_identity() {
        let a: Arc<dyn Host> = Arc::new(StaticHost);
        let b: Arc<dyn Host> = Arc::new(StaticHost);
        assert!(same_host(&a, &Arc::clone(&a)));
        assert!(!same_host(&a, &b));
    }
}
