//! Cancellation signal for one action occurrence.
//!
//! Each time a logic unit starts on an action it creates a
//! [`CancelSignal`]. The signal resolves exactly once:
//!
//! ```text
//!            cancel()                      complete()
//! Pending ─────────────► Cancelled   Pending ─────────► Completed
//! ```
//!
//! Cancellation is reported on the [`Monitor`] as `cancelled` while the
//! intercept stage is still running and as `dispCancelled` once it has
//! completed. Both describe the same event; the label only tells how far
//! the occurrence got.
//!
//! # Watchdog
//!
//! In debug builds [`CancelSignal::spawn_watchdog`] logs a warning when
//! an occurrence is still unresolved after its warn timeout. It never
//! cancels anything.
//!
//! # Example
//!
//! ```
//! use actflow_event::{CancelSignal, Monitor, SignalState};
//! use actflow_types::Action;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let signal = CancelSignal::new(Action::new("FOO"), "L(FOO)-0", Monitor::new());
//! let cleared = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&cleared);
//! signal.on_cancel(move || flag.store(true, Ordering::SeqCst));
//!
//! assert!(signal.cancel());
//! assert!(!signal.cancel()); // one-shot
//! assert_eq!(signal.state(), SignalState::Cancelled);
//! assert!(cleared.load(Ordering::SeqCst));
//! ```

use crate::{Monitor, MonitorEvent};
use actflow_types::Action;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Resolution state of a [`CancelSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// Not resolved yet.
    Pending,
    /// Cancelled by a cancel source.
    Cancelled,
    /// Released by the occurrence's own completion.
    Completed,
}

type CancelCallback = Box<dyn FnOnce() + Send>;

struct SignalInner {
    action: Action,
    name: String,
    monitor: Monitor,
    state: watch::Sender<SignalState>,
    intercept_complete: AtomicBool,
    callbacks: Mutex<Vec<CancelCallback>>,
}

/// One-shot cancellation notifier for an occurrence.
///
/// Cloning is cheap; clones observe and resolve the same signal.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Arc<SignalInner>,
}

impl CancelSignal {
    /// Creates a pending signal for `action` inside the unit `name`.
    #[must_use]
    pub fn new(action: Action, name: impl Into<String>, monitor: Monitor) -> Self {
        let (state, _) = watch::channel(SignalState::Pending);
        Self {
            inner: Arc::new(SignalInner {
                action,
                name: name.into(),
                monitor,
                state,
                intercept_complete: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The action this occurrence started with.
    #[must_use]
    pub fn action(&self) -> &Action {
        &self.inner.action
    }

    /// Name of the owning logic unit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SignalState {
        *self.inner.state.borrow()
    }

    /// Returns `true` once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == SignalState::Cancelled
    }

    /// Returns `true` once cancelled or completed.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state() != SignalState::Pending
    }

    /// Records that the intercept stage has completed.
    ///
    /// Later cancellation is reported as `dispCancelled`.
    pub fn mark_intercept_complete(&self) {
        self.inner.intercept_complete.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the intercept stage has completed.
    #[must_use]
    pub fn is_intercept_complete(&self) -> bool {
        self.inner.intercept_complete.load(Ordering::SeqCst)
    }

    /// Cancels the occurrence.
    ///
    /// Returns `false` if the signal was already resolved, in which case
    /// nothing is reported.
    pub fn cancel(&self) -> bool {
        let fired = self.inner.state.send_if_modified(|state| {
            if *state == SignalState::Pending {
                *state = SignalState::Cancelled;
                true
            } else {
                false
            }
        });
        if !fired {
            return false;
        }

        let event = if self.is_intercept_complete() {
            MonitorEvent::disp_cancelled(&self.inner.action, &self.inner.name)
        } else {
            MonitorEvent::cancelled(&self.inner.action, &self.inner.name)
        };
        self.inner.monitor.emit(event);
        tracing::debug!(logic = %self.inner.name, action = %self.inner.action, "occurrence cancelled");

        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Releases the signal without cancelling.
    ///
    /// Pending callbacks are dropped uncalled. Returns `false` if the
    /// signal was already resolved.
    pub fn complete(&self) -> bool {
        let released = self.inner.state.send_if_modified(|state| {
            if *state == SignalState::Pending {
                *state = SignalState::Completed;
                true
            } else {
                false
            }
        });
        if released {
            self.inner.callbacks.lock().clear();
        }
        released
    }

    /// Registers `callback` to run when the signal is cancelled.
    ///
    /// Runs immediately if the signal is already cancelled; never runs if
    /// the signal completes normally.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.inner.callbacks.lock();
        match self.state() {
            SignalState::Pending => callbacks.push(Box::new(callback)),
            SignalState::Cancelled => {
                drop(callbacks);
                callback();
            }
            SignalState::Completed => {}
        }
    }

    /// Resolves when the signal is cancelled.
    ///
    /// Never resolves if the occurrence completes normally; use it inside
    /// `tokio::select!` next to the actual work.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.state.subscribe();
        if rx
            .wait_for(|state| *state == SignalState::Cancelled)
            .await
            .is_err()
        {
            std::future::pending::<()>().await;
        }
    }

    /// Resolves once the signal is cancelled or completed.
    pub async fn resolved(&self) -> SignalState {
        let mut rx = self.inner.state.subscribe();
        let state = match rx.wait_for(|state| *state != SignalState::Pending).await {
            Ok(state) => *state,
            Err(_) => SignalState::Completed,
        };
        state
    }

    /// Spawns the stuck-logic watchdog.
    ///
    /// Returns `None` (and spawns nothing) in release builds, when
    /// `warn_timeout` is zero, or outside a tokio runtime.
    pub fn spawn_watchdog(&self, warn_timeout: Duration) -> Option<JoinHandle<()>> {
        if !cfg!(debug_assertions) || warn_timeout.is_zero() {
            return None;
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let signal = self.clone();
        Some(handle.spawn(async move {
            tokio::select! {
                _ = signal.resolved() => {}
                () = tokio::time::sleep(warn_timeout) => {
                    tracing::warn!(
                        logic = %signal.name(),
                        warn_timeout_ms = warn_timeout.as_millis() as u64,
                        "logic ({}) is still running after {:.1}s, forget to call done()? \
                         For non-ending logic, set warn_timeout to 0",
                        signal.name(),
                        warn_timeout.as_secs_f64(),
                    );
                }
            }
        }))
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("name", &self.inner.name)
            .field("action", &self.inner.action.action_type)
            .field("state", &self.state())
            .field("intercept_complete", &self.is_intercept_complete())
            .finish()
    }
}
