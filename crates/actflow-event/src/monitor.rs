//! Flow monitoring.
//!
//! Every step an action takes through the pipeline is published on the
//! [`Monitor`] as a [`MonitorEvent`]. Events are for observability and
//! tests only; nothing in the runtime reads them back for control flow.
//!
//! # Event order per occurrence
//!
//! ```text
//! begin ─► next | nextDisp | filtered ─► dispatch* ─► end
//!                     (cancelled | dispCancelled immediately before end)
//! ```
//!
//! # Pending counter
//!
//! The monitor keeps an in-flight counter used for idle detection:
//!
//! | Op | Delta |
//! |----|-------|
//! | `top`, `begin` | +1 |
//! | `bottom`, `end`, `nextDisp`, `filtered`, `cancelled`, `dispatchError` | −1 |
//! | everything else | 0 |
//!
//! The counter is a heuristic: `nextDisp` decrements and the same
//! occurrence later reaches its own `end`. The dispatched action enters
//! from the top again, which keeps the books balanced in practice.

use actflow_types::Action;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Default capacity of the monitor broadcast channel.
pub const DEFAULT_MONITOR_CAPACITY: usize = 1024;

/// The kind of a monitor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorOp {
    /// Action entered the pipeline.
    Top,
    /// A logic unit started on the action.
    Begin,
    /// Intercept passed an action downstream.
    Next,
    /// Intercept changed the type; the action was dispatched instead.
    NextDisp,
    /// Intercept produced no action.
    Filtered,
    /// Cancelled before the intercept stage completed.
    Cancelled,
    /// Cancelled after the intercept stage completed.
    DispCancelled,
    /// An action was sent to the host dispatch.
    Dispatch,
    /// The host dispatch failed.
    DispatchError,
    /// The downstream continuation failed.
    NextError,
    /// Action left the bottom of the pipeline.
    Bottom,
    /// A logic unit finished with the occurrence.
    End,
}

impl MonitorOp {
    /// Change applied to the pending counter.
    #[must_use]
    pub fn pending_delta(self) -> i64 {
        match self {
            Self::Top | Self::Begin => 1,
            Self::End
            | Self::Bottom
            | Self::NextDisp
            | Self::Filtered
            | Self::DispatchError
            | Self::Cancelled => -1,
            Self::Next | Self::DispCancelled | Self::Dispatch | Self::NextError => 0,
        }
    }

    /// The wire name (`"nextDisp"`, `"dispCancelled"`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Begin => "begin",
            Self::Next => "next",
            Self::NextDisp => "nextDisp",
            Self::Filtered => "filtered",
            Self::Cancelled => "cancelled",
            Self::DispCancelled => "dispCancelled",
            Self::Dispatch => "dispatch",
            Self::DispatchError => "dispatchError",
            Self::NextError => "nextError",
            Self::Bottom => "bottom",
            Self::End => "end",
        }
    }
}

impl fmt::Display for MonitorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of an action through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    /// What happened.
    pub op: MonitorOp,
    /// The action that started the occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Name of the logic unit involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Action passed downstream (`next`, `bottom`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<Action>,
    /// Action sent to dispatch (`nextDisp`, `dispatch`, `dispatchError`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disp_action: Option<Action>,
    /// Whether the process stage will run (`next`, `nextDisp`, `filtered`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_process: Option<bool>,
    /// Error message (`nextError`, `dispatchError`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl MonitorEvent {
    fn bare(op: MonitorOp) -> Self {
        Self {
            op,
            action: None,
            name: None,
            next_action: None,
            disp_action: None,
            should_process: None,
            err: None,
        }
    }

    fn for_unit(op: MonitorOp, action: &Action, name: &str) -> Self {
        Self {
            action: Some(action.clone()),
            name: Some(name.to_string()),
            ..Self::bare(op)
        }
    }

    #[must_use]
    pub fn top(action: &Action) -> Self {
        Self {
            action: Some(action.clone()),
            ..Self::bare(MonitorOp::Top)
        }
    }

    #[must_use]
    pub fn begin(action: &Action, name: &str) -> Self {
        Self::for_unit(MonitorOp::Begin, action, name)
    }

    #[must_use]
    pub fn next(action: &Action, name: &str, next_action: &Action, should_process: bool) -> Self {
        Self {
            next_action: Some(next_action.clone()),
            should_process: Some(should_process),
            ..Self::for_unit(MonitorOp::Next, action, name)
        }
    }

    #[must_use]
    pub fn next_disp(
        action: &Action,
        name: &str,
        disp_action: &Action,
        should_process: bool,
    ) -> Self {
        Self {
            disp_action: Some(disp_action.clone()),
            should_process: Some(should_process),
            ..Self::for_unit(MonitorOp::NextDisp, action, name)
        }
    }

    #[must_use]
    pub fn filtered(action: &Action, name: &str, should_process: bool) -> Self {
        Self {
            should_process: Some(should_process),
            ..Self::for_unit(MonitorOp::Filtered, action, name)
        }
    }

    #[must_use]
    pub fn cancelled(action: &Action, name: &str) -> Self {
        Self::for_unit(MonitorOp::Cancelled, action, name)
    }

    #[must_use]
    pub fn disp_cancelled(action: &Action, name: &str) -> Self {
        Self::for_unit(MonitorOp::DispCancelled, action, name)
    }

    #[must_use]
    pub fn dispatch(action: &Action, name: &str, disp_action: &Action) -> Self {
        Self {
            disp_action: Some(disp_action.clone()),
            ..Self::for_unit(MonitorOp::Dispatch, action, name)
        }
    }

    #[must_use]
    pub fn dispatch_error(action: &Action, name: &str, disp_action: &Action, err: String) -> Self {
        Self {
            disp_action: Some(disp_action.clone()),
            err: Some(err),
            ..Self::for_unit(MonitorOp::DispatchError, action, name)
        }
    }

    #[must_use]
    pub fn next_error(action: &Action, err: String) -> Self {
        Self {
            action: Some(action.clone()),
            err: Some(err),
            ..Self::bare(MonitorOp::NextError)
        }
    }

    #[must_use]
    pub fn bottom(next_action: &Action) -> Self {
        Self {
            next_action: Some(next_action.clone()),
            ..Self::bare(MonitorOp::Bottom)
        }
    }

    #[must_use]
    pub fn end(action: &Action, name: &str) -> Self {
        Self::for_unit(MonitorOp::End, action, name)
    }
}

struct MonitorInner {
    events: broadcast::Sender<MonitorEvent>,
    pending: Mutex<i64>,
    pending_tx: watch::Sender<i64>,
}

/// Event bus for [`MonitorEvent`]s plus the pending counter.
///
/// Cloning is cheap; clones share the same bus and counter.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    /// Creates a monitor with [`DEFAULT_MONITOR_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MONITOR_CAPACITY)
    }

    /// Creates a monitor whose subscribers may lag by up to `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (pending_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(MonitorInner {
                events,
                pending: Mutex::new(0),
                pending_tx,
            }),
        }
    }

    /// Publishes an event and updates the pending counter.
    pub fn emit(&self, event: MonitorEvent) {
        let mut pending = self.inner.pending.lock();
        *pending += event.op.pending_delta();
        tracing::trace!(
            op = %event.op,
            name = event.name.as_deref().unwrap_or(""),
            pending = *pending,
            "monitor"
        );
        self.inner.pending_tx.send_replace(*pending);
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    /// Current value of the pending counter.
    #[must_use]
    pub fn pending(&self) -> i64 {
        *self.inner.pending.lock()
    }

    /// Watches the pending counter.
    #[must_use]
    pub fn watch_pending(&self) -> watch::Receiver<i64> {
        self.inner.pending_tx.subscribe()
    }

    /// Resolves once the pending counter is zero.
    ///
    /// Returns immediately if nothing is in flight.
    pub async fn when_idle(&self) {
        let mut rx = self.watch_pending();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("pending", &self.pending())
            .field("subscribers", &self.inner.events.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn foo() -> Action {
        Action::new("FOO")
    }

    #[test]
    fn pending_deltas() {
        assert_eq!(MonitorOp::Top.pending_delta(), 1);
        assert_eq!(MonitorOp::Begin.pending_delta(), 1);
        assert_eq!(MonitorOp::End.pending_delta(), -1);
        assert_eq!(MonitorOp::NextDisp.pending_delta(), -1);
        assert_eq!(MonitorOp::DispatchError.pending_delta(), -1);
        assert_eq!(MonitorOp::DispCancelled.pending_delta(), 0);
        assert_eq!(MonitorOp::Next.pending_delta(), 0);
    }

    #[test]
    fn op_serializes_camel_case() {
        assert_eq!(
            serde_json::to_value(MonitorOp::DispCancelled).expect("serialize"),
            json!("dispCancelled")
        );
        assert_eq!(MonitorOp::NextDisp.to_string(), "nextDisp");
    }

    #[test]
    fn event_serializes_only_set_fields() {
        let event = MonitorEvent::next(&foo(), "L(FOO)-0", &foo(), true);
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({
                "op": "next",
                "action": {"type": "FOO"},
                "name": "L(FOO)-0",
                "nextAction": {"type": "FOO"},
                "shouldProcess": true
            })
        );
    }

    #[test]
    fn emit_tracks_pending() {
        let monitor = Monitor::new();
        monitor.emit(MonitorEvent::top(&foo()));
        monitor.emit(MonitorEvent::begin(&foo(), "a"));
        assert_eq!(monitor.pending(), 2);
        monitor.emit(MonitorEvent::bottom(&foo()));
        monitor.emit(MonitorEvent::end(&foo(), "a"));
        assert_eq!(monitor.pending(), 0);
    }

    #[test]
    fn subscribers_receive_in_order() {
        let monitor = Monitor::new();
        let mut rx = monitor.subscribe();
        monitor.emit(MonitorEvent::top(&foo()));
        monitor.emit(MonitorEvent::bottom(&foo()));

        assert_eq!(rx.try_recv().expect("top").op, MonitorOp::Top);
        assert_eq!(rx.try_recv().expect("bottom").op, MonitorOp::Bottom);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clones_share_counter() {
        let monitor = Monitor::new();
        let clone = monitor.clone();
        clone.emit(MonitorEvent::top(&foo()));
        assert_eq!(monitor.pending(), 1);
    }

    #[tokio::test]
    async fn when_idle_returns_immediately_at_zero() {
        let monitor = Monitor::new();
        monitor.when_idle().await;
    }

    #[tokio::test]
    async fn when_idle_waits_for_zero() {
        let monitor = Monitor::new();
        monitor.emit(MonitorEvent::top(&foo()));

        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.when_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        monitor.emit(MonitorEvent::bottom(&foo()));
        waiter.await.expect("waiter completes");
    }
}
