//! Dispatch channel: one per occurrence.
//!
//! Turns whatever a process hook dispatches into outgoing actions and
//! decides when the occurrence is over.
//!
//! ```text
//!  dispatch(Ready)  ──► map ──► host.dispatch
//!  dispatch(Future) ──► task ─┐
//!  dispatch(Stream) ──► task ─┴► map ──► host.dispatch
//!  done()           ──► input closed
//!
//!  end when: input closed and no task running
//!          | first failure item
//!          | cancellation
//! ```
//!
//! # Item mapping
//!
//! | Item | success_type / fail_type set | otherwise |
//! |------|------------------------------|-----------|
//! | `Intercepted(a)` | `a` | `a` |
//! | `Action(a)` | `{type: success_type, payload: a}` | `a` |
//! | `Value(v)` | `{type: success_type, payload: v}` | nothing for `null`; `v` if action-shaped, else `UNHANDLED_LOGIC_ERROR` |
//! | `Failure(f)` | `{type: fail_type, payload, error: true}` | `f`'s own type, else `UNHANDLED_LOGIC_ERROR` |
//!
//! A failure item ends the channel after it is dispatched.

use crate::host::Host;
use actflow_event::{CancelSignal, Monitor, MonitorEvent};
use actflow_hook::{DispatchSink, Dispatchable, Item, LogicFailure, LogicUnit};
use actflow_types::{Action, UNHANDLED_LOGIC_ERROR};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};

type EndHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Default)]
struct ChannelState {
    input_closed: bool,
    open_sources: usize,
    ended: bool,
}

/// Per-occurrence dispatch channel.
pub(crate) struct DispatchChannel {
    unit: Arc<LogicUnit>,
    action: Action,
    name: Arc<str>,
    signal: CancelSignal,
    host: Arc<dyn Host>,
    monitor: Monitor,
    state: Mutex<ChannelState>,
    on_end: Mutex<Option<EndHook>>,
    this: Weak<DispatchChannel>,
}

impl DispatchChannel {
    /// Creates the channel and ties it to `signal`.
    ///
    /// Cancelling the signal ends the channel. `on_end` runs once, after
    /// the `end` event.
    pub(crate) fn new(
        unit: Arc<LogicUnit>,
        action: Action,
        name: Arc<str>,
        signal: CancelSignal,
        host: Arc<dyn Host>,
        monitor: Monitor,
        on_end: EndHook,
    ) -> Arc<Self> {
        let channel = Arc::new_cyclic(|this| Self {
            unit,
            action,
            name,
            signal: signal.clone(),
            host,
            monitor,
            state: Mutex::new(ChannelState::default()),
            on_end: Mutex::new(Some(on_end)),
            this: this.clone(),
        });
        let weak = Arc::downgrade(&channel);
        signal.on_cancel(move || {
            if let Some(channel) = weak.upgrade() {
                channel.finish();
            }
        });
        channel
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Adds a source. Closes the input afterwards unless the unit is
    /// multi-dispatch or `allow_more` is set.
    pub(crate) fn push(&self, value: Dispatchable, allow_more: bool) {
        if self.rejects_input() {
            tracing::debug!(
                logic = %self.name,
                action = %self.action,
                value = ?value,
                "dispatch after channel closed, dropped"
            );
            return;
        }

        match value {
            Dispatchable::Empty => {}
            Dispatchable::Ready(item) => self.emit(item),
            Dispatchable::Future(future) => {
                if let Some(channel) = self.open_source() {
                    tokio::spawn(async move {
                        let signal = channel.signal.clone();
                        tokio::select! {
                            biased;
                            _ = signal.resolved() => {}
                            item = future => channel.emit(item),
                        }
                        channel.close_source();
                    });
                }
            }
            Dispatchable::Stream(mut stream) => {
                if let Some(channel) = self.open_source() {
                    tokio::spawn(async move {
                        let signal = channel.signal.clone();
                        loop {
                            let item = tokio::select! {
                                biased;
                                _ = signal.resolved() => None,
                                item = stream.next() => item,
                            };
                            let Some(item) = item else { break };
                            channel.emit(item);
                            if channel.is_ended() {
                                break;
                            }
                        }
                        channel.close_source();
                    });
                }
            }
        }

        if !(allow_more || self.unit.process_options().dispatch_multiple) {
            self.close_input();
        }
    }

    /// Closes the input. The channel ends once running sources finish.
    pub(crate) fn close_input(&self) {
        let finished = {
            let mut state = self.state.lock();
            state.input_closed = true;
            state.open_sources == 0
        };
        if finished {
            self.finish();
        }
    }

    /// Routes a hook failure: logged, then dispatched on the failure path.
    pub(crate) fn fail(&self, failure: LogicFailure) {
        tracing::error!(
            logic = %self.name,
            action = %self.action,
            error = %failure,
            "unhandled exception in logic named: {}",
            self.name
        );
        self.push(Dispatchable::Ready(Item::Failure(failure)), true);
    }

    fn rejects_input(&self) -> bool {
        let state = self.state.lock();
        state.ended || state.input_closed
    }

    fn open_source(&self) -> Option<Arc<Self>> {
        let channel = self.this.upgrade()?;
        self.state.lock().open_sources += 1;
        Some(channel)
    }

    fn close_source(&self) {
        let finished = {
            let mut state = self.state.lock();
            state.open_sources = state.open_sources.saturating_sub(1);
            state.input_closed && state.open_sources == 0
        };
        if finished {
            self.finish();
        }
    }

    /// Maps one item and dispatches it. Failures end the channel.
    fn emit(&self, item: Item) {
        if self.is_ended() || self.signal.is_cancelled() {
            tracing::debug!(logic = %self.name, item = ?item, "item after channel ended, dropped");
            return;
        }

        let options = self.unit.process_options();
        let (action, terminal) = match item {
            Item::Intercepted(action) => (action, false),
            Item::Value(Value::Null) if options.success_type.is_none() => {
                tracing::debug!(
                    logic = %self.name,
                    "null value without success_type, nothing dispatched"
                );
                return;
            }
            Item::Action(action) => match &options.success_type {
                Some(target) => (target.make(action.to_value(), false), false),
                None => (action, false),
            },
            Item::Value(value) => match &options.success_type {
                Some(target) => (target.make(value, false), false),
                None => match Action::from_value(value.clone()) {
                    Ok(action) => (action, false),
                    Err(err) => {
                        tracing::warn!(
                            logic = %self.name,
                            error = %err,
                            "dispatched a value that is not an action and no success_type is set"
                        );
                        (Action::failure(UNHANDLED_LOGIC_ERROR, value), false)
                    }
                },
            },
            Item::Failure(failure) => {
                let action = match (&options.fail_type, failure.action_type()) {
                    (Some(target), _) => target.make(failure.payload(), true),
                    (None, Some(own)) => Action::failure(own, failure.payload()),
                    (None, None) => Action::failure(UNHANDLED_LOGIC_ERROR, failure.payload()),
                };
                (action, true)
            }
        };

        self.send(action);
        if terminal {
            self.finish();
        }
    }

    fn send(&self, action: Action) {
        self.monitor
            .emit(MonitorEvent::dispatch(&self.action, &self.name, &action));
        if let Err(err) = self.host.dispatch(action.clone()) {
            tracing::error!(
                logic = %self.name,
                action = %action,
                error = %err,
                "host failed to dispatch action"
            );
            self.monitor.emit(MonitorEvent::dispatch_error(
                &self.action,
                &self.name,
                &action,
                err.to_string(),
            ));
        }
    }

    /// Ends the channel: `end`, release the signal, run the end hook.
    fn finish(&self) {
        {
            let mut state = self.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
        }
        self.monitor
            .emit(MonitorEvent::end(&self.action, &self.name));
        self.signal.complete();
        let on_end = self.on_end.lock().take();
        if let Some(on_end) = on_end {
            on_end();
        }
    }
}

impl DispatchSink for DispatchChannel {
    fn dispatch(&self, value: Dispatchable, allow_more: bool) {
        self.push(value, allow_more);
    }

    fn done(&self) {
        self.close_input();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHost;
    use actflow_event::MonitorOp;
    use actflow_hook::{ActionTarget, LogicSpec};
    use futures::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Fixture {
        channel: Arc<DispatchChannel>,
        host: Arc<RecordingHost>,
        monitor: Monitor,
        signal: CancelSignal,
        ended: Arc<AtomicBool>,
    }

    fn fixture(spec: LogicSpec) -> Fixture {
        let unit = spec.build().expect("valid logic");
        let action = Action::new("FOO");
        let monitor = Monitor::new();
        let host = Arc::new(RecordingHost::new());
        let signal = CancelSignal::new(action.clone(), "L(FOO)-0", monitor.clone());
        let ended = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ended);
        let channel = DispatchChannel::new(
            unit,
            action,
            Arc::from("L(FOO)-0"),
            signal.clone(),
            host.clone(),
            monitor.clone(),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        Fixture {
            channel,
            host,
            monitor,
            signal,
            ended,
        }
    }

    fn multi() -> LogicSpec {
        LogicSpec::new("FOO").process_multi(|_, _, _| Ok(()))
    }

    // ── single dispatch ─────────────────────────────────────────────

    #[test]
    fn single_dispatch_closes_after_first_item() {
        let f = fixture(LogicSpec::new("FOO").process_dispatch(|_, _| Ok(())));
        let mut rx = f.monitor.subscribe();
        f.channel.push(Action::new("BAR").into(), false);
        f.channel.push(Action::new("BAZ").into(), false);

        assert_eq!(f.host.dispatched_types(), vec!["BAR"]);
        assert!(f.channel.is_ended());
        assert!(f.ended.load(Ordering::SeqCst));
        assert_eq!(f.signal.state(), actflow_event::SignalState::Completed);
        assert_eq!(rx.try_recv().expect("dispatch").op, MonitorOp::Dispatch);
        assert_eq!(rx.try_recv().expect("end").op, MonitorOp::End);
    }

    #[test]
    fn single_dispatch_empty_still_closes() {
        let f = fixture(LogicSpec::new("FOO").process_dispatch(|_, _| Ok(())));
        f.channel.push(Dispatchable::Empty, false);
        assert!(f.host.dispatched().is_empty());
        assert!(f.channel.is_ended());
    }

    #[test]
    fn allow_more_keeps_single_dispatch_open() {
        let f = fixture(LogicSpec::new("FOO").process_dispatch(|_, _| Ok(())));
        f.channel.push(Action::new("A").into(), true);
        assert!(!f.channel.is_ended());
        f.channel.push(Action::new("B").into(), false);
        assert_eq!(f.host.dispatched_types(), vec!["A", "B"]);
        assert!(f.channel.is_ended());
    }

    // ── multi dispatch ──────────────────────────────────────────────

    #[test]
    fn multi_dispatch_waits_for_done() {
        let f = fixture(multi());
        f.channel.push(Action::new("A").into(), false);
        f.channel.push(Action::new("B").into(), false);
        assert!(!f.channel.is_ended());
        f.channel.done();
        assert!(f.channel.is_ended());
        assert_eq!(f.host.dispatched_types(), vec!["A", "B"]);
    }

    #[test]
    fn failure_ends_channel() {
        let f = fixture(multi());
        f.channel
            .push(LogicFailure::new("boom").into(), false);
        f.channel.push(Action::new("LATE").into(), false);

        let dispatched = f.host.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].action_type, UNHANDLED_LOGIC_ERROR);
        assert_eq!(dispatched[0].payload, Some(json!("boom")));
        assert!(dispatched[0].is_error());
        assert!(f.channel.is_ended());
    }

    // ── mapping ─────────────────────────────────────────────────────

    #[test]
    fn success_type_wraps_value() {
        let f = fixture(LogicSpec::new("FOO").success_type("BAR").process(|_| Ok(json!(0))));
        f.channel.push(json!(42).into(), false);
        let dispatched = f.host.dispatched();
        assert_eq!(dispatched[0], Action::new("BAR").with_payload(json!(42)));
    }

    #[test]
    fn fail_type_wraps_failure() {
        let f = fixture(
            LogicSpec::new("FOO")
                .fail_type(ActionTarget::from("FOO_FAILED"))
                .process(|_| Ok(json!(0))),
        );
        f.channel.push(
            LogicFailure::new("nope").with_payload(json!({"code": 7})).into(),
            false,
        );
        let dispatched = f.host.dispatched();
        assert_eq!(
            dispatched[0],
            Action::failure("FOO_FAILED", json!({"code": 7}))
        );
    }

    #[test]
    fn typed_failure_keeps_own_type() {
        let f = fixture(multi());
        f.channel
            .push(LogicFailure::new("x").with_type("OWN_ERROR").into(), false);
        assert_eq!(f.host.dispatched_types(), vec!["OWN_ERROR"]);
    }

    #[test]
    fn intercepted_action_ignores_success_type() {
        let f = fixture(LogicSpec::new("FOO").success_type("BAR").process(|_| Ok(json!(0))));
        f.channel
            .push(Item::Intercepted(Action::new("CHANGED")).into(), true);
        assert_eq!(f.host.dispatched_types(), vec!["CHANGED"]);
    }

    #[test]
    fn action_shaped_value_is_dispatched() {
        let f = fixture(multi());
        f.channel
            .push(json!({"type": "SHAPED", "payload": 1}).into(), false);
        f.channel.push(json!(5).into(), false);
        assert_eq!(
            f.host.dispatched_types(),
            vec!["SHAPED", UNHANDLED_LOGIC_ERROR]
        );
    }

    #[test]
    fn null_value_without_success_type_is_skipped() {
        let f = fixture(multi());
        let mut rx = f.monitor.subscribe();
        f.channel.push(Value::Null.into(), false);
        f.channel.push(Action::new("AFTER").into(), false);
        f.channel.done();

        assert_eq!(f.host.dispatched_types(), vec!["AFTER"]);
        let ops: Vec<MonitorOp> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.op)
            .collect();
        assert_eq!(ops, vec![MonitorOp::Dispatch, MonitorOp::End]);
    }

    #[test]
    fn null_value_with_success_type_is_wrapped() {
        let f = fixture(LogicSpec::new("FOO").success_type("BAR").process(|_| Ok(json!(0))));
        f.channel.push(Value::Null.into(), false);
        assert_eq!(
            f.host.dispatched(),
            vec![Action::new("BAR").with_payload(Value::Null)]
        );
        assert!(f.channel.is_ended());
    }

    #[test]
    fn host_error_reports_dispatch_error() {
        let f = fixture(multi());
        f.host.fail_dispatch_of("BAD");
        let mut rx = f.monitor.subscribe();
        f.channel.push(Action::new("BAD").into(), false);
        assert_eq!(rx.try_recv().expect("dispatch").op, MonitorOp::Dispatch);
        assert_eq!(
            rx.try_recv().expect("dispatchError").op,
            MonitorOp::DispatchError
        );
    }

    // ── cancellation ────────────────────────────────────────────────

    #[test]
    fn cancel_ends_channel_and_drops_later_items() {
        let f = fixture(multi());
        f.signal.mark_intercept_complete();
        let mut rx = f.monitor.subscribe();
        f.channel.push(Action::new("A").into(), false);
        f.signal.cancel();
        f.channel.push(Action::new("B").into(), false);

        assert_eq!(f.host.dispatched_types(), vec!["A"]);
        let ops: Vec<MonitorOp> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.op)
            .collect();
        assert_eq!(
            ops,
            vec![MonitorOp::Dispatch, MonitorOp::DispCancelled, MonitorOp::End]
        );
        assert!(f.ended.load(Ordering::SeqCst));
    }

    // ── async sources ───────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn future_source_dispatches_then_ends() {
        let f = fixture(LogicSpec::new("FOO").process(|_| Ok(json!(0))));
        f.channel.push(
            Dispatchable::future(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, LogicFailure>(Action::new("LATER"))
            }),
            false,
        );
        assert!(!f.channel.is_ended(), "source still running");
        f.signal.resolved().await;
        assert_eq!(f.host.dispatched_types(), vec!["LATER"]);
        assert!(f.channel.is_ended());
    }

    #[tokio::test]
    async fn stream_source_dispatches_in_order() {
        let f = fixture(multi());
        f.channel.push(
            Dispatchable::stream(stream::iter(vec![
                Ok::<_, LogicFailure>(Action::new("ONE")),
                Ok(Action::new("TWO")),
            ])),
            false,
        );
        f.channel.done();
        f.signal.resolved().await;
        assert_eq!(f.host.dispatched_types(), vec!["ONE", "TWO"]);
        assert!(f.channel.is_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_pending_future() {
        let f = fixture(multi());
        f.channel.push(
            Dispatchable::future(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, LogicFailure>(Action::new("NEVER"))
            }),
            false,
        );
        f.signal.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(f.host.dispatched().is_empty());
        assert!(f.channel.is_ended());
    }
}
