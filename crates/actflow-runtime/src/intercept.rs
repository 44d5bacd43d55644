//! Intercept and process runners for one occurrence.
//!
//! ```text
//!              ┌──────── validate / transform ────────┐
//!  begin ──►   │ allow(a) / reject(a) / error / panic │
//!              └──────────────────┬───────────────────┘
//!                                 │ first verdict only
//!          ┌──────────────────────┼───────────────────────┐
//!          ▼                      ▼                       ▼
//!      filtered            next → forward(a)     nextDisp → channel(a)
//!          │                      │                       │
//!          └──────── allow && process? ───────────────────┘
//!                     yes: run process      no: close channel input
//! ```

use crate::channel::DispatchChannel;
use crate::middleware::Emitter;
use actflow_event::{Monitor, MonitorEvent};
use actflow_hook::{
    Allow, Dispatchable, Dispatcher, ExecutionContext, InterceptFlow, InterceptHook, Item,
    LogicFailure, LogicUnit, ProcessMode, Reject, UseDispatch, Verdict, VerdictSink,
};
use actflow_types::Action;
use futures::FutureExt;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One action's run through one logic unit.
pub(crate) struct Occurrence {
    pub(crate) unit: Arc<LogicUnit>,
    pub(crate) name: Arc<str>,
    pub(crate) action: Action,
    pub(crate) ctx: ExecutionContext,
    pub(crate) channel: Arc<DispatchChannel>,
    pub(crate) emitter: Emitter,
    pub(crate) monitor: Monitor,
}

impl Occurrence {
    /// Runs the intercept hook.
    pub(crate) fn intercept(self: &Arc<Self>, hook: &InterceptHook) {
        let gate = Arc::new(Gate {
            decided: AtomicBool::new(false),
            occurrence: Arc::clone(self),
        });
        let allow = Allow::new(gate.clone());
        let reject = Reject::new(gate.clone());

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            hook.invoke(self.ctx.clone(), allow, reject)
        }));
        match outcome {
            Ok(Ok(InterceptFlow::Done)) => {}
            Ok(Ok(InterceptFlow::Pending(future))) => {
                tokio::spawn(async move {
                    match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(failure)) => gate.fail(failure),
                        Err(panic) => gate.fail(panic_failure(panic.as_ref())),
                    }
                });
            }
            Ok(Err(failure)) => gate.fail(failure),
            Err(panic) => gate.fail(panic_failure(panic.as_ref())),
        }
    }

    /// Invokes the process hook and routes its result.
    pub(crate) fn process(self: &Arc<Self>, ctx: ExecutionContext) {
        let Some(hook) = self.unit.process() else {
            self.channel.close_input();
            return;
        };
        if self.ctx.is_cancelled() {
            tracing::debug!(logic = %self.name, "occurrence cancelled before process");
            return;
        }

        let dispatcher = Dispatcher::new(self.channel.clone());
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.invoke(ctx, dispatcher)));
        match outcome {
            Ok(Ok(value)) => {
                if self.unit.process_options().mode() == ProcessMode::ReturnValue {
                    if value.is_empty() {
                        self.channel.close_input();
                    } else {
                        self.channel.push(value, false);
                    }
                }
            }
            Ok(Err(failure)) => self.channel.fail(failure),
            Err(panic) => self.channel.fail(panic_failure(panic.as_ref())),
        }
    }

    /// Applies the first verdict.
    fn resolve(self: &Arc<Self>, verdict: Verdict, action: Option<Action>, use_dispatch: UseDispatch) {
        let should_process = verdict == Verdict::Allow;
        let signal = self.ctx.cancelled();

        match &action {
            None => {
                self.monitor
                    .emit(MonitorEvent::filtered(&self.action, &self.name, should_process));
                signal.mark_intercept_complete();
            }
            Some(next) => {
                let dispatch = match use_dispatch {
                    UseDispatch::Auto => next.action_type != self.action.action_type,
                    UseDispatch::Always => true,
                    UseDispatch::Never => false,
                };
                if dispatch {
                    self.monitor.emit(MonitorEvent::next_disp(
                        &self.action,
                        &self.name,
                        next,
                        should_process,
                    ));
                    signal.mark_intercept_complete();
                    self.channel
                        .push(Dispatchable::Ready(Item::Intercepted(next.clone())), true);
                } else {
                    self.monitor.emit(MonitorEvent::next(
                        &self.action,
                        &self.name,
                        next,
                        should_process,
                    ));
                    signal.mark_intercept_complete();
                    self.emitter.forward(next.clone());
                }
            }
        }

        if should_process && self.unit.process().is_some() {
            let action = action.unwrap_or_else(|| self.action.clone());
            self.process(self.ctx.with_action(action));
        } else {
            self.channel.close_input();
        }
    }
}

/// Accepts only the first verdict of an occurrence.
struct Gate {
    decided: AtomicBool,
    occurrence: Arc<Occurrence>,
}

impl Gate {
    /// Handles a failing intercept hook.
    ///
    /// Before a verdict the occurrence is filtered and the failure
    /// dispatched; afterwards the failure just goes through the channel.
    fn fail(&self, failure: LogicFailure) {
        let occurrence = &self.occurrence;
        if occurrence.ctx.is_cancelled() {
            tracing::debug!(logic = %occurrence.name, error = %failure, "intercept failed after cancel");
            return;
        }
        if self.decided.swap(true, Ordering::SeqCst) {
            occurrence.channel.fail(failure);
            return;
        }
        occurrence
            .monitor
            .emit(MonitorEvent::filtered(&occurrence.action, &occurrence.name, false));
        occurrence.ctx.cancelled().mark_intercept_complete();
        occurrence.channel.fail(failure);
        occurrence.channel.close_input();
    }
}

impl VerdictSink for Gate {
    fn deliver(&self, verdict: Verdict, action: Option<Action>, use_dispatch: UseDispatch) {
        let occurrence = &self.occurrence;
        if occurrence.ctx.is_cancelled() {
            tracing::debug!(logic = %occurrence.name, ?verdict, "verdict after cancel ignored");
            return;
        }
        if self.decided.swap(true, Ordering::SeqCst) {
            tracing::debug!(logic = %occurrence.name, ?verdict, "second verdict ignored");
            return;
        }
        occurrence.resolve(verdict, action, use_dispatch);
    }
}

fn panic_failure(panic: &(dyn Any + Send)) -> LogicFailure {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "hook panicked".to_string());
    LogicFailure::new(message)
}
