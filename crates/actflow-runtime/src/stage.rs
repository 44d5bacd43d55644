//! Stage: one logic unit's place in the pipeline.
//!
//! For every action reaching the stage:
//!
//! 1. If it is a cancel source (cancel type, or own type with
//!    `latest`), every in-flight occurrence of this stage is cancelled.
//! 2. If it does not match the unit's type, it is forwarded untouched.
//! 3. Otherwise it is consumed: debounce (trailing), then throttle
//!    (leading), then a new occurrence starts.
//!
//! Occurrences without an intercept hook skip the intercept runner but
//! report the same `begin`, `next` sequence.

use crate::channel::DispatchChannel;
use crate::host::{Host, HostState};
use crate::intercept::Occurrence;
use crate::middleware::Emitter;
use actflow_event::{CancelSignal, Monitor, MonitorEvent};
use actflow_hook::{Deps, ExecutionContext, LogicUnit};
use actflow_types::Action;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// What every stage of one middleware shares.
#[derive(Clone)]
pub(crate) struct StageEnv {
    pub(crate) monitor: Monitor,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) deps: Arc<RwLock<Deps>>,
}

pub(crate) struct Stage {
    unit: Arc<LogicUnit>,
    name: Arc<str>,
    env: StageEnv,
    in_flight: Mutex<HashMap<u64, CancelSignal>>,
    next_id: AtomicU64,
    debounce_seq: AtomicU64,
    throttle_until: Mutex<Option<Instant>>,
    this: Weak<Stage>,
}

impl Stage {
    pub(crate) fn new(unit: Arc<LogicUnit>, index: usize, env: StageEnv) -> Arc<Self> {
        let name: Arc<str> = Arc::from(unit.display_name(index));
        Arc::new_cyclic(|this| Self {
            unit,
            name,
            env,
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            debounce_seq: AtomicU64::new(0),
            throttle_until: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Handles one action arriving at this stage.
    pub(crate) fn handle(&self, action: Action, emitter: Emitter) {
        if self.unit.is_cancelled_by(&action.action_type) {
            self.cancel_in_flight(&action);
        }

        if !self.unit.matches(&action.action_type) {
            emitter.forward(action);
            return;
        }

        let debounce_ms = self.unit.debounce_ms();
        if debounce_ms == 0 {
            self.throttle(action, emitter);
            return;
        }

        let seq = self.debounce_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(stage) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
            if stage.debounce_seq.load(Ordering::SeqCst) == seq {
                stage.throttle(action, emitter);
            } else {
                tracing::debug!(logic = %stage.name, action = %action, "debounced");
            }
        });
    }

    fn throttle(&self, action: Action, emitter: Emitter) {
        let throttle_ms = self.unit.throttle_ms();
        if throttle_ms > 0 {
            let now = Instant::now();
            let mut until = self.throttle_until.lock();
            if until.is_some_and(|end| now < end) {
                tracing::debug!(logic = %self.name, action = %action, "throttled");
                return;
            }
            *until = Some(now + Duration::from_millis(throttle_ms));
        }
        self.start(action, emitter);
    }

    fn cancel_in_flight(&self, cause: &Action) {
        let signals: Vec<CancelSignal> = self.in_flight.lock().values().cloned().collect();
        if !signals.is_empty() {
            tracing::debug!(
                logic = %self.name,
                cause = %cause,
                count = signals.len(),
                "cancelling in-flight occurrences"
            );
        }
        for signal in signals {
            signal.cancel();
        }
    }

    /// Starts a new occurrence of the unit for `action`.
    fn start(&self, action: Action, emitter: Emitter) {
        let env = &self.env;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let signal = CancelSignal::new(action.clone(), self.name.as_ref(), env.monitor.clone());

        env.monitor.emit(MonitorEvent::begin(&action, &self.name));
        self.in_flight.lock().insert(id, signal.clone());
        let _ = signal.spawn_watchdog(Duration::from_millis(self.unit.warn_timeout_ms()));

        let ctx = ExecutionContext::new(
            action.clone(),
            Arc::clone(&self.name),
            Arc::new(HostState(Arc::clone(&env.host))),
            env.deps.read().clone(),
            signal.clone(),
        );

        let stage = self.this.clone();
        let channel = DispatchChannel::new(
            Arc::clone(&self.unit),
            action.clone(),
            Arc::clone(&self.name),
            signal.clone(),
            Arc::clone(&env.host),
            env.monitor.clone(),
            Box::new(move || {
                if let Some(stage) = stage.upgrade() {
                    stage.in_flight.lock().remove(&id);
                }
            }),
        );

        let occurrence = Arc::new(Occurrence {
            unit: Arc::clone(&self.unit),
            name: Arc::clone(&self.name),
            action: action.clone(),
            ctx,
            channel,
            emitter,
            monitor: env.monitor.clone(),
        });

        match self.unit.intercept() {
            Some(hook) => occurrence.intercept(hook),
            None => {
                env.monitor
                    .emit(MonitorEvent::next(&action, &self.name, &action, true));
                signal.mark_intercept_complete();
                occurrence.emitter.forward(action);
                if self.unit.process().is_some() {
                    tokio::spawn(async move {
                        let ctx = occurrence.ctx.clone();
                        occurrence.process(ctx);
                    });
                } else {
                    occurrence.channel.close_input();
                }
            }
        }
    }
}
