//! Logic middleware: the ordered pipeline of stages plus runtime controls.
//!
//! # Lifecycle
//!
//! ```text
//! LogicMiddleware::new(units, deps)
//!        │ bind(host)          second, different host → MultipleHosts
//!        ▼
//! BoundMiddleware
//!        │ connect(next)       builds the stages
//!        ▼
//! MiddlewareFn::call(action) → top → stage 0 → stage 1 → … → next(action) → bottom
//! ```
//!
//! # Runtime controls
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`add_deps`](LogicMiddleware::add_deps) | merge deps, no silent override |
//! | [`add_logic`](LogicMiddleware::add_logic) | append stages, in-flight work untouched |
//! | [`merge_new_logic`](LogicMiddleware::merge_new_logic) | `add_logic` for units not yet registered |
//! | [`replace_logic`](LogicMiddleware::replace_logic) | new pipeline generation, naming restarts at 0 |
//! | [`when_complete`](LogicMiddleware::when_complete) | wait for the pending counter to reach zero |
//!
//! # Generations
//!
//! Every forward carries the generation it started in. After
//! `replace_logic`, forwards from the previous generation are dropped
//! when they try to continue; their dispatch channels still run to `end`.
//!
//! # Error Handling
//!
//! | Error | Code | When |
//! |-------|------|------|
//! | [`LogicError::DuplicateLogic`] | `LOGIC_DUPLICATE` | same unit registered twice |
//! | [`LogicError::MultipleHosts`] | `LOGIC_MULTIPLE_HOSTS` | second host bound |
//! | [`LogicError::DepConflict`] | `LOGIC_DEP_CONFLICT` | dep key re-added with another value |
//!
//! Errors from the host or the continuation are logged and reported on
//! the monitor; they never reach the caller of [`MiddlewareFn::call`].

use crate::host::{same_host, Host, Next};
use crate::stage::{Stage, StageEnv};
use actflow_event::{Monitor, MonitorEvent};
use actflow_hook::{Deps, LogicError, LogicUnit};
use actflow_types::Action;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Returns the indexes of every unit that appears more than once.
fn find_duplicates(units: &[Arc<LogicUnit>]) -> Vec<usize> {
    units
        .iter()
        .enumerate()
        .filter(|(i, a)| {
            units
                .iter()
                .enumerate()
                .any(|(j, b)| *i != j && Arc::ptr_eq(a, b))
        })
        .map(|(i, _)| i)
        .collect()
}

fn check_duplicates(units: &[Arc<LogicUnit>]) -> Result<(), LogicError> {
    let indexes = find_duplicates(units);
    if indexes.is_empty() {
        Ok(())
    } else {
        Err(LogicError::DuplicateLogic { indexes })
    }
}

struct Registry {
    units: Vec<Arc<LogicUnit>>,
    logic_count: usize,
}

#[derive(Default)]
struct Pipeline {
    generation: u64,
    stages: Vec<Arc<Stage>>,
}

struct Inner {
    monitor: Monitor,
    deps: Arc<RwLock<Deps>>,
    registry: Mutex<Registry>,
    host: Mutex<Option<Arc<dyn Host>>>,
    next: Mutex<Option<Arc<dyn Next>>>,
    pipeline: RwLock<Pipeline>,
}

impl Inner {
    fn env(&self) -> Option<StageEnv> {
        let host = self.host.lock().clone()?;
        Some(StageEnv {
            monitor: self.monitor.clone(),
            host,
            deps: Arc::clone(&self.deps),
        })
    }

    fn is_connected(&self) -> bool {
        self.next.lock().is_some()
    }

    /// Rebuilds the pipeline from the registry as a new generation.
    /// Does nothing until the continuation is connected.
    fn rebuild(&self, registry: &mut Registry) {
        if !self.is_connected() {
            return;
        }
        let Some(env) = self.env() else {
            return;
        };
        let stages = registry
            .units
            .iter()
            .enumerate()
            .map(|(index, unit)| Stage::new(Arc::clone(unit), index, env.clone()))
            .collect::<Vec<_>>();
        registry.logic_count = stages.len();

        let mut pipeline = self.pipeline.write();
        pipeline.generation += 1;
        pipeline.stages = stages;
        tracing::debug!(
            generation = pipeline.generation,
            stages = pipeline.stages.len(),
            "logic pipeline built"
        );
    }

    /// Hands an action that passed every stage to the continuation.
    fn finish(&self, action: Action) {
        let Some(next) = self.next.lock().clone() else {
            tracing::warn!(action = %action, "no continuation connected, action dropped");
            return;
        };
        if let Err(err) = next.next(action.clone()) {
            tracing::error!(
                action = %action,
                error = %err,
                "error in middleware downstream of logic"
            );
            self.monitor
                .emit(MonitorEvent::next_error(&action, err.to_string()));
        }
        self.monitor.emit(MonitorEvent::bottom(&action));
    }
}

/// Continues an action at a given stage of a given generation.
#[derive(Clone)]
pub(crate) struct Emitter {
    inner: Arc<Inner>,
    generation: u64,
    index: usize,
}

impl Emitter {
    /// Sends `action` to the stage this emitter points at, or to the
    /// continuation past the last stage.
    pub(crate) fn forward(&self, action: Action) {
        let stage = {
            let pipeline = self.inner.pipeline.read();
            if pipeline.generation != self.generation {
                tracing::debug!(
                    action = %action,
                    generation = self.generation,
                    current = pipeline.generation,
                    "forward from replaced logic dropped"
                );
                return;
            }
            pipeline.stages.get(self.index).cloned()
        };

        match stage {
            Some(stage) => stage.handle(
                action,
                Emitter {
                    inner: Arc::clone(&self.inner),
                    generation: self.generation,
                    index: self.index + 1,
                },
            ),
            None => self.inner.finish(action),
        }
    }
}

/// Logic middleware before it is bound to a host.
///
/// Cloning is cheap; clones control the same middleware.
#[derive(Clone)]
pub struct LogicMiddleware {
    inner: Arc<Inner>,
}

impl LogicMiddleware {
    /// Creates a middleware running `units` in order.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::DuplicateLogic`] if the same unit appears
    /// more than once.
    pub fn new(units: Vec<Arc<LogicUnit>>, deps: Deps) -> Result<Self, LogicError> {
        check_duplicates(&units)?;
        Ok(Self {
            inner: Arc::new(Inner {
                monitor: Monitor::new(),
                deps: Arc::new(RwLock::new(deps)),
                registry: Mutex::new(Registry {
                    units,
                    logic_count: 0,
                }),
                host: Mutex::new(None),
                next: Mutex::new(None),
                pipeline: RwLock::new(Pipeline::default()),
            }),
        })
    }

    /// Binds the middleware to its host.
    ///
    /// Binding the same host again is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::MultipleHosts`] for a different host.
    pub fn bind(&self, host: Arc<dyn Host>) -> Result<BoundMiddleware, LogicError> {
        let mut bound = self.inner.host.lock();
        match bound.as_ref() {
            Some(existing) if !same_host(existing, &host) => {
                return Err(LogicError::MultipleHosts);
            }
            Some(_) => {}
            None => *bound = Some(host),
        }
        Ok(BoundMiddleware {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Subscribes to monitor events published from now on.
    #[must_use]
    pub fn monitor(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.monitor.subscribe()
    }

    /// Current value of the pending counter.
    #[must_use]
    pub fn pending(&self) -> i64 {
        self.inner.monitor.pending()
    }

    /// Number of units in the running pipeline.
    #[must_use]
    pub fn logic_count(&self) -> usize {
        self.inner.registry.lock().logic_count
    }

    /// Registered units, in pipeline order.
    #[must_use]
    pub fn units(&self) -> Vec<Arc<LogicUnit>> {
        self.inner.registry.lock().units.clone()
    }

    /// Snapshot of the current deps.
    #[must_use]
    pub fn deps(&self) -> Deps {
        self.inner.deps.read().clone()
    }

    /// Merges `deps` into the shared deps.
    ///
    /// Occurrences started afterwards see the new keys.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::DepConflict`] if a key already holds a
    /// different value. Nothing is merged in that case. Values added with
    /// [`Deps::with`] are compared by identity, values added with
    /// [`Deps::with_value`] by equality.
    pub fn add_deps(&self, deps: Deps) -> Result<(), LogicError> {
        self.inner.deps.write().merge(&deps)
    }

    /// Appends `units` to the pipeline and returns the new logic count.
    ///
    /// In-flight occurrences are untouched; their forwards continue
    /// through the appended stages.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::DuplicateLogic`] if the combined list has a
    /// unit more than once. Indexes refer to the combined list.
    pub fn add_logic(&self, units: Vec<Arc<LogicUnit>>) -> Result<usize, LogicError> {
        let mut registry = self.inner.registry.lock();
        let combined: Vec<Arc<LogicUnit>> =
            registry.units.iter().chain(units.iter()).cloned().collect();
        check_duplicates(&combined)?;

        if self.inner.is_connected() {
            if let Some(env) = self.inner.env() {
                let start = registry.logic_count;
                let stages: Vec<Arc<Stage>> = units
                    .iter()
                    .enumerate()
                    .map(|(i, unit)| Stage::new(Arc::clone(unit), start + i, env.clone()))
                    .collect();
                registry.logic_count += stages.len();
                self.inner.pipeline.write().stages.extend(stages);
            }
        }
        registry.units = combined;
        tracing::debug!(
            added = units.len(),
            logic_count = registry.logic_count,
            "logic added"
        );
        Ok(registry.logic_count)
    }

    /// Adds only the units that are not registered yet.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::DuplicateLogic`] if `units` itself has a
    /// unit more than once.
    pub fn merge_new_logic(&self, units: Vec<Arc<LogicUnit>>) -> Result<usize, LogicError> {
        check_duplicates(&units)?;
        let fresh: Vec<Arc<LogicUnit>> = {
            let registry = self.inner.registry.lock();
            units
                .into_iter()
                .filter(|unit| !registry.units.iter().any(|u| Arc::ptr_eq(u, unit)))
                .collect()
        };
        self.add_logic(fresh)
    }

    /// Replaces every unit with `units` and returns the new logic count.
    ///
    /// Auto-generated names restart at index 0. Forwards still running in
    /// the replaced pipeline are dropped; their dispatch channels still
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::DuplicateLogic`] if `units` has a unit more
    /// than once.
    pub fn replace_logic(&self, units: Vec<Arc<LogicUnit>>) -> Result<usize, LogicError> {
        check_duplicates(&units)?;
        let mut registry = self.inner.registry.lock();
        registry.units = units;
        registry.logic_count = 0;
        self.inner.rebuild(&mut registry);
        tracing::debug!(logic_count = registry.logic_count, "logic replaced");
        Ok(registry.logic_count)
    }

    /// Resolves once the pending counter is zero.
    pub fn when_complete(&self) -> impl Future<Output = ()> + Send + 'static {
        let monitor = self.inner.monitor.clone();
        async move { monitor.when_idle().await }
    }

    /// Runs `f` once the pending counter is zero and returns its result.
    pub async fn when_complete_then<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.when_complete().await;
        f()
    }
}

impl fmt::Debug for LogicMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicMiddleware")
            .field("logic_count", &self.logic_count())
            .field("pending", &self.pending())
            .field("deps", &*self.inner.deps.read())
            .finish_non_exhaustive()
    }
}

/// A middleware bound to its host, waiting for the continuation.
pub struct BoundMiddleware {
    inner: Arc<Inner>,
}

impl BoundMiddleware {
    /// Connects the continuation and builds the pipeline.
    #[must_use]
    pub fn connect(self, next: impl Next + 'static) -> MiddlewareFn {
        *self.inner.next.lock() = Some(Arc::new(next));
        {
            let mut registry = self.inner.registry.lock();
            self.inner.rebuild(&mut registry);
        }
        MiddlewareFn { inner: self.inner }
    }
}

impl fmt::Debug for BoundMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMiddleware").finish_non_exhaustive()
    }
}

/// The connected middleware. Feed actions in with [`call`](Self::call).
///
/// Must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct MiddlewareFn {
    inner: Arc<Inner>,
}

impl MiddlewareFn {
    /// Runs `action` through every stage and on to the continuation.
    ///
    /// Returns `action` unchanged. Asynchronous work started by logic
    /// keeps running after this returns.
    pub fn call(&self, action: Action) -> Action {
        self.inner.monitor.emit(MonitorEvent::top(&action));
        let generation = self.inner.pipeline.read().generation;
        Emitter {
            inner: Arc::clone(&self.inner),
            generation,
            index: 0,
        }
        .forward(action.clone());
        action
    }

    /// Returns a control handle for the same middleware.
    #[must_use]
    pub fn controls(&self) -> LogicMiddleware {
        LogicMiddleware {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for MiddlewareFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareFn")
            .field("generation", &self.inner.pipeline.read().generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actflow_hook::LogicSpec;

    fn unit(t: &str) -> Arc<LogicUnit> {
        LogicSpec::new(t).build().expect("valid logic")
    }

    #[test]
    fn duplicates_report_every_index() {
        let a = unit("A");
        let b = unit("B");
        let units = vec![Arc::clone(&a), b, Arc::clone(&a)];
        assert_eq!(find_duplicates(&units), vec![0, 2]);
    }

    #[test]
    fn identical_options_are_not_duplicates() {
        assert!(find_duplicates(&[unit("A"), unit("A")]).is_empty());
    }

    #[test]
    fn new_rejects_duplicates() {
        let a = unit("A");
        let err = LogicMiddleware::new(vec![Arc::clone(&a), a], Deps::new())
            .expect_err("duplicate");
        assert_eq!(err, LogicError::DuplicateLogic { indexes: vec![0, 1] });
    }

    #[test]
    fn add_logic_before_connect_records_units() {
        let mw = LogicMiddleware::new(vec![unit("A")], Deps::new()).expect("valid");
        assert_eq!(mw.add_logic(vec![unit("B")]).expect("added"), 0);
        assert_eq!(mw.units().len(), 2);
    }

    #[test]
    fn add_logic_rejects_combined_duplicates() {
        let a = unit("A");
        let mw = LogicMiddleware::new(vec![Arc::clone(&a)], Deps::new()).expect("valid");
        let err = mw.add_logic(vec![unit("B"), a]).expect_err("duplicate");
        assert_eq!(err, LogicError::DuplicateLogic { indexes: vec![0, 2] });
        assert_eq!(mw.units().len(), 1);
    }

    #[test]
    fn merge_new_logic_skips_registered() {
        let a = unit("A");
        let mw = LogicMiddleware::new(vec![Arc::clone(&a)], Deps::new()).expect("valid");
        mw.merge_new_logic(vec![a, unit("B")]).expect("merged");
        assert_eq!(mw.units().len(), 2);
    }

    #[test]
    fn merge_new_logic_rejects_duplicates_in_argument() {
        let b = unit("B");
        let mw = LogicMiddleware::new(vec![], Deps::new()).expect("valid");
        let err = mw
            .merge_new_logic(vec![Arc::clone(&b), b])
            .expect_err("duplicate");
        assert!(matches!(err, LogicError::DuplicateLogic { .. }));
    }

    #[test]
    fn add_deps_conflict() {
        let mw = LogicMiddleware::new(vec![], Deps::new().with("api", 1u32)).expect("valid");
        mw.add_deps(Deps::new().with("other", 2u32)).expect("new key");
        let err = mw
            .add_deps(Deps::new().with("api", 1u32))
            .expect_err("different value");
        assert_eq!(err, LogicError::DepConflict { key: "api".into() });
        assert_eq!(mw.deps().len(), 2);
    }

    #[test]
    fn add_deps_accepts_equal_value() {
        let mw = LogicMiddleware::new(vec![], Deps::new().with_value("retries", 3u32))
            .expect("valid");
        mw.add_deps(Deps::new().with_value("retries", 3u32))
            .expect("equal value");
        assert_eq!(mw.deps().get::<u32>("retries").map(|n| *n), Some(3));
    }
}
