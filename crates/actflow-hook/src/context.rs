//! Execution context handed to every hook.
//!
//! One [`ExecutionContext`] is created per action occurrence and shared
//! by that occurrence's intercept and process hooks.
//!
//! # Shared scratch space
//!
//! [`SharedCtx`] is a mutable map that the intercept hook can fill and
//! the process hook can read. It is fresh for every occurrence.
//!
//! # Dependencies
//!
//! [`Deps`] carries user-injected values (API clients, config, ...).
//! The context holds a snapshot taken when the occurrence starts, so
//! deps added later are only visible to later occurrences.

use crate::LogicError;
use actflow_event::CancelSignal;
use actflow_types::Action;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reads the host's current state.
pub trait StateSource: Send + Sync {
    /// Returns a snapshot of the current state.
    fn state(&self) -> Value;
}

impl<F> StateSource for F
where
    F: Fn() -> Value + Send + Sync,
{
    fn state(&self) -> Value {
        self()
    }
}

/// Per-occurrence scratch map shared between intercept and process.
#[derive(Clone, Default)]
pub struct SharedCtx {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl SharedCtx {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the value at `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    /// Stores `value` at `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.lock().insert(key.into(), value)
    }

    /// Removes `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Returns a copy of the whole map.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.lock().clone()
    }
}

impl fmt::Debug for SharedCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedCtx").field(&*self.inner.lock()).finish()
    }
}

/// A type-erased dependency value.
pub type Dep = Arc<dyn Any + Send + Sync>;

type SameValue = fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> bool;

fn same_value<T: Any + PartialEq>(a: &(dyn Any + Send + Sync), b: &(dyn Any + Send + Sync)) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[derive(Clone)]
struct DepEntry {
    value: Dep,
    same: Option<SameValue>,
}

impl DepEntry {
    /// Same allocation, or equal values when the entry was added with
    /// [`Deps::with_value`].
    fn accepts(&self, other: &DepEntry) -> bool {
        if Arc::as_ptr(&self.value).cast::<()>() == Arc::as_ptr(&other.value).cast::<()>() {
            return true;
        }
        self.same
            .is_some_and(|same| same(self.value.as_ref(), other.value.as_ref()))
    }
}

/// Named dependencies injected into hooks.
///
/// Values are stored as `Arc<dyn Any>` and read back with a typed
/// [`get`](Deps::get). Re-adding a key is accepted when it holds the
/// same shared value; values added with [`with_value`](Deps::with_value)
/// are also accepted when equal.
#[derive(Clone, Default)]
pub struct Deps {
    entries: HashMap<String, DepEntry>,
}

impl Deps {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `key`, replacing any previous value.
    ///
    /// Compared by identity on merge. Use [`with_value`](Self::with_value)
    /// for plain data that should merge when equal.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(self, key: impl Into<String>, value: T) -> Self {
        self.with_shared(key, Arc::new(value))
    }

    /// Adds `value` under `key`, compared by equality on merge.
    #[must_use]
    pub fn with_value<T: Any + Send + Sync + PartialEq>(
        mut self,
        key: impl Into<String>,
        value: T,
    ) -> Self {
        self.entries.insert(
            key.into(),
            DepEntry {
                value: Arc::new(value),
                same: Some(same_value::<T>),
            },
        );
        self
    }

    /// Adds an already shared value under `key`.
    #[must_use]
    pub fn with_shared(mut self, key: impl Into<String>, value: Dep) -> Self {
        self.entries
            .insert(key.into(), DepEntry { value, same: None });
        self
    }

    /// Returns the value at `key` if it has type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|entry| Arc::clone(&entry.value).downcast::<T>().ok())
    }

    /// Returns the type-erased value at `key`.
    #[must_use]
    pub fn get_shared(&self, key: &str) -> Option<&Dep> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Merges `other` into `self`.
    ///
    /// Re-adding the same shared value, or an equal
    /// [`with_value`](Self::with_value) value, under an existing key is a
    /// no-op. Anything else under an existing key fails with
    /// [`LogicError::DepConflict`] and leaves `self` unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`LogicError::DepConflict`] naming the first conflicting key.
    pub fn merge(&mut self, other: &Deps) -> Result<(), LogicError> {
        for (key, entry) in &other.entries {
            if let Some(existing) = self.entries.get(key) {
                if !existing.accepts(entry) {
                    return Err(LogicError::DepConflict { key: key.clone() });
                }
            }
        }
        for (key, entry) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_insert_with(|| entry.clone());
        }
        Ok(())
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Deps").field("keys", &keys).finish()
    }
}

/// Everything a hook can see about the occurrence it runs for.
#[derive(Clone)]
pub struct ExecutionContext {
    /// The action being processed.
    pub action: Action,
    name: Arc<str>,
    state: Arc<dyn StateSource>,
    deps: Deps,
    ctx: SharedCtx,
    cancelled: CancelSignal,
}

impl ExecutionContext {
    /// Creates a context with a fresh [`SharedCtx`].
    #[must_use]
    pub fn new(
        action: Action,
        name: impl Into<Arc<str>>,
        state: Arc<dyn StateSource>,
        deps: Deps,
        cancelled: CancelSignal,
    ) -> Self {
        Self {
            action,
            name: name.into(),
            state,
            deps,
            ctx: SharedCtx::new(),
            cancelled,
        }
    }

    /// Returns the same context carrying a different action.
    ///
    /// The shared ctx, deps and signal are kept.
    #[must_use]
    pub fn with_action(&self, action: Action) -> Self {
        Self {
            action,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Name of the logic unit running this occurrence.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the host's current state.
    #[must_use]
    pub fn state(&self) -> Value {
        self.state.state()
    }

    /// The occurrence's scratch map.
    #[must_use]
    pub fn ctx(&self) -> &SharedCtx {
        &self.ctx
    }

    /// Dependency snapshot.
    #[must_use]
    pub fn deps(&self) -> &Deps {
        &self.deps
    }

    /// Typed dependency lookup.
    #[must_use]
    pub fn dep<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.deps.get(key)
    }

    /// The occurrence's cancellation signal.
    #[must_use]
    pub fn cancelled(&self) -> &CancelSignal {
        &self.cancelled
    }

    /// Returns `true` once the occurrence has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("action", &self.action)
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
