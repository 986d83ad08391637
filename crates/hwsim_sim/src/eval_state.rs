//! Per-component signal state and the read/write commit protocol.
//!
//! Reads always observe `current`. Sync processes stage writes in `next`,
//! which [`StateCell::commit`] applies once every process of the edge has
//! run. Comb processes write `current` directly and fire the watchers of the
//! written key before the write returns.

use crate::error::SimError;
use crate::value::Value;
use hwsim_common::Ident;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A re-evaluation callback fired when a watched key changes.
pub type Watcher = Rc<dyn Fn() -> Result<(), SimError>>;

/// The state maps of one component.
#[derive(Default)]
pub struct EvalState {
    current: HashMap<Ident, Value>,
    next: HashMap<Ident, Value>,
    watchers: HashMap<Ident, Vec<Watcher>>,
}

/// A committed change: key, old value, new value.
pub type Change = (Ident, Value, Value);

/// Shared handle to an [`EvalState`].
///
/// Watchers run with no borrow held, so they may freely read and write the
/// same state.
#[derive(Clone, Default)]
pub struct StateCell(Rc<RefCell<EvalState>>);

impl StateCell {
    /// An empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value of `key`. Unwritten keys read as `0`.
    pub fn read(&self, key: Ident) -> Value {
        self.0
            .borrow()
            .current
            .get(&key)
            .cloned()
            .unwrap_or(Value::Int(0))
    }

    /// Sets the current value without notifying anyone.
    pub fn set_value(&self, key: Ident, value: Value) {
        self.0.borrow_mut().current.insert(key, value);
    }

    /// Adds a watcher on `key`.
    pub fn register_watcher(&self, key: Ident, watcher: Watcher) {
        self.0
            .borrow_mut()
            .watchers
            .entry(key)
            .or_default()
            .push(watcher);
    }

    /// Number of watchers on `key`.
    pub fn watcher_count(&self, key: Ident) -> usize {
        self.0.borrow().watchers.get(&key).map_or(0, Vec::len)
    }

    /// Stages a write for the next commit. A later staged write to the same
    /// key wins.
    pub fn write_deferred(&self, key: Ident, value: Value) {
        self.0.borrow_mut().next.insert(key, value);
    }

    /// The staged value of `key`, if any.
    pub fn staged(&self, key: Ident) -> Option<Value> {
        self.0.borrow().next.get(&key).cloned()
    }

    /// Writes `current` now. If the value changed, every watcher of `key`
    /// runs before this returns. Returns the old value when it changed.
    pub fn write_immediate(&self, key: Ident, value: Value) -> Result<Option<Value>, SimError> {
        let old = self.read(key);
        if old == value {
            return Ok(None);
        }
        self.set_value(key, value);
        self.notify(key)?;
        Ok(Some(old))
    }

    /// Runs every watcher of `key`.
    pub fn notify(&self, key: Ident) -> Result<(), SimError> {
        let watchers: Vec<Watcher> = self
            .0
            .borrow()
            .watchers
            .get(&key)
            .cloned()
            .unwrap_or_default();
        for w in watchers {
            w()?;
        }
        Ok(())
    }

    /// Applies every staged write without notifying. Returns the keys whose
    /// value actually changed.
    pub fn apply_staged(&self) -> Vec<Change> {
        let mut st = self.0.borrow_mut();
        let staged: Vec<(Ident, Value)> = st.next.drain().collect();
        let mut changes = Vec::new();
        for (key, value) in staged {
            let old = st.current.get(&key).cloned().unwrap_or(Value::Int(0));
            if old != value {
                st.current.insert(key, value.clone());
                changes.push((key, old, value));
            }
        }
        changes.sort_by_key(|(k, _, _)| *k);
        changes
    }

    /// Applies every staged write, then fires the watchers of each changed
    /// key. Returns the changes.
    pub fn commit(&self) -> Result<Vec<Change>, SimError> {
        let changes = self.apply_staged();
        for (key, _, _) in &changes {
            self.notify(*key)?;
        }
        Ok(changes)
    }

    /// Drops every staged write. `current` is left as it was.
    pub fn discard_staged(&self) {
        self.0.borrow_mut().next.clear();
    }

    /// Returns `true` while staged writes await a commit.
    pub fn has_pending(&self) -> bool {
        !self.0.borrow().next.is_empty()
    }
}

impl std::fmt::Debug for StateCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.0.borrow();
        f.debug_struct("EvalState")
            .field("current", &st.current.len())
            .field("next", &st.next.len())
            .field("watched", &st.watchers.len())
            .finish()
    }
}
