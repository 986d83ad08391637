//! Signal change observation.
//!
//! The engine reports every committed or immediate change of a signal field
//! to an installed [`SignalTracer`]. How changes are persisted is up to the
//! implementation; [`MemoryTracer`] keeps them for inspection and
//! [`LogTracer`] forwards them to the `log` facade.

use crate::time::SimTime;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Receives signal declarations and value changes.
pub trait SignalTracer {
    /// Declares a signal. Called once per signal field when the simulation
    /// starts.
    fn register_signal(&mut self, path: &str, name: &str, width: u32, is_input: bool);

    /// Records a change of a declared signal.
    fn signal_change(
        &mut self,
        path: &str,
        name: &str,
        time: SimTime,
        old: &Value,
        new: &Value,
        width: u32,
    );
}

/// A declared signal.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedSignal {
    /// Instance path.
    pub path: String,
    /// Field name.
    pub name: String,
    /// Width in bits.
    pub width: u32,
    /// Declared as an input.
    pub is_input: bool,
}

/// A recorded change.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedChange {
    /// Time of the change.
    pub time: SimTime,
    /// `path.name` of the signal.
    pub signal: String,
    /// Value before.
    pub old: Value,
    /// Value after.
    pub new: Value,
}

#[derive(Debug, Default)]
struct TraceLog {
    signals: Vec<TracedSignal>,
    changes: Vec<TracedChange>,
}

/// Records everything in memory. Clones share the same record, so a test
/// can keep one clone and hand the other to the simulation.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracer {
    log: Rc<RefCell<TraceLog>>,
}

impl MemoryTracer {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared signals in registration order.
    pub fn signals(&self) -> Vec<TracedSignal> {
        self.log.borrow().signals.clone()
    }

    /// Changes in the order they happened.
    pub fn changes(&self) -> Vec<TracedChange> {
        self.log.borrow().changes.clone()
    }

    /// Changes of one signal, given as `path.name`.
    pub fn changes_of(&self, signal: &str) -> Vec<TracedChange> {
        self.log
            .borrow()
            .changes
            .iter()
            .filter(|c| c.signal == signal)
            .cloned()
            .collect()
    }
}

impl SignalTracer for MemoryTracer {
    fn register_signal(&mut self, path: &str, name: &str, width: u32, is_input: bool) {
        self.log.borrow_mut().signals.push(TracedSignal {
            path: path.to_string(),
            name: name.to_string(),
            width,
            is_input,
        });
    }

    fn signal_change(
        &mut self,
        path: &str,
        name: &str,
        time: SimTime,
        old: &Value,
        new: &Value,
        _width: u32,
    ) {
        self.log.borrow_mut().changes.push(TracedChange {
            time,
            signal: format!("{path}.{name}"),
            old: old.clone(),
            new: new.clone(),
        });
    }
}

/// Logs every change at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl SignalTracer for LogTracer {
    fn register_signal(&mut self, path: &str, name: &str, width: u32, is_input: bool) {
        let dir = if is_input { "in" } else { "sig" };
        log::debug!("trace {dir} {path}.{name} [{width}]");
    }

    fn signal_change(
        &mut self,
        path: &str,
        name: &str,
        time: SimTime,
        old: &Value,
        new: &Value,
        _width: u32,
    ) {
        log::info!("{time}: {path}.{name} {old} -> {new}");
    }
}
