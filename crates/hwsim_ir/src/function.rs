//! Functions and process metadata.

use crate::expr::Expr;
use crate::stmt::Stmt;
use crate::types::DataType;
use serde::{Deserialize, Serialize};

/// How a function is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    /// Re-evaluated when a sensitivity field changes. Writes are immediate.
    Comb,
    /// Evaluated on a clock or reset edge. Writes are deferred to commit.
    Sync,
    /// A free-running task started with the simulation.
    Process,
}

/// Scheduling metadata for a process function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMeta {
    /// Process kind.
    pub kind: ProcessKind,
    /// Clock field reference (sync only).
    pub clock: Option<Expr>,
    /// Reset field reference (sync only).
    pub reset: Option<Expr>,
    /// Fields whose changes re-trigger the process (comb only).
    pub sensitivity: Vec<Expr>,
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Name.
    pub name: String,
    /// Declared type, if any.
    pub datatype: Option<DataType>,
}

/// A function or process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Name, unique within the owning type.
    pub name: String,
    /// Parameters, excluding the implicit instance.
    pub params: Vec<Param>,
    /// Body.
    pub body: Vec<Stmt>,
    /// Declared return type.
    pub returns: Option<DataType>,
    /// May suspend.
    pub is_async: bool,
    /// Present on process functions.
    pub metadata: Option<ProcessMeta>,
}

impl Function {
    /// An empty synchronous function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            body: Vec::new(),
            returns: None,
            is_async: false,
            metadata: None,
        }
    }

    /// The process kind, if this is a process.
    pub fn process_kind(&self) -> Option<ProcessKind> {
        self.metadata.as_ref().map(|m| m.kind)
    }

    /// Position of a parameter by name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}
