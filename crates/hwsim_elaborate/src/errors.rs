//! Elaboration error types.
//!
//! Structural problems are collected while the tree is built and reported
//! together as [`ElabErrors`], so a single run names every unbound port and
//! every bad bind instead of stopping at the first.

use hwsim_ir::IrError;
use hwsim_sim::SimError;
use std::fmt;

/// A structural error found while elaborating a design.
#[derive(Debug, thiserror::Error)]
pub enum ElabError {
    /// A type reference that names no registered type.
    #[error("unresolved type '{name}' referenced by '{referenced_by}'")]
    UnresolvedType {
        /// The missing type name.
        name: String,
        /// The field or type that mentions it.
        referenced_by: String,
    },

    /// A bind that breaks a connection rule.
    #[error("bind violation in '{component}': {reason}")]
    BindViolation {
        /// Path of the instance declaring the bind.
        component: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Ports of the root instance that nothing bound.
    #[error("unbound top-level ports on '{component}': {}", ports.join(", "))]
    UnboundTopLevelPort {
        /// Path of the root instance.
        component: String,
        /// Every unbound port name.
        ports: Vec<String>,
    },

    /// An `mmap` entry that overlaps an existing region.
    #[error("region 0x{base:x}+0x{size:x} overlaps an existing mapping in '{space}'")]
    RegionOverlap {
        /// Path of the address-space field.
        space: String,
        /// Base of the rejected region.
        base: u64,
        /// Size of the rejected region.
        size: u64,
    },

    /// A reference to a field the instance does not have.
    #[error("unknown field '{field}' on '{component}'")]
    UnknownField {
        /// Instance path.
        component: String,
        /// The requested name or index.
        field: String,
    },

    /// A component that contains itself.
    #[error("recursive instantiation: {}", chain.join(" -> "))]
    RecursiveInstantiation {
        /// Type names from the outermost repeat to the inner one.
        chain: Vec<String>,
    },

    /// A type used as a component that is not one.
    #[error("type '{0}' is not a component")]
    NotAComponent(String),

    /// A field whose type, width or initial value cannot be built.
    #[error("invalid field '{field}' on '{component}': {reason}")]
    InvalidField {
        /// Instance path.
        component: String,
        /// Field name.
        field: String,
        /// What went wrong.
        reason: String,
    },

    /// A structural query on the IR failed.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// A runtime object rejected an elaboration step.
    #[error("runtime error during elaboration: {0}")]
    Runtime(#[from] SimError),
}

/// Every error of one elaboration attempt, in discovery order.
#[derive(Debug, Default)]
pub struct ElabErrors(Vec<ElabError>);

impl ElabErrors {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error.
    pub fn push(&mut self, error: ElabError) {
        self.0.push(error);
    }

    /// Number of errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &ElabError> {
        self.0.iter()
    }

    /// The recorded errors.
    pub fn into_vec(self) -> Vec<ElabError> {
        self.0
    }
}

impl From<ElabError> for ElabErrors {
    fn from(e: ElabError) -> Self {
        Self(vec![e])
    }
}

impl fmt::Display for ElabErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("no elaboration errors"),
            [one] => write!(f, "{one}"),
            many => {
                write!(f, "{} elaboration errors:", many.len())?;
                for e in many {
                    write!(f, "\n  {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ElabErrors {}

impl IntoIterator for ElabErrors {
    type Item = ElabError;
    type IntoIter = std::vec::IntoIter<ElabError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_ports_are_listed() {
        let e = ElabError::UnboundTopLevelPort {
            component: "Top".into(),
            ports: vec!["req".into(), "rsp".into()],
        };
        assert_eq!(e.to_string(), "unbound top-level ports on 'Top': req, rsp");
    }

    #[test]
    fn bind_violation_display() {
        let e = ElabError::BindViolation {
            component: "Top".into(),
            reason: "constant 'N' cannot be bound".into(),
        };
        assert_eq!(
            e.to_string(),
            "bind violation in 'Top': constant 'N' cannot be bound"
        );
    }

    #[test]
    fn overlap_and_recursion_display() {
        let e = ElabError::RegionOverlap {
            space: "Top.bus".into(),
            base: 0x100,
            size: 0x40,
        };
        assert_eq!(
            e.to_string(),
            "region 0x100+0x40 overlaps an existing mapping in 'Top.bus'"
        );
        let e = ElabError::RecursiveInstantiation {
            chain: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(e.to_string(), "recursive instantiation: A -> B -> A");
    }

    #[test]
    fn runtime_errors_wrap() {
        let e = ElabError::from(SimError::InvalidAccessSize(3));
        assert_eq!(
            e.to_string(),
            "runtime error during elaboration: invalid access size 3"
        );
    }

    #[test]
    fn error_list_display() {
        let mut errs = ElabErrors::new();
        assert_eq!(errs.to_string(), "no elaboration errors");
        errs.push(ElabError::NotAComponent("Word".into()));
        assert_eq!(errs.to_string(), "type 'Word' is not a component");
        errs.push(ElabError::UnknownField {
            component: "Top".into(),
            field: "x".into(),
        });
        assert_eq!(
            errs.to_string(),
            "2 elaboration errors:\n  type 'Word' is not a component\n  unknown field 'x' on 'Top'"
        );
        assert_eq!(errs.len(), 2);
    }
}
