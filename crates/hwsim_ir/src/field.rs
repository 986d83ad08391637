//! Fields of struct-like types and bind declarations between them.

use crate::expr::{Expr, Keyword};
use crate::types::DataType;
use serde::{Deserialize, Serialize};

/// The role a field plays on its owning type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Internal storage or a child instance.
    Field,
    /// A connection point that must be bound by the parent.
    Port,
    /// An interface offered to the parent.
    Export,
}

/// Signal direction of a port-like field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Driven from outside.
    Input,
    /// Driven from inside.
    Output,
    /// Either.
    InOut,
}

/// A named member of a struct, class or component type.
///
/// Fields are addressed by position in the owning type's flattened field
/// list, so the order of declaration is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name, unique within the owning type.
    pub name: String,
    /// The field's type.
    pub datatype: DataType,
    /// Field, port or export.
    pub kind: FieldKind,
    /// Direction for signal-like fields.
    pub direction: Option<Direction>,
    /// Initial value. For const fields this is the default parameter value.
    pub initial_value: Option<Expr>,
    /// Width evaluated against the owning instance at elaboration.
    pub width_expr: Option<Expr>,
    /// Construction arguments for a nested instance, evaluated against the
    /// owning instance.
    pub kwargs_expr: Option<Vec<Keyword>>,
    /// Structural parameter rather than a runtime signal.
    pub is_const: bool,
}

impl Field {
    /// A plain field of the given type.
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            kind: FieldKind::Field,
            direction: None,
            initial_value: None,
            width_expr: None,
            kwargs_expr: None,
            is_const: false,
        }
    }

    /// Sets the kind.
    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Sets the initial value.
    pub fn with_init(mut self, value: Expr) -> Self {
        self.initial_value = Some(value);
        self
    }

    /// Sets the width expression.
    pub fn with_width(mut self, width: Expr) -> Self {
        self.width_expr = Some(width);
        self
    }

    /// Sets the construction arguments for a nested instance.
    pub fn with_kwargs(mut self, kwargs: Vec<Keyword>) -> Self {
        self.kwargs_expr = Some(kwargs);
        self
    }

    /// Marks the field as a structural constant.
    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }

    /// Returns `true` for input ports.
    pub fn is_input(&self) -> bool {
        self.direction == Some(Direction::Input)
    }

    /// Returns `true` for output ports.
    pub fn is_output(&self) -> bool {
        self.direction == Some(Direction::Output)
    }
}

/// A declared connection `lhs <- rhs` on a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bind {
    /// The bound side: a field reference, never a literal.
    pub lhs: Expr,
    /// The source: a field, a method, a constant or an `at(...)` mapping.
    pub rhs: Expr,
}

impl Bind {
    /// Creates a bind.
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Self { lhs, rhs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntType;

    #[test]
    fn builder_chain_sets_everything() {
        let f = Field::new("data", DataType::Int(IntType::unsigned(8)))
            .with_kind(FieldKind::Port)
            .with_direction(Direction::Output)
            .with_init(Expr::int(3));
        assert_eq!(f.kind, FieldKind::Port);
        assert!(f.is_output());
        assert!(!f.is_input());
        assert_eq!(f.initial_value, Some(Expr::int(3)));
        assert!(!f.is_const);
    }

    #[test]
    fn constant_flag() {
        let f = Field::new("WIDTH", DataType::Int(IntType::signed(32))).constant();
        assert!(f.is_const);
        assert_eq!(f.direction, None);
    }
}
