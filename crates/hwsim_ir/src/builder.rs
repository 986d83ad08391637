//! Population API for front ends.
//!
//! [`ComponentBuilder`] assembles a [`ComponentType`] field by field and
//! hands back each field's structural index, so process bodies can be written
//! against the indices directly:
//!
//! ```
//! use hwsim_ir::{BinOp, ComponentBuilder, Expr, Stmt};
//!
//! let mut b = ComponentBuilder::new("Adder");
//! let a = b.input("a", 8);
//! let x = b.input("b", 8);
//! let sum = b.output("sum", 9);
//! b.comb(
//!     "add",
//!     vec![Stmt::assign(
//!         Expr::field(sum),
//!         Expr::bin(Expr::field(a), BinOp::Add, Expr::field(x)),
//!     )],
//! );
//! let adder = b.build();
//! assert_eq!(adder.name(), Some("Adder"));
//! ```

use crate::analysis::derive_sensitivity;
use crate::expr::{Expr, Keyword};
use crate::field::{Bind, Direction, Field, FieldKind};
use crate::function::{Function, Param, ProcessKind, ProcessMeta};
use crate::stmt::Stmt;
use crate::types::{ComponentType, DataType};

/// Incrementally builds a component type.
#[derive(Debug)]
pub struct ComponentBuilder {
    comp: ComponentType,
    base_index: u32,
}

impl ComponentBuilder {
    /// Starts a component with no super type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            comp: ComponentType::new(name),
            base_index: 0,
        }
    }

    /// Inherits from `super_name`, whose flattened list holds
    /// `super_field_count` fields. New fields are numbered after them.
    pub fn extends(mut self, super_name: impl Into<String>, super_field_count: u32) -> Self {
        self.comp.body.super_type = Some(Box::new(DataType::named(super_name)));
        self.base_index = super_field_count;
        self
    }

    fn next_index(&self) -> u32 {
        self.base_index + self.comp.body.fields.len() as u32
    }

    /// Adds a field and returns its structural index.
    pub fn add(&mut self, field: Field) -> u32 {
        let index = self.next_index();
        self.comp.body.fields.push(field);
        index
    }

    /// Adds an unsigned input port.
    pub fn input(&mut self, name: &str, bits: u32) -> u32 {
        self.add(
            Field::new(name, DataType::uint(bits))
                .with_kind(FieldKind::Port)
                .with_direction(Direction::Input),
        )
    }

    /// Adds an unsigned output port.
    pub fn output(&mut self, name: &str, bits: u32) -> u32 {
        self.add(
            Field::new(name, DataType::uint(bits))
                .with_kind(FieldKind::Port)
                .with_direction(Direction::Output),
        )
    }

    /// Adds an internal unsigned signal.
    pub fn signal(&mut self, name: &str, bits: u32) -> u32 {
        self.add(Field::new(name, DataType::uint(bits)))
    }

    /// Adds a structural constant with a default value.
    pub fn constant(&mut self, name: &str, value: i128) -> u32 {
        self.add(
            Field::new(name, DataType::sint(64))
                .with_init(Expr::int(value))
                .constant(),
        )
    }

    /// Adds a child instance of the named component type.
    pub fn instance(&mut self, name: &str, type_name: &str) -> u32 {
        self.add(Field::new(name, DataType::named(type_name)))
    }

    /// Adds a child instance with construction arguments.
    pub fn instance_with(&mut self, name: &str, type_name: &str, kwargs: Vec<Keyword>) -> u32 {
        self.add(Field::new(name, DataType::named(type_name)).with_kwargs(kwargs))
    }

    /// Adds a port of an arbitrary type (protocol, `GetIf`, `PutIf`, ...).
    pub fn port(&mut self, name: &str, datatype: DataType) -> u32 {
        self.add(Field::new(name, datatype).with_kind(FieldKind::Port))
    }

    /// Adds an export of an arbitrary type.
    pub fn export(&mut self, name: &str, datatype: DataType) -> u32 {
        self.add(Field::new(name, datatype).with_kind(FieldKind::Export))
    }

    /// Declares `lhs <- rhs`.
    pub fn bind(&mut self, lhs: Expr, rhs: Expr) -> &mut Self {
        self.comp.bind_map.push(Bind::new(lhs, rhs));
        self
    }

    /// Adds a sync process clocked by field `clock`, optionally reset by
    /// field `reset`.
    pub fn sync(&mut self, name: &str, clock: u32, reset: Option<u32>, body: Vec<Stmt>) -> &mut Self {
        let mut f = Function::new(name);
        f.body = body;
        f.metadata = Some(ProcessMeta {
            kind: ProcessKind::Sync,
            clock: Some(Expr::field(clock)),
            reset: reset.map(Expr::field),
            sensitivity: Vec::new(),
        });
        self.comp.sync_processes.push(f);
        self
    }

    /// Adds a comb process whose sensitivity is derived from the body.
    pub fn comb(&mut self, name: &str, body: Vec<Stmt>) -> &mut Self {
        let sensitivity = derive_sensitivity(&body);
        self.comb_with(name, sensitivity, body)
    }

    /// Adds a comb process with an explicit sensitivity list.
    pub fn comb_with(&mut self, name: &str, sensitivity: Vec<Expr>, body: Vec<Stmt>) -> &mut Self {
        let mut f = Function::new(name);
        f.body = body;
        f.metadata = Some(ProcessMeta {
            kind: ProcessKind::Comb,
            clock: None,
            reset: None,
            sensitivity,
        });
        self.comp.comb_processes.push(f);
        self
    }

    /// Adds a free-running async process.
    pub fn process(&mut self, name: &str, body: Vec<Stmt>) -> &mut Self {
        let mut f = Function::new(name);
        f.body = body;
        f.is_async = true;
        f.metadata = Some(ProcessMeta {
            kind: ProcessKind::Process,
            clock: None,
            reset: None,
            sensitivity: Vec::new(),
        });
        self.comp.processes.push(f);
        self
    }

    /// Adds a plain function.
    pub fn function(&mut self, function: Function) -> &mut Self {
        self.comp.body.functions.push(function);
        self
    }

    /// Finishes the component.
    pub fn build(self) -> DataType {
        DataType::Component(self.comp)
    }
}

/// Incrementally builds a [`Function`].
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
}

impl FunctionBuilder {
    /// Starts a synchronous function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            func: Function::new(name),
        }
    }

    /// Appends an untyped parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.func.params.push(Param {
            name: name.into(),
            datatype: None,
        });
        self
    }

    /// Appends a typed parameter.
    pub fn typed_param(mut self, name: impl Into<String>, datatype: DataType) -> Self {
        self.func.params.push(Param {
            name: name.into(),
            datatype: Some(datatype),
        });
        self
    }

    /// Sets the declared return type.
    pub fn returns(mut self, datatype: DataType) -> Self {
        self.func.returns = Some(datatype);
        self
    }

    /// Marks the function as able to suspend.
    pub fn asynchronous(mut self) -> Self {
        self.func.is_async = true;
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: Vec<Stmt>) -> Self {
        self.func.body = body;
        self
    }

    /// Finishes the function.
    pub fn build(self) -> Function {
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    #[test]
    fn indices_are_contiguous() {
        let mut b = ComponentBuilder::new("C");
        assert_eq!(b.input("a", 1), 0);
        assert_eq!(b.output("b", 1), 1);
        assert_eq!(b.signal("c", 4), 2);
    }

    #[test]
    fn extends_offsets_indices() {
        let mut b = ComponentBuilder::new("D").extends("Base", 3);
        assert_eq!(b.signal("x", 1), 3);
        let dt = b.build();
        assert_eq!(
            dt.as_struct().and_then(|s| s.super_type.as_deref()),
            Some(&DataType::named("Base"))
        );
    }

    #[test]
    fn comb_sensitivity_is_derived() {
        let mut b = ComponentBuilder::new("Sum");
        let a = b.signal("a", 8);
        let x = b.signal("b", 8);
        let s = b.signal("sum", 9);
        b.comb(
            "add",
            vec![Stmt::assign(
                Expr::field(s),
                Expr::bin(Expr::field(a), BinOp::Add, Expr::field(x)),
            )],
        );
        let dt = b.build();
        let comp = dt.as_component().unwrap();
        let meta = comp.comb_processes[0].metadata.as_ref().unwrap();
        assert_eq!(meta.kind, ProcessKind::Comb);
        assert_eq!(meta.sensitivity, vec![Expr::field(a), Expr::field(x)]);
    }

    #[test]
    fn sync_records_clock_and_reset() {
        let mut b = ComponentBuilder::new("Reg");
        let clk = b.input("clock", 1);
        let rst = b.input("reset", 1);
        b.sync("tick", clk, Some(rst), vec![Stmt::Pass]);
        let dt = b.build();
        let meta = dt.as_component().unwrap().sync_processes[0]
            .metadata
            .clone()
            .unwrap();
        assert_eq!(meta.clock, Some(Expr::field(clk)));
        assert_eq!(meta.reset, Some(Expr::field(rst)));
        assert!(dt.as_component().unwrap().has_behavior());
    }

    #[test]
    fn function_builder_chain() {
        let f = FunctionBuilder::new("put")
            .param("v")
            .typed_param("w", DataType::uint(4))
            .asynchronous()
            .body(vec![Stmt::Return(None)])
            .build();
        assert_eq!(f.params.len(), 2);
        assert!(f.is_async);
        assert_eq!(f.process_kind(), None);
    }
}
