//! Structural intermediate representation for hwsim.
//!
//! A front end populates a [`Context`] with component types: fields
//! addressed by structural index, binds between them, and process bodies
//! written as [`Stmt`]/[`Expr`] trees. The elaborator turns a component type
//! from the context into a live tree; the runtime interprets the bodies.

#![warn(missing_docs)]

pub mod analysis;
pub mod arena;
pub mod builder;
pub mod context;
pub mod error;
pub mod expr;
pub mod field;
pub mod function;
pub mod ids;
pub mod stmt;
pub mod types;

pub use analysis::{analyze, contains_await, derive_sensitivity, AccessSet};
pub use arena::{Arena, ArenaId};
pub use builder::{ComponentBuilder, FunctionBuilder};
pub use context::{Context, NamedType};
pub use error::IrError;
pub use expr::{
    AugOp, BinOp, BoolOp, Builtin, CmpOp, ConstValue, Expr, FieldPath, Keyword, UnaryOp,
};
pub use field::{Bind, Direction, Field, FieldKind};
pub use function::{Function, Param, ProcessKind, ProcessMeta};
pub use ids::TypeId;
pub use stmt::{AssertionKind, MatchCase, Pattern, Stmt};
pub use types::{
    ChannelType, ComponentType, DataType, EnumType, ExternType, IntType, MemoryType,
    ProtocolType, RegFileType, RegisterDecl, StructType,
};
