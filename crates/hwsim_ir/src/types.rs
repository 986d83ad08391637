//! The data-type algebra.
//!
//! A [`DataType`] is a tree. Named types (structs, classes, components,
//! protocols, register files, enums) live in a [`Context`](crate::Context)
//! and are referenced from other types by name through [`DataType::Ref`], so
//! a design can mention a type before it has been registered.

use crate::field::{Bind, Field};
use crate::function::Function;
use serde::{Deserialize, Serialize};

/// A fixed-width integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntType {
    /// Width in bits, at least 1. `0` marks an unsized integer whose width
    /// comes from the field's width expression.
    pub bits: u32,
    /// Two's-complement signed.
    pub signed: bool,
}

impl IntType {
    /// An unsigned integer of `bits` bits.
    pub fn unsigned(bits: u32) -> Self {
        Self { bits, signed: false }
    }

    /// A signed integer of `bits` bits.
    pub fn signed(bits: u32) -> Self {
        Self { bits, signed: true }
    }
}

/// An enumeration with explicit variant values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    /// Type name.
    pub name: String,
    /// Variant names and their values.
    pub variants: Vec<(String, i128)>,
}

/// A struct, class or component body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    /// Type name.
    pub name: String,
    /// The inherited type, usually a [`DataType::Ref`].
    pub super_type: Option<Box<DataType>>,
    /// Fields declared directly on this type. Inherited fields precede
    /// these in the flattened list.
    pub fields: Vec<Field>,
    /// Functions declared directly on this type.
    pub functions: Vec<Function>,
}

impl StructType {
    /// An empty struct body.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_type: None,
            fields: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// A function declared directly on this type.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A component: a class with binds and processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentType {
    /// Fields and plain functions.
    pub body: StructType,
    /// Declared connections, applied in order after the bind sort.
    pub bind_map: Vec<Bind>,
    /// Clocked processes.
    pub sync_processes: Vec<Function>,
    /// Combinational processes.
    pub comb_processes: Vec<Function>,
    /// Free-running async processes started with the simulation.
    pub processes: Vec<Function>,
}

impl ComponentType {
    /// An empty component.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            body: StructType::new(name),
            bind_map: Vec::new(),
            sync_processes: Vec::new(),
            comb_processes: Vec::new(),
            processes: Vec::new(),
        }
    }

    /// The component's type name.
    pub fn name(&self) -> &str {
        &self.body.name
    }

    /// Returns `true` if any sync or comb process is declared.
    pub fn has_behavior(&self) -> bool {
        !self.sync_processes.is_empty() || !self.comb_processes.is_empty()
    }
}

/// A component implemented outside the IR, referenced by an external name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternType {
    /// Its visible interface.
    pub component: ComponentType,
    /// The name the implementation is known by.
    pub extern_name: String,
}

/// An interface type: a named set of method signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolType {
    /// Type name.
    pub name: String,
    /// Method signatures. Bodies are ignored.
    pub methods: Vec<Function>,
}

fn default_memory_size() -> u64 {
    1024
}

/// An array of fixed-width elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryType {
    /// Element type, normally an [`IntType`].
    pub element_type: Box<DataType>,
    /// Number of elements.
    #[serde(default = "default_memory_size")]
    pub size: u64,
}

fn default_register_bits() -> u32 {
    32
}

/// One register in a [`RegFileType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDecl {
    /// Register name.
    pub name: String,
    /// Width in bits.
    #[serde(default = "default_register_bits")]
    pub bits: u32,
    /// Byte offset. Defaults to the slot after the previous register.
    #[serde(default)]
    pub offset: Option<u64>,
}

/// A bank of registers at byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegFileType {
    /// Type name.
    pub name: String,
    /// Registers in declaration order.
    pub registers: Vec<RegisterDecl>,
}

impl RegFileType {
    /// Resolved `(name, offset, bits)` for every register.
    ///
    /// Registers without an explicit offset take the 4-byte slot following
    /// the previous register.
    pub fn layout(&self) -> Vec<(String, u64, u32)> {
        let mut cursor = 0u64;
        self.registers
            .iter()
            .map(|r| {
                let offset = r.offset.unwrap_or(cursor);
                cursor = offset + 4;
                (r.name.clone(), offset, r.bits)
            })
            .collect()
    }
}

/// A FIFO channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelType {
    /// Element type.
    pub element_type: Box<DataType>,
    /// Capacity. `0` is unbounded.
    #[serde(default)]
    pub depth: usize,
}

/// A data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    /// Fixed-width integer.
    Int(IntType),
    /// String.
    String,
    /// Enumeration.
    Enum(EnumType),
    /// Plain data aggregate.
    Struct(StructType),
    /// Aggregate with behavior.
    Class(StructType),
    /// Hardware component.
    Component(ComponentType),
    /// Externally implemented component.
    Extern(ExternType),
    /// Interface signature set.
    Protocol(ProtocolType),
    /// Mutual-exclusion lock.
    Lock,
    /// Level event flag.
    Event,
    /// Element array.
    Memory(MemoryType),
    /// Register bank.
    RegFile(RegFileType),
    /// Byte-addressed view over mapped storage.
    AddressSpace,
    /// Base-relative accessor into an address space.
    AddrHandle,
    /// FIFO channel.
    Channel(ChannelType),
    /// The consuming end of a channel.
    GetIf {
        /// Element type.
        element_type: Box<DataType>,
    },
    /// The producing end of a channel.
    PutIf {
        /// Element type.
        element_type: Box<DataType>,
    },
    /// Fixed-size homogeneous collection.
    Tuple {
        /// Element type.
        element_type: Box<DataType>,
        /// Number of elements.
        size: usize,
    },
    /// Forward reference to a named type.
    Ref {
        /// The referenced name.
        name: String,
    },
}

impl DataType {
    /// Unsigned integer shorthand.
    pub fn uint(bits: u32) -> Self {
        DataType::Int(IntType::unsigned(bits))
    }

    /// Signed integer shorthand.
    pub fn sint(bits: u32) -> Self {
        DataType::Int(IntType::signed(bits))
    }

    /// Reference shorthand.
    pub fn named(name: impl Into<String>) -> Self {
        DataType::Ref { name: name.into() }
    }

    /// The type name for named kinds.
    pub fn name(&self) -> Option<&str> {
        match self {
            DataType::Enum(e) => Some(&e.name),
            DataType::Struct(s) | DataType::Class(s) => Some(&s.name),
            DataType::Component(c) => Some(c.name()),
            DataType::Extern(e) => Some(e.component.name()),
            DataType::Protocol(p) => Some(&p.name),
            DataType::RegFile(r) => Some(&r.name),
            _ => None,
        }
    }

    /// The struct body of struct-like kinds.
    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            DataType::Struct(s) | DataType::Class(s) => Some(s),
            DataType::Component(c) => Some(&c.body),
            DataType::Extern(e) => Some(&e.component.body),
            _ => None,
        }
    }

    /// The component, for components and externs.
    pub fn as_component(&self) -> Option<&ComponentType> {
        match self {
            DataType::Component(c) => Some(c),
            DataType::Extern(e) => Some(&e.component),
            _ => None,
        }
    }

    /// Returns `true` for components and externs.
    pub fn is_component(&self) -> bool {
        self.as_component().is_some()
    }

    /// Bit width of integer types.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            DataType::Int(i) => Some(i.bits),
            _ => None,
        }
    }

    /// Calls `f` on every directly nested type.
    pub fn for_each_child(&self, mut f: impl FnMut(&DataType)) {
        match self {
            DataType::Struct(s) | DataType::Class(s) => visit_struct(s, &mut f),
            DataType::Component(c) => visit_struct(&c.body, &mut f),
            DataType::Extern(e) => visit_struct(&e.component.body, &mut f),
            DataType::Memory(m) => f(&m.element_type),
            DataType::Channel(c) => f(&c.element_type),
            DataType::GetIf { element_type }
            | DataType::PutIf { element_type }
            | DataType::Tuple { element_type, .. } => f(element_type),
            _ => {}
        }
    }
}

fn visit_struct(s: &StructType, f: &mut impl FnMut(&DataType)) {
    if let Some(sup) = &s.super_type {
        f(sup);
    }
    for field in &s.fields {
        f(&field.datatype);
    }
}
