//! Runtime values manipulated by the interpreter.
//!
//! Scalars ([`Value::Int`], [`Value::Bool`], ...) compare by value. Object
//! handles ([`Handle`]) compare by identity: two handles are equal only when
//! they refer to the same runtime object.

use crate::address_space::{AddrHandle, SharedAddressSpace, SharedMemory, SharedRegFile};
use crate::channel::{Channel, GetEnd, PutEnd};
use crate::error::SimError;
use crate::event::Event;
use crate::lock::Lock;
use crate::tree::CompId;
use hwsim_ir::Builtin;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A reference to a runtime object.
#[derive(Debug, Clone)]
pub enum Handle {
    /// A component instance.
    Component(CompId),
    /// A function of a component instance.
    Method {
        /// The owning instance.
        comp: CompId,
        /// Function name.
        name: String,
    },
    /// A built-in method of an object (`chan.put`, `self.wait`).
    BoundMethod {
        /// The receiver.
        target: Box<Value>,
        /// Method name.
        name: String,
    },
    /// A built-in helper.
    Builtin(Builtin),
    /// A memory.
    Memory(SharedMemory),
    /// A register file.
    RegFile(SharedRegFile),
    /// An address space.
    AddressSpace(SharedAddressSpace),
    /// A base-relative address-space accessor.
    AddrHandle(AddrHandle),
    /// A FIFO channel.
    Channel(Channel<Value>),
    /// The get side of a channel.
    GetPort(GetEnd<Value>),
    /// The put side of a channel.
    PutPort(PutEnd<Value>),
    /// A lock.
    Lock(Lock),
    /// An event.
    Event(Event),
    /// A protocol export: method name to callable.
    Interface(Rc<BTreeMap<String, Value>>),
}

impl Handle {
    /// Short description used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Handle::Component(_) => "component",
            Handle::Method { .. } => "method",
            Handle::BoundMethod { .. } => "bound method",
            Handle::Builtin(_) => "builtin",
            Handle::Memory(_) => "memory",
            Handle::RegFile(_) => "regfile",
            Handle::AddressSpace(_) => "address space",
            Handle::AddrHandle(_) => "address handle",
            Handle::Channel(_) => "channel",
            Handle::GetPort(_) => "get port",
            Handle::PutPort(_) => "put port",
            Handle::Lock(_) => "lock",
            Handle::Event(_) => "event",
            Handle::Interface(_) => "interface",
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Handle::Component(a), Handle::Component(b)) => a == b,
            (Handle::Method { comp: a, name: n }, Handle::Method { comp: b, name: m }) => {
                a == b && n == m
            }
            (
                Handle::BoundMethod { target: a, name: n },
                Handle::BoundMethod { target: b, name: m },
            ) => a == b && n == m,
            (Handle::Builtin(a), Handle::Builtin(b)) => a == b,
            (Handle::Memory(a), Handle::Memory(b)) => Rc::ptr_eq(a, b),
            (Handle::RegFile(a), Handle::RegFile(b)) => Rc::ptr_eq(a, b),
            (Handle::AddressSpace(a), Handle::AddressSpace(b)) => Rc::ptr_eq(a, b),
            (Handle::AddrHandle(a), Handle::AddrHandle(b)) => {
                Rc::ptr_eq(a.space(), b.space()) && a.base() == b.base()
            }
            (Handle::Channel(a), Handle::Channel(b)) => a.same_channel(b),
            (Handle::GetPort(a), Handle::GetPort(b)) => a.channel().same_channel(b.channel()),
            (Handle::PutPort(a), Handle::PutPort(b)) => a.channel().same_channel(b.channel()),
            (Handle::Lock(a), Handle::Lock(b)) => a.same_lock(b),
            (Handle::Event(a), Handle::Event(b)) => a.same_event(b),
            (Handle::Interface(a), Handle::Interface(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The absent value.
    None,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i128),
    /// A string.
    Str(String),
    /// A tuple.
    Tuple(Vec<Value>),
    /// An object handle.
    Obj(Handle),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(b), Value::Int(i)) | (Value::Int(i), Value::Bool(b)) => {
                i128::from(*b) == *i
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Obj(h)
    }
}

impl Value {
    /// Short description used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::Obj(h) => h.kind(),
        }
    }

    /// The integer value. Booleans convert to 0 or 1.
    pub fn as_int(&self) -> Result<i128, SimError> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Bool(b) => Ok(i128::from(*b)),
            other => Err(SimError::eval(format!(
                "expected an integer, found {}",
                other.type_name()
            ))),
        }
    }

    /// The value as a non-negative integer, for sizes and indices.
    pub fn as_u64(&self) -> Result<u64, SimError> {
        let v = self.as_int()?;
        u64::try_from(v).map_err(|_| SimError::eval(format!("expected a non-negative value, found {v}")))
    }

    /// The elements of a tuple.
    pub fn as_tuple(&self) -> Result<&[Value], SimError> {
        match self {
            Value::Tuple(items) => Ok(items),
            other => Err(SimError::eval(format!(
                "expected a tuple, found {}",
                other.type_name()
            ))),
        }
    }

    /// The instance this value refers to.
    pub fn as_component(&self) -> Result<CompId, SimError> {
        match self {
            Value::Obj(Handle::Component(id)) => Ok(*id),
            other => Err(SimError::eval(format!(
                "expected a component, found {}",
                other.type_name()
            ))),
        }
    }

    /// Truthiness: zero, `None`, `false` and empty strings/tuples are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Obj(_) => true,
        }
    }

    /// Fits an integer into `bits` bits, sign-extending when `signed`.
    /// Non-integers and zero widths pass through unchanged.
    pub fn mask(self, bits: u32, signed: bool) -> Value {
        let v = match self {
            Value::Int(v) => v,
            Value::Bool(b) => i128::from(b),
            other => return other,
        };
        if bits == 0 || bits >= 128 {
            return Value::Int(v);
        }
        let masked = v & ((1i128 << bits) - 1);
        if signed && (masked >> (bits - 1)) & 1 == 1 {
            Value::Int(masked - (1i128 << bits))
        } else {
            Value::Int(masked)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::Obj(Handle::Component(id)) => write!(f, "<component #{}>", id.as_raw()),
            Value::Obj(Handle::Method { name, .. }) => write!(f, "<method {name}>"),
            Value::Obj(h) => write!(f, "<{}>", h.kind()),
        }
    }
}
