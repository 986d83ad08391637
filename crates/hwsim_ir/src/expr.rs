//! Expression trees for process bodies and bind declarations.
//!
//! Field references are positional: [`Expr::RefField`] names a field by its
//! index in the owning type's flattened field list, with `base` selecting the
//! owning instance ([`Expr::RefSelf`] or another field reference to a child
//! component).

use serde::{Deserialize, Serialize};

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mult,
    /// `/`, floored integer division.
    Div,
    /// `%`, result takes the sign of the divisor.
    Mod,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    LShift,
    /// `>>`, arithmetic.
    RShift,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
    /// Logical and (non short-circuit form).
    And,
    /// Logical or (non short-circuit form).
    Or,
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Bitwise complement `~`.
    Invert,
    /// Logical `not`.
    Not,
    /// Unary `+`.
    UAdd,
    /// Negation `-`.
    USub,
}

/// A short-circuit boolean operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOp {
    /// `and`
    And,
    /// `or`
    Or,
}

/// A comparison operator. Comparisons may be chained (`a < b < c`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
    /// Identity.
    Is,
    /// Negated identity.
    IsNot,
    /// Tuple membership.
    In,
    /// Negated tuple membership.
    NotIn,
}

/// The operator of an augmented assignment (`x += 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AugOp {
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mult,
    /// `/=`
    Div,
    /// `//=`
    FloorDiv,
    /// `%=`
    Mod,
    /// `**=`
    Pow,
    /// `<<=`
    LShift,
    /// `>>=`
    RShift,
    /// `&=`
    BitAnd,
    /// `|=`
    BitOr,
    /// `^=`
    BitXor,
}

impl AugOp {
    /// The binary operator applied by this augmented assignment, if any.
    ///
    /// `Pow` has no binary counterpart and is handled by the interpreter.
    pub fn bin_op(self) -> Option<BinOp> {
        Some(match self {
            AugOp::Add => BinOp::Add,
            AugOp::Sub => BinOp::Sub,
            AugOp::Mult => BinOp::Mult,
            AugOp::Div | AugOp::FloorDiv => BinOp::Div,
            AugOp::Mod => BinOp::Mod,
            AugOp::LShift => BinOp::LShift,
            AugOp::RShift => BinOp::RShift,
            AugOp::BitAnd => BinOp::BitAnd,
            AugOp::BitOr => BinOp::BitOr,
            AugOp::BitXor => BinOp::BitXor,
            AugOp::Pow => return None,
        })
    }
}

/// A literal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstValue {
    /// The absent value.
    None,
    /// A boolean.
    Bool(bool),
    /// An integer. Widths are applied when the value is stored.
    Int(i128),
    /// A string.
    Str(String),
}

/// Built-in helpers callable from IR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    /// `cycles(n)`: inside a sync process, a state boundary lasting `n` edges.
    Cycles,
    /// `at(offset, storage)`: an address-space mapping entry in a bind.
    At,
    /// `range(stop)` / `range(start, stop[, step])`.
    Range,
    /// `len(tuple)`.
    Len,
    /// `print(...)`, routed to the log.
    Print,
    /// `min(a, b, ...)`.
    Min,
    /// `max(a, b, ...)`.
    Max,
    /// `abs(a)`.
    Abs,
}

impl Builtin {
    /// The source-level name of the builtin.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Cycles => "cycles",
            Builtin::At => "at",
            Builtin::Range => "range",
            Builtin::Len => "len",
            Builtin::Print => "print",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
        }
    }
}

/// A keyword argument (`name=value`) of a call or a kwargs expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// The argument name.
    pub arg: String,
    /// The argument value.
    pub value: Expr,
}

/// An expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal.
    Constant(ConstValue),
    /// The instance that owns the executing function.
    RefSelf,
    /// A field of the instance `base` evaluates to, by structural index.
    RefField {
        /// The owning instance.
        base: Box<Expr>,
        /// Index into the owning type's flattened field list.
        index: u32,
    },
    /// A function parameter.
    RefParam {
        /// Parameter name.
        name: String,
        /// Parameter position.
        index: u32,
    },
    /// A local variable.
    RefLocal {
        /// Variable name.
        name: String,
    },
    /// A built-in helper, usually the `func` of a [`Expr::Call`].
    Builtin(Builtin),
    /// A binary operation.
    Bin {
        /// Left operand.
        lhs: Box<Expr>,
        /// Operator.
        op: BinOp,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// A unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// A short-circuit boolean chain.
    Bool {
        /// Operator.
        op: BoolOp,
        /// Operands, evaluated left to right.
        values: Vec<Expr>,
    },
    /// A (possibly chained) comparison.
    Compare {
        /// Leftmost operand.
        left: Box<Expr>,
        /// Operators, one per comparator.
        ops: Vec<CmpOp>,
        /// Right-hand operands.
        comparators: Vec<Expr>,
    },
    /// Attribute access: a member of an object or a method name.
    Attribute {
        /// The object.
        value: Box<Expr>,
        /// Member name.
        attr: String,
    },
    /// Indexing into a tuple, or a bit-select on an integer.
    Subscript {
        /// The indexed value.
        value: Box<Expr>,
        /// The index.
        index: Box<Expr>,
    },
    /// A call.
    Call {
        /// The callee.
        func: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
        /// Keyword arguments.
        keywords: Vec<Keyword>,
    },
    /// Conditional expression `body if test else orelse`.
    IfExp {
        /// Condition.
        test: Box<Expr>,
        /// Value when true.
        body: Box<Expr>,
        /// Value when false.
        orelse: Box<Expr>,
    },
    /// A suspension point.
    Await {
        /// The awaited operation.
        value: Box<Expr>,
    },
    /// A tuple literal.
    Tuple {
        /// Elements.
        elts: Vec<Expr>,
    },
}

/// A chain of field indices rooted at `self`.
pub type FieldPath = Vec<u32>;

impl Expr {
    /// An integer literal.
    pub fn int(value: i128) -> Self {
        Expr::Constant(ConstValue::Int(value))
    }

    /// A boolean literal.
    pub fn bool(value: bool) -> Self {
        Expr::Constant(ConstValue::Bool(value))
    }

    /// A string literal.
    pub fn str(value: impl Into<String>) -> Self {
        Expr::Constant(ConstValue::Str(value.into()))
    }

    /// `self.<field #index>`.
    pub fn field(index: u32) -> Self {
        Expr::RefField {
            base: Box::new(Expr::RefSelf),
            index,
        }
    }

    /// A field of the child component stored at `self.<field #child>`.
    pub fn child_field(child: u32, index: u32) -> Self {
        Expr::RefField {
            base: Box::new(Expr::field(child)),
            index,
        }
    }

    /// A field reference following `path` from `self`.
    pub fn path(path: &[u32]) -> Self {
        path.iter().fold(Expr::RefSelf, |base, &index| Expr::RefField {
            base: Box::new(base),
            index,
        })
    }

    /// A local variable reference.
    pub fn local(name: impl Into<String>) -> Self {
        Expr::RefLocal { name: name.into() }
    }

    /// A parameter reference.
    pub fn param(name: impl Into<String>, index: u32) -> Self {
        Expr::RefParam {
            name: name.into(),
            index,
        }
    }

    /// `lhs op rhs`.
    pub fn bin(lhs: Expr, op: BinOp, rhs: Expr) -> Self {
        Expr::Bin {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    /// `op operand`.
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// A single comparison `left op right`.
    pub fn compare(left: Expr, op: CmpOp, right: Expr) -> Self {
        Expr::Compare {
            left: Box::new(left),
            ops: vec![op],
            comparators: vec![right],
        }
    }

    /// `value.attr`.
    pub fn attr(value: Expr, attr: impl Into<String>) -> Self {
        Expr::Attribute {
            value: Box::new(value),
            attr: attr.into(),
        }
    }

    /// `value[index]`.
    pub fn subscript(value: Expr, index: Expr) -> Self {
        Expr::Subscript {
            value: Box::new(value),
            index: Box::new(index),
        }
    }

    /// `func(args...)`.
    pub fn call(func: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            func: Box::new(func),
            args,
            keywords: Vec::new(),
        }
    }

    /// `obj.method(args...)`.
    pub fn method_call(obj: Expr, method: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::call(Expr::attr(obj, method), args)
    }

    /// A call to a builtin.
    pub fn builtin(builtin: Builtin, args: Vec<Expr>) -> Self {
        Expr::call(Expr::Builtin(builtin), args)
    }

    /// `await value`.
    pub fn awaited(value: Expr) -> Self {
        Expr::Await {
            value: Box::new(value),
        }
    }

    /// `body if test else orelse`.
    pub fn if_exp(test: Expr, body: Expr, orelse: Expr) -> Self {
        Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        }
    }

    /// A tuple literal.
    pub fn tuple(elts: Vec<Expr>) -> Self {
        Expr::Tuple { elts }
    }

    /// Returns `true` for literal constants.
    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }

    /// The index chain of a field reference rooted at `self`, if this is one.
    pub fn field_path(&self) -> Option<FieldPath> {
        match self {
            Expr::RefField { base, index } => {
                let mut path = match base.as_ref() {
                    Expr::RefSelf => Vec::new(),
                    other => other.field_path()?,
                };
                path.push(*index);
                Some(path)
            }
            _ => None,
        }
    }
}
