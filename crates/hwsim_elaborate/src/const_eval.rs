//! Structural expression evaluation.
//!
//! Const initializers, width expressions, construction arguments and bind
//! operands are evaluated against the instance that owns them. Only
//! structure is visible: constants, child instances and runtime objects.
//! Signals have no value before the simulation starts, so reading one here
//! is an error.

use hwsim_ir::{BoolOp, Builtin, ConstValue, Expr};
use hwsim_sim::ops;
use hwsim_sim::{CompId, Handle, SimError, SimTree, Storage, Value};

/// The instance a structural expression is evaluated against.
#[derive(Clone, Copy)]
pub struct ConstEnv<'a> {
    tree: &'a SimTree,
    comp: CompId,
}

impl<'a> ConstEnv<'a> {
    /// Evaluates against `comp`.
    pub fn new(tree: &'a SimTree, comp: CompId) -> Self {
        Self { tree, comp }
    }

    /// Evaluates `expr`.
    pub fn eval(&self, expr: &Expr) -> Result<Value, SimError> {
        match expr {
            Expr::Constant(c) => Ok(match c {
                ConstValue::None => Value::None,
                ConstValue::Bool(b) => Value::Bool(*b),
                ConstValue::Int(v) => Value::Int(*v),
                ConstValue::Str(s) => Value::Str(s.clone()),
            }),
            Expr::RefSelf => Ok(Value::Obj(Handle::Component(self.comp))),
            Expr::RefField { base, index } => {
                let owner = self.eval(base)?.as_component()?;
                self.field(owner, *index)
            }
            Expr::Builtin(b) => Ok(Value::Obj(Handle::Builtin(*b))),
            Expr::Bin { lhs, op, rhs } => ops::binary(*op, &self.eval(lhs)?, &self.eval(rhs)?),
            Expr::Unary { op, operand } => ops::unary(*op, &self.eval(operand)?),
            Expr::Bool { op, values } => {
                let mut last = Value::Bool(matches!(op, BoolOp::And));
                for v in values {
                    last = self.eval(v)?;
                    let done = match op {
                        BoolOp::And => !last.truthy(),
                        BoolOp::Or => last.truthy(),
                    };
                    if done {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops: cmp_ops,
                comparators,
            } => {
                let mut lhs = self.eval(left)?;
                for (op, right) in cmp_ops.iter().zip(comparators) {
                    let rhs = self.eval(right)?;
                    if !ops::compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Tuple { elts } => Ok(Value::Tuple(
                elts.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Subscript { value, index } => {
                let items = self.eval(value)?;
                let items = items.as_tuple()?;
                let i = self.eval(index)?.as_int()?;
                let len = items.len() as i128;
                let at = if i < 0 { i + len } else { i };
                if !(0..len).contains(&at) {
                    return Err(SimError::IndexOutOfBounds {
                        index: i,
                        size: items.len() as u64,
                    });
                }
                Ok(items[at as usize].clone())
            }
            Expr::Call { func, args, .. } => match func.as_ref() {
                Expr::Builtin(b) => {
                    let args = args
                        .iter()
                        .map(|a| self.eval(a))
                        .collect::<Result<Vec<_>, _>>()?;
                    builtin(*b, &args)
                }
                _ => Err(SimError::eval("function calls are not structural")),
            },
            Expr::Attribute { .. }
            | Expr::RefParam { .. }
            | Expr::RefLocal { .. }
            | Expr::Await { .. } => Err(SimError::unsupported(format!(
                "{} in a structural expression",
                kind_name(expr)
            ))),
        }
    }

    fn field(&self, owner: CompId, index: u32) -> Result<Value, SimError> {
        let slot = self.tree.slot(owner, index)?;
        match &slot.storage {
            Storage::Const(v) | Storage::Object(v) => Ok(v.clone()),
            Storage::Component(child) => Ok(Value::Obj(Handle::Component(*child))),
            Storage::Signal => Err(SimError::eval(format!(
                "signal '{}' is not a constant",
                slot.name
            ))),
            Storage::Unbound => Err(SimError::eval(format!(
                "'{}' has no value yet",
                slot.name
            ))),
        }
    }
}

fn kind_name(expr: &Expr) -> &'static str {
    match expr {
        Expr::Attribute { .. } => "attribute access",
        Expr::RefParam { .. } => "parameter reference",
        Expr::RefLocal { .. } => "local reference",
        Expr::Await { .. } => "await",
        _ => "expression",
    }
}

fn builtin(b: Builtin, args: &[Value]) -> Result<Value, SimError> {
    match b {
        Builtin::Min | Builtin::Max => {
            let mut best: Option<i128> = None;
            for a in args {
                let v = a.as_int()?;
                best = Some(match best {
                    Some(cur) if b == Builtin::Min => cur.min(v),
                    Some(cur) => cur.max(v),
                    None => v,
                });
            }
            best.map(Value::Int)
                .ok_or_else(|| SimError::eval(format!("{}() needs arguments", b.name())))
        }
        Builtin::Abs => match args {
            [v] => Ok(Value::Int(v.as_int()?.wrapping_abs())),
            _ => Err(SimError::eval("abs() takes one argument")),
        },
        Builtin::Len => match args {
            [v] => Ok(Value::Int(v.as_tuple()?.len() as i128)),
            _ => Err(SimError::eval("len() takes one argument")),
        },
        Builtin::At => match args {
            [offset, storage] => Ok(Value::Tuple(vec![offset.clone(), storage.clone()])),
            _ => Err(SimError::eval("at() takes an offset and a storage")),
        },
        Builtin::Cycles | Builtin::Range | Builtin::Print => Err(SimError::unsupported(format!(
            "{}() in a structural expression",
            b.name()
        ))),
    }
}

/// Converts an evaluated width to bits.
pub fn to_width(v: &Value) -> Result<u32, SimError> {
    let bits = v.as_int()?;
    u32::try_from(bits)
        .ok()
        .filter(|b| (1..=128).contains(b))
        .ok_or_else(|| SimError::eval(format!("width {bits} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsim_common::Interner;
    use hwsim_ir::{BinOp, CmpOp, FieldKind};
    use hwsim_sim::{CompInstance, FieldSlot};
    use std::rc::Rc;

    fn tree() -> SimTree {
        let mut tree = SimTree::new(Rc::new(Interner::new()));
        let root = tree.alloc(CompInstance::new("Top", "Top", "Top", None));
        let slots = [
            ("N", Storage::Const(Value::Int(8))),
            ("data", Storage::Signal),
            ("pending", Storage::Unbound),
        ];
        for (name, storage) in slots {
            let key = tree.key(name);
            tree.comp_mut(root).fields.push(FieldSlot {
                name: name.into(),
                key,
                kind: FieldKind::Field,
                direction: None,
                width: 0,
                signed: false,
                storage,
            });
        }
        tree
    }

    #[test]
    fn arithmetic_over_constants() {
        let t = tree();
        let env = ConstEnv::new(&t, t.root());
        let e = Expr::bin(Expr::field(0), BinOp::Mult, Expr::int(2));
        assert_eq!(env.eval(&e), Ok(Value::Int(16)));
        let e = Expr::if_exp(
            Expr::compare(Expr::field(0), CmpOp::Gt, Expr::int(4)),
            Expr::int(1),
            Expr::int(0),
        );
        assert_eq!(env.eval(&e), Ok(Value::Int(1)));
    }

    #[test]
    fn signals_are_not_constant() {
        let t = tree();
        let env = ConstEnv::new(&t, t.root());
        assert!(env.eval(&Expr::field(1)).is_err());
        assert!(env.eval(&Expr::field(2)).is_err());
        assert!(env.eval(&Expr::field(9)).is_err());
    }

    #[test]
    fn builtins_fold() {
        let t = tree();
        let env = ConstEnv::new(&t, t.root());
        let e = Expr::builtin(Builtin::Max, vec![Expr::int(3), Expr::field(0), Expr::int(5)]);
        assert_eq!(env.eval(&e), Ok(Value::Int(8)));
        let e = Expr::builtin(Builtin::Abs, vec![Expr::int(-4)]);
        assert_eq!(env.eval(&e), Ok(Value::Int(4)));
        let e = Expr::builtin(Builtin::Abs, vec![Expr::int(i128::MIN)]);
        assert_eq!(env.eval(&e), Ok(Value::Int(i128::MIN)));
        assert!(env
            .eval(&Expr::builtin(Builtin::Range, vec![Expr::int(4)]))
            .is_err());
    }

    #[test]
    fn tuple_subscript() {
        let t = tree();
        let env = ConstEnv::new(&t, t.root());
        let tup = Expr::tuple(vec![Expr::int(1), Expr::int(2), Expr::int(3)]);
        assert_eq!(
            env.eval(&Expr::subscript(tup.clone(), Expr::int(-1))),
            Ok(Value::Int(3))
        );
        assert!(env.eval(&Expr::subscript(tup, Expr::int(3))).is_err());
    }

    #[test]
    fn width_range() {
        assert_eq!(to_width(&Value::Int(12)), Ok(12));
        assert!(to_width(&Value::Int(0)).is_err());
        assert!(to_width(&Value::Int(129)).is_err());
    }
}
