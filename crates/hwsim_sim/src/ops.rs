//! Operator semantics over [`Value`]s.
//!
//! Integer arithmetic wraps at 128 bits; the width of the destination field
//! is applied when the result is stored. Division and modulo floor toward
//! negative infinity, so the remainder takes the sign of the divisor.

use crate::error::SimError;
use crate::value::Value;
use hwsim_ir::{BinOp, CmpOp, UnaryOp};
use std::cmp::Ordering;

/// Floored integer division.
pub fn floor_div(a: i128, b: i128) -> Result<i128, SimError> {
    if b == 0 {
        return Err(SimError::DivisionByZero);
    }
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Floored modulo; the result has the sign of `b`.
pub fn floor_mod(a: i128, b: i128) -> Result<i128, SimError> {
    if b == 0 {
        return Err(SimError::DivisionByZero);
    }
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn shift_amount(v: i128) -> Result<u32, SimError> {
    if v < 0 {
        return Err(SimError::eval(format!("negative shift count {v}")));
    }
    Ok(u32::try_from(v).unwrap_or(u32::MAX))
}

/// `a ** b` for a non-negative exponent, wrapping.
pub fn pow(a: &Value, b: &Value) -> Result<Value, SimError> {
    let base = a.as_int()?;
    let exp = b.as_int()?;
    if exp < 0 {
        return Err(SimError::eval(format!("negative exponent {exp}")));
    }
    let exp = u32::try_from(exp).map_err(|_| SimError::eval("exponent too large"))?;
    Ok(Value::Int(base.wrapping_pow(exp)))
}

fn order(a: &Value, b: &Value) -> Result<Ordering, SimError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Tuple(x), Value::Tuple(y)) => {
            for (l, r) in x.iter().zip(y) {
                match order(l, r)? {
                    Ordering::Equal => {}
                    other => return Ok(other),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Ok(a.as_int()?.cmp(&b.as_int()?)),
    }
}

/// Applies a binary operator.
pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, SimError> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinOp::NotEq => return Ok(Value::Bool(lhs != rhs)),
        BinOp::Lt => return Ok(Value::Bool(order(lhs, rhs)?.is_lt())),
        BinOp::LtE => return Ok(Value::Bool(order(lhs, rhs)?.is_le())),
        BinOp::Gt => return Ok(Value::Bool(order(lhs, rhs)?.is_gt())),
        BinOp::GtE => return Ok(Value::Bool(order(lhs, rhs)?.is_ge())),
        BinOp::And => return Ok(Value::Bool(lhs.truthy() && rhs.truthy())),
        BinOp::Or => return Ok(Value::Bool(lhs.truthy() || rhs.truthy())),
        _ => {}
    }

    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            return Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }
        _ => {}
    }

    let a = lhs.as_int()?;
    let b = rhs.as_int()?;
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mult => a.wrapping_mul(b),
        BinOp::Div => floor_div(a, b)?,
        BinOp::Mod => floor_mod(a, b)?,
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::LShift => a.checked_shl(shift_amount(b)?).unwrap_or(0),
        BinOp::RShift => a
            .checked_shr(shift_amount(b)?)
            .unwrap_or(if a < 0 { -1 } else { 0 }),
        BinOp::Eq
        | BinOp::NotEq
        | BinOp::Lt
        | BinOp::LtE
        | BinOp::Gt
        | BinOp::GtE
        | BinOp::And
        | BinOp::Or => return Err(SimError::eval(format!("{op:?} is not arithmetic"))),
    };
    Ok(Value::Int(v))
}

/// Applies a unary operator.
pub fn unary(op: UnaryOp, v: &Value) -> Result<Value, SimError> {
    Ok(match op {
        UnaryOp::Not => Value::Bool(!v.truthy()),
        UnaryOp::Invert => Value::Int(!v.as_int()?),
        UnaryOp::UAdd => Value::Int(v.as_int()?),
        UnaryOp::USub => Value::Int(v.as_int()?.wrapping_neg()),
    })
}

/// Evaluates one link of a comparison chain.
pub fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, SimError> {
    Ok(match op {
        CmpOp::Eq | CmpOp::Is => lhs == rhs,
        CmpOp::NotEq | CmpOp::IsNot => lhs != rhs,
        CmpOp::Lt => order(lhs, rhs)?.is_lt(),
        CmpOp::LtE => order(lhs, rhs)?.is_le(),
        CmpOp::Gt => order(lhs, rhs)?.is_gt(),
        CmpOp::GtE => order(lhs, rhs)?.is_ge(),
        CmpOp::In => contains(rhs, lhs)?,
        CmpOp::NotIn => !contains(rhs, lhs)?,
    })
}

fn contains(container: &Value, item: &Value) -> Result<bool, SimError> {
    match (container, item) {
        (Value::Tuple(items), _) => Ok(items.contains(item)),
        (Value::Str(s), Value::Str(sub)) => Ok(s.contains(sub.as_str())),
        (other, _) => Err(SimError::eval(format!(
            "'in' needs a tuple or string, found {}",
            other.type_name()
        ))),
    }
}
