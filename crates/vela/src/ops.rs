//! Arithmetic and comparison dispatch for every value pair.
//!
//! Both interpreter tiers funnel binary/unary operations through this module:
//! specialized results for Int×Int, Double×Double, and String `+` anything,
//! then operator-overload methods on objects, then a type error. Integer
//! arithmetic wraps; `Int op Long` promotes to `Long`; `Int op Double`
//! promotes to `Double`. Integer `DIV`/`MOD` with a zero right operand raises
//! `ArithmeticError("Division by zero")`.

use smallvec::smallvec;
use strum::Display;

use crate::{
    errors::{RunError, RunResult},
    interp::Interpreter,
    value::Value,
};

/// Binary opcodes shared by the HIR evaluator and the MIR `BINARY` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Shl,
    Shr,
    Ushr,
    BAnd,
    BOr,
    BXor,
}

/// Unary opcodes shared by both tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
    BNot,
}

impl BinOp {
    /// Operator-overload method name consulted on object operands.
    pub fn overload_method(self) -> Option<&'static str> {
        match self {
            Self::Add => Some("plus"),
            Self::Sub => Some("minus"),
            Self::Mul => Some("times"),
            Self::Div => Some("div"),
            Self::Mod => Some("rem"),
            Self::Lt | Self::Gt | Self::Le | Self::Ge => Some("compareTo"),
            _ => None,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Gt | Self::Le | Self::Ge)
    }
}

impl UnOp {
    pub fn overload_method(self) -> Option<&'static str> {
        match self {
            Self::Neg => Some("unaryMinus"),
            Self::Pos => Some("unaryPlus"),
            _ => None,
        }
    }
}

/// `inc`/`dec` operator methods for the `++`/`--` rewrite done by the front
/// end; listed here so the overload table is complete in one place.
pub const INC_METHOD: &str = "inc";
pub const DEC_METHOD: &str = "dec";

/// Result of a raw-int binary operation in the MIR tier.
#[derive(Debug, Clone, Copy)]
pub enum RawResult {
    /// Arithmetic/bitwise result stays raw (boxing still deferred).
    Raw(i64),
    /// Comparison result, boxed to `Bool` by the caller.
    Bool(bool),
}

/// Raw-int fast path: both operands already live in `raw_locals`.
pub fn raw_binary(op: BinOp, a: i64, b: i64) -> RunResult<RawResult> {
    let raw = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(RunError::division_by_zero());
            }
            a.wrapping_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(RunError::division_by_zero());
            }
            a.wrapping_rem(b)
        }
        BinOp::Shl => a.wrapping_shl(b as u32 & 63),
        BinOp::Shr => a.wrapping_shr(b as u32 & 63),
        BinOp::Ushr => ((a as u64).wrapping_shr(b as u32 & 63)) as i64,
        BinOp::BAnd => a & b,
        BinOp::BOr => a | b,
        BinOp::BXor => a ^ b,
        BinOp::Eq => return Ok(RawResult::Bool(a == b)),
        BinOp::Ne => return Ok(RawResult::Bool(a != b)),
        BinOp::Lt => return Ok(RawResult::Bool(a < b)),
        BinOp::Gt => return Ok(RawResult::Bool(a > b)),
        BinOp::Le => return Ok(RawResult::Bool(a <= b)),
        BinOp::Ge => return Ok(RawResult::Bool(a >= b)),
        BinOp::And | BinOp::Or => {
            return Err(RunError::type_mismatch("logical operator applied to Int operands"));
        }
    };
    Ok(RawResult::Raw(raw))
}

/// Full binary dispatch over boxed operands.
pub fn binary_op(interp: &mut Interpreter, op: BinOp, lhs: Value, rhs: Value) -> RunResult<Value> {
    // Equality works for every tag without coercion machinery.
    match op {
        BinOp::Eq => return Ok(Value::Bool(lhs.equals(&rhs))),
        BinOp::Ne => return Ok(Value::Bool(!lhs.equals(&rhs))),
        _ => {}
    }

    match (&lhs, &rhs) {
        // Int×Int stays in the integer domain (wrapping, Long-tag preserving).
        (Value::Int(a), Value::Int(b)) => int_binary(op, *a, *b, false),
        (Value::Int(a) | Value::Long(a), Value::Int(b) | Value::Long(b)) => int_binary(op, *a, *b, true),

        // Double×Double and mixed numeric promote to Double.
        (Value::Double(_) | Value::Int(_) | Value::Long(_), Value::Double(_))
        | (Value::Double(_), Value::Int(_) | Value::Long(_)) => {
            let (a, b) = (lhs.as_f64().unwrap(), rhs.as_f64().unwrap());
            double_binary(op, a, b)
        }

        // String + anything concatenates via display (honors user toString).
        (Value::Str(s), _) if op == BinOp::Add => {
            let rendered = interp.display_value(&rhs)?;
            Ok(Value::str(format!("{s}{rendered}")))
        }
        (_, Value::Str(s)) if op == BinOp::Add && !matches!(lhs, Value::Object(_)) => {
            let rendered = interp.display_value(&lhs)?;
            Ok(Value::str(format!("{rendered}{s}")))
        }
        (Value::Str(a), Value::Str(b)) if op.is_comparison() => Ok(Value::Bool(cmp_holds(op, a.cmp(b)))),

        (Value::Char(a), Value::Char(b)) if op.is_comparison() => Ok(Value::Bool(cmp_holds(op, a.cmp(b)))),
        // Char arithmetic against Int yields a shifted Char.
        (Value::Char(c), Value::Int(n)) if matches!(op, BinOp::Add | BinOp::Sub) => {
            let delta = if op == BinOp::Add { *n } else { -n };
            let code = i64::from(*c as u32) + delta;
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map(Value::Char)
                .ok_or_else(|| RunError::type_mismatch("Char arithmetic out of range"))
        }

        (Value::Bool(a), Value::Bool(b)) => match op {
            BinOp::And => Ok(Value::Bool(*a && *b)),
            BinOp::Or => Ok(Value::Bool(*a || *b)),
            BinOp::BXor => Ok(Value::Bool(a != b)),
            _ => Err(type_error(op, &lhs, &rhs)),
        },

        // List + List concatenates into a fresh list.
        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            let mut items = a.read().clone();
            items.extend(b.read().iter().cloned());
            Ok(Value::list_of(items))
        }

        // Operator overloads on object operands.
        (Value::Object(_), _) => object_binary(interp, op, lhs, rhs),

        _ => Err(type_error(op, &lhs, &rhs)),
    }
}

fn object_binary(interp: &mut Interpreter, op: BinOp, lhs: Value, rhs: Value) -> RunResult<Value> {
    let Some(method) = op.overload_method() else {
        return Err(type_error(op, &lhs, &rhs));
    };
    let result = interp.invoke_method(&lhs, method, smallvec![rhs.clone()])?;
    if method == "compareTo" {
        let ord = result
            .as_int()
            .ok_or_else(|| RunError::type_mismatch("compareTo must return Int"))?;
        Ok(Value::Bool(cmp_holds(op, ord.cmp(&0))))
    } else {
        Ok(result)
    }
}

fn int_binary(op: BinOp, a: i64, b: i64, long: bool) -> RunResult<Value> {
    let wrap = |v: i64| if long { Value::Long(v) } else { Value::Int(v) };
    Ok(match raw_binary(op, a, b)? {
        RawResult::Raw(v) => wrap(v),
        RawResult::Bool(b) => Value::Bool(b),
    })
}

fn double_binary(op: BinOp, a: f64, b: f64) -> RunResult<Value> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        // IEEE semantics: Double division by zero yields infinity, not an error.
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
        BinOp::Lt => return Ok(Value::Bool(a < b)),
        BinOp::Gt => return Ok(Value::Bool(a > b)),
        BinOp::Le => return Ok(Value::Bool(a <= b)),
        BinOp::Ge => return Ok(Value::Bool(a >= b)),
        _ => {
            return Err(RunError::type_mismatch(format!("operator {op} is not defined for Double")));
        }
    };
    Ok(Value::Double(v))
}

/// Full unary dispatch.
pub fn unary_op(interp: &mut Interpreter, op: UnOp, operand: Value) -> RunResult<Value> {
    match (op, &operand) {
        (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
        (UnOp::Neg, Value::Long(i)) => Ok(Value::Long(i.wrapping_neg())),
        (UnOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
        (UnOp::Pos, Value::Int(_) | Value::Long(_) | Value::Double(_)) => Ok(operand),
        (UnOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnOp::BNot, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnOp::BNot, Value::Long(i)) => Ok(Value::Long(!i)),
        (op, Value::Object(_)) => {
            if let Some(method) = op.overload_method() {
                interp.invoke_method(&operand, method, smallvec![])
            } else {
                Err(RunError::type_mismatch(format!(
                    "operator {op} is not defined for {}",
                    operand.type_name()
                )))
            }
        }
        (op, v) => Err(RunError::type_mismatch(format!(
            "operator {op} is not defined for {}",
            v.type_name()
        ))),
    }
}

/// Raw unary fast path for the MIR tier.
pub fn raw_unary(op: UnOp, a: i64) -> Option<i64> {
    match op {
        UnOp::Neg => Some(a.wrapping_neg()),
        UnOp::Pos => Some(a),
        UnOp::BNot => Some(!a),
        UnOp::Not => None,
    }
}

fn cmp_holds(op: BinOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match op {
        BinOp::Lt => ord == Less,
        BinOp::Gt => ord == Greater,
        BinOp::Le => ord != Greater,
        BinOp::Ge => ord != Less,
        BinOp::Eq => ord == Equal,
        BinOp::Ne => ord != Equal,
        _ => unreachable!("not a comparison operator"),
    }
}

fn type_error(op: BinOp, lhs: &Value, rhs: &Value) -> RunError {
    RunError::type_mismatch(format!(
        "operator {op} is not defined for {} and {}",
        lhs.type_name(),
        rhs.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_int_division_by_zero() {
        assert!(raw_binary(BinOp::Div, 1, 0).is_err());
        assert!(raw_binary(BinOp::Mod, 1, 0).is_err());
        assert!(matches!(raw_binary(BinOp::Div, 7, 2), Ok(RawResult::Raw(3))));
    }

    #[test]
    fn raw_comparisons_produce_bools() {
        assert!(matches!(raw_binary(BinOp::Lt, 1, 2), Ok(RawResult::Bool(true))));
        assert!(matches!(raw_binary(BinOp::Ge, 1, 2), Ok(RawResult::Bool(false))));
    }

    #[test]
    fn wrapping_is_consistent() {
        assert!(matches!(
            raw_binary(BinOp::Add, i64::MAX, 1),
            Ok(RawResult::Raw(i64::MIN))
        ));
    }

    #[test]
    fn ushr_zero_fills() {
        assert!(matches!(
            raw_binary(BinOp::Ushr, -1, 60),
            Ok(RawResult::Raw(15))
        ));
    }
}
