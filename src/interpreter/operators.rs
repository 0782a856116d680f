// File: src/interpreter/operators.rs
//
// Binary, unary and comparison operators on runtime values.
// Errors come back as (exception class, message) so the interpreter can
// raise them with the current location.

use std::cmp::Ordering;
use std::rc::Rc;

use super::value::{range_len, Number, Value};
use crate::ast::{BinOp, CmpOp, UnaryOp};

pub type OpError = (&'static str, String);

fn unsupported(op: &str, left: &Value, right: &Value) -> OpError {
    (
        "TypeError",
        format!("unsupported operand type(s) for {}: '{}' and '{}'", op, left.type_name(), right.type_name()),
    )
}

fn overflow() -> OpError {
    ("OverflowError", "integer overflow".to_string())
}

fn zero_division(message: &str) -> OpError {
    ("ZeroDivisionError", message.to_string())
}

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, OpError> {
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::str(&format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            return Ok(Value::list(items));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            return Ok(Value::tuple(items));
        }
        (BinOp::Mult, Value::Str(s), count) | (BinOp::Mult, count, Value::Str(s)) if count.as_number().is_some() => {
            if let Some(Number::Int(n)) = count.as_number() {
                return Ok(Value::str(&s.repeat(n.max(0) as usize)));
            }
        }
        (BinOp::Mult, Value::List(items), count) | (BinOp::Mult, count, Value::List(items))
            if matches!(count.as_number(), Some(Number::Int(_))) =>
        {
            if let Some(Number::Int(n)) = count.as_number() {
                let items = items.borrow();
                let repeated = (0..n.max(0)).flat_map(|_| items.iter().cloned()).collect();
                return Ok(Value::list(repeated));
            }
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(unsupported(op.symbol(), left, right));
    };

    match (a, b) {
        (Number::Int(a), Number::Int(b)) => int_binary(op, a, b).unwrap_or_else(|| Err(unsupported(op.symbol(), left, right))),
        (a, b) => float_binary(op, a.as_f64(), b.as_f64()).unwrap_or_else(|| Err(unsupported(op.symbol(), left, right))),
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Option<Result<Value, OpError>> {
    let result = match op {
        BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Mult => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Div if b == 0 => Err(zero_division("division by zero")),
        BinOp::Div => Ok(Value::Float(a as f64 / b as f64)),
        BinOp::FloorDiv if b == 0 => Err(zero_division("integer division or modulo by zero")),
        BinOp::FloorDiv => floor_div(a, b).map(Value::Int).ok_or_else(overflow),
        BinOp::Mod if b == 0 => Err(zero_division("integer modulo by zero")),
        BinOp::Mod => Ok(Value::Int(floor_mod(a, b))),
        BinOp::Pow if b < 0 => Ok(Value::Float((a as f64).powf(b as f64))),
        BinOp::Pow => u32::try_from(b).ok().and_then(|b| a.checked_pow(b)).map(Value::Int).ok_or_else(overflow),
        BinOp::LShift | BinOp::RShift if b < 0 => Err(("ValueError", "negative shift count".to_string())),
        BinOp::LShift => u32::try_from(b).ok().and_then(|b| a.checked_shl(b)).map(Value::Int).ok_or_else(overflow),
        BinOp::RShift => Ok(Value::Int(a >> b.min(63))),
        BinOp::BitOr => Ok(Value::Int(a | b)),
        BinOp::BitXor => Ok(Value::Int(a ^ b)),
        BinOp::BitAnd => Ok(Value::Int(a & b)),
        BinOp::MatMult => return None,
    };
    Some(result)
}

/// `None` only for `i64::MIN // -1`
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        remainder + b
    } else {
        remainder
    }
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Option<Result<Value, OpError>> {
    let result = match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mult => Ok(Value::Float(a * b)),
        BinOp::Div if b == 0.0 => Err(zero_division("float division by zero")),
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::FloorDiv if b == 0.0 => Err(zero_division("float floor division by zero")),
        BinOp::FloorDiv => Ok(Value::Float((a / b).floor())),
        BinOp::Mod if b == 0.0 => Err(zero_division("float modulo")),
        BinOp::Mod => Ok(Value::Float(a - (a / b).floor() * b)),
        BinOp::Pow => Ok(Value::Float(a.powf(b))),
        _ => return None,
    };
    Some(result)
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, OpError> {
    let bad = || ("TypeError", format!("bad operand type for unary {}: '{}'", op.symbol(), operand.type_name()));
    match (op, operand.as_number()) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!operand.is_truthy())),
        (UnaryOp::USub, Some(Number::Int(n))) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::USub, Some(Number::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::UAdd, Some(Number::Int(n))) => Ok(Value::Int(n)),
        (UnaryOp::UAdd, Some(Number::Float(f))) => Ok(Value::Float(f)),
        (UnaryOp::Invert, Some(Number::Int(n))) => Ok(Value::Int(!n)),
        _ => Err(bad()),
    }
}

/// Ordering used by `<`, `min`, `max`
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) => compare_sequences(&a.borrow(), &b.borrow()),
        (Value::Tuple(a), Value::Tuple(b)) => compare_sequences(a, b),
        _ => match (left.as_number()?, right.as_number()?) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        },
    }
}

fn compare_sequences(left: &[Value], right: &[Value]) -> Option<Ordering> {
    for (a, b) in left.iter().zip(right) {
        if a != b {
            return compare(a, b);
        }
    }
    Some(left.len().cmp(&right.len()))
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> Result<bool, OpError> {
    match container {
        Value::List(items) => Ok(items.borrow().contains(item)),
        Value::Tuple(items) => Ok(items.contains(item)),
        Value::Dict(entries) => Ok(entries.borrow().iter().any(|(key, _)| key == item)),
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(&**needle)),
            other => Err((
                "TypeError",
                format!("'in <string>' requires string as left operand, not {}", other.type_name()),
            )),
        },
        Value::Range { start, step, .. } => Ok(match item.as_number() {
            Some(Number::Int(n)) => {
                let (offset, step) = (i128::from(n) - i128::from(*start), i128::from(*step));
                offset % step == 0 && offset / step >= 0 && offset / step < range_len(container)
            }
            _ => false,
        }),
        other => Err(("TypeError", format!("argument of type '{}' is not iterable", other.type_name()))),
    }
}

/// `left is right`
pub fn is_same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Float(_), _) | (_, Value::Float(_)) => false,
        _ => left == right,
    }
}

pub fn compare_op(op: CmpOp, left: &Value, right: &Value) -> Result<bool, OpError> {
    let ordered = |wanted: fn(Ordering) -> bool| {
        compare(left, right).map(wanted).ok_or_else(|| {
            (
                "TypeError",
                format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ),
            )
        })
    };
    match op {
        CmpOp::Eq => Ok(left == right),
        CmpOp::NotEq => Ok(left != right),
        CmpOp::Lt => ordered(|o| o == Ordering::Less),
        CmpOp::LtE => ordered(|o| o != Ordering::Greater),
        CmpOp::Gt => ordered(|o| o == Ordering::Greater),
        CmpOp::GtE => ordered(|o| o != Ordering::Less),
        CmpOp::Is => Ok(is_same(left, right)),
        CmpOp::IsNot => Ok(!is_same(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|found| !found),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_division_and_modulo_follow_the_divisor_sign() {
        assert_eq!(binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(1));
        assert_eq!(binary(BinOp::Mod, &Value::Int(7), &Value::Int(-2)).unwrap(), Value::Int(-1));
    }

    #[test]
    fn test_most_negative_int_divided_by_minus_one() {
        let (min, minus_one) = (Value::Int(i64::MIN), Value::Int(-1));
        assert_eq!(binary(BinOp::FloorDiv, &min, &minus_one).unwrap_err().0, "OverflowError");
        assert_eq!(binary(BinOp::Mod, &min, &minus_one).unwrap(), Value::Int(0));
        assert_eq!(binary(BinOp::FloorDiv, &min, &Value::Int(2)).unwrap(), Value::Int(i64::MIN / 2));
    }

    #[test]
    fn test_membership_in_a_full_width_range() {
        let range = Value::Range { start: i64::MIN, stop: i64::MAX, step: 1 };
        assert!(compare_op(CmpOp::In, &Value::Int(i64::MAX - 1), &range).unwrap());
        assert!(!compare_op(CmpOp::In, &Value::Int(i64::MAX), &range).unwrap());
    }

    #[test]
    fn test_mixed_arithmetic() {
        assert_eq!(binary(BinOp::Add, &Value::Int(1), &Value::Float(0.5)).unwrap(), Value::Float(1.5));
        assert_eq!(binary(BinOp::Div, &Value::Int(1), &Value::Int(2)).unwrap(), Value::Float(0.5));
        assert_eq!(binary(BinOp::Mult, &Value::str("ab"), &Value::Int(2)).unwrap(), Value::str("abab"));
    }

    #[test]
    fn test_errors() {
        let (class, _) = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(class, "ZeroDivisionError");
        let (class, message) = binary(BinOp::MatMult, &Value::str("breakall"), &Value::Int(2)).unwrap_err();
        assert_eq!(class, "TypeError");
        assert_eq!(message, "unsupported operand type(s) for @: 'str' and 'int'");
        assert_eq!(binary(BinOp::Add, &Value::Int(i64::MAX), &Value::Int(1)).unwrap_err().0, "OverflowError");
    }

    #[test]
    fn test_comparisons() {
        assert!(compare_op(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare_op(CmpOp::In, &Value::Int(3), &Value::Range { start: 1, stop: 10, step: 2 }).unwrap());
        assert!(!compare_op(CmpOp::In, &Value::Int(4), &Value::Range { start: 1, stop: 10, step: 2 }).unwrap());
        assert!(compare_op(CmpOp::Is, &Value::None, &Value::None).unwrap());
        assert!(compare_op(CmpOp::Lt, &Value::str("a"), &Value::Int(1)).is_err());
    }
}
