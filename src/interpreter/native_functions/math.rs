// File: src/interpreter/native_functions/math.rs
//
// Numeric native functions

use std::cmp::Ordering;

use super::expect_args;
use crate::interpreter::{operators, Interpreter, Number, Raised, Value};

pub fn handle(interp: &mut Interpreter, name: &str, args: &[Value]) -> Option<Result<Value, Raised>> {
    let result = match name {
        "abs" => abs(interp, args),
        "min" => extreme(interp, name, args, Ordering::Less),
        "max" => extreme(interp, name, args, Ordering::Greater),
        "sum" => sum(interp, args),
        _ => return None,
    };
    Some(result)
}

fn abs(interp: &Interpreter, args: &[Value]) -> Result<Value, Raised> {
    expect_args(interp, "abs", args, 1, 1)?;
    match args[0].as_number() {
        Some(Number::Int(n)) => n.checked_abs().map(Value::Int).ok_or_else(|| interp.error("OverflowError", "integer overflow")),
        Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
        None => Err(interp.error("TypeError", format!("bad operand type for abs(): '{}'", args[0].type_name()))),
    }
}

/// `min`/`max` over one iterable or over the arguments themselves
fn extreme(interp: &Interpreter, name: &str, args: &[Value], wanted: Ordering) -> Result<Value, Raised> {
    let items = match args {
        [] => return Err(interp.error("TypeError", format!("{} expected at least 1 argument, got 0", name))),
        [iterable] => interp.iterate(iterable)?,
        many => many.to_vec(),
    };

    let mut items = items.into_iter();
    let Some(mut best) = items.next() else {
        return Err(interp.error("ValueError", format!("{}() arg is an empty sequence", name)));
    };
    for item in items {
        match operators::compare(&item, &best) {
            Some(ordering) if ordering == wanted => best = item,
            Some(_) => {}
            None => {
                return Err(interp.error(
                    "TypeError",
                    format!(
                        "'<' not supported between instances of '{}' and '{}'",
                        item.type_name(),
                        best.type_name()
                    ),
                ))
            }
        }
    }
    Ok(best)
}

fn sum(interp: &Interpreter, args: &[Value]) -> Result<Value, Raised> {
    expect_args(interp, "sum", args, 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    for item in interp.iterate(&args[0])? {
        total = operators::binary(crate::ast::BinOp::Add, &total, &item)
            .map_err(|(class, message)| interp.error(class, message))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max_sum() {
        let mut interp = Interpreter::new();
        let list = Value::list(vec![Value::Int(3), Value::Int(1), Value::Float(2.5)]);
        let args = [list];
        assert_eq!(handle(&mut interp, "min", &args).unwrap().unwrap(), Value::Int(1));
        assert_eq!(handle(&mut interp, "max", &args).unwrap().unwrap(), Value::Int(3));
        assert_eq!(handle(&mut interp, "sum", &args).unwrap().unwrap(), Value::Float(6.5));
    }

    #[test]
    fn test_min_of_empty_sequence() {
        let mut interp = Interpreter::new();
        let raised = handle(&mut interp, "min", &[Value::list(Vec::new())]).unwrap().unwrap_err();
        assert_eq!(raised.value.to_display(), "min() arg is an empty sequence");
    }
}
