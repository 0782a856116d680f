// File: src/interpreter/native_functions/type_ops.rs
//
// Conversions, type checks and sequence constructors

use super::expect_args;
use crate::interpreter::{range_len, Interpreter, Raised, Value};
use crate::rewriter::resolve::Magnitude;

/// Builtins that behave as types for `isinstance`
const TYPE_NAMES: &[&str] = &["int", "float", "str", "bool", "list", "tuple"];

pub fn handle(
    interp: &mut Interpreter,
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Option<Result<Value, Raised>> {
    let result = match name {
        "int" => to_int(interp, args),
        "float" => to_float(interp, args),
        "str" => expect_args(interp, name, args, 0, 1)
            .map(|_| Value::str(&args.first().map(Value::to_display).unwrap_or_default())),
        "bool" => expect_args(interp, name, args, 0, 1)
            .map(|_| Value::Bool(args.first().map_or(false, Value::is_truthy))),
        "repr" => expect_args(interp, name, args, 1, 1).map(|_| Value::str(&args[0].repr())),
        "list" => sequence(interp, name, args).map(Value::list),
        "tuple" => sequence(interp, name, args).map(Value::tuple),
        "len" => len(interp, args),
        "range" => range(interp, args),
        "isinstance" => isinstance(interp, args),
        "enumerate" => enumerate(interp, args, kwargs),
        _ => return None,
    };
    Some(result)
}

fn to_int(interp: &Interpreter, args: &[Value]) -> Result<Value, Raised> {
    expect_args(interp, "int", args, 0, 1)?;
    let Some(value) = args.first() else {
        return Ok(Value::Int(0));
    };
    let magnitude = match value {
        Value::Int(n) => Magnitude::Int(*n),
        Value::Float(f) => Magnitude::Float(*f),
        Value::Bool(b) => Magnitude::Bool(*b),
        Value::Str(s) => Magnitude::Str(s.to_string()),
        other => {
            return Err(interp.error(
                "TypeError",
                format!(
                    "int() argument must be a string or a real number, not '{}'",
                    other.type_name()
                ),
            ))
        }
    };
    match magnitude.to_int() {
        Some(n) => Ok(Value::Int(n)),
        None if matches!(value, Value::Float(_)) => {
            Err(interp.error("OverflowError", "cannot convert float infinity or NaN to integer"))
        }
        None => Err(interp.error(
            "ValueError",
            format!("invalid literal for int() with base 10: {}", value.repr()),
        )),
    }
}

fn to_float(interp: &Interpreter, args: &[Value]) -> Result<Value, Raised> {
    expect_args(interp, "float", args, 0, 1)?;
    match args.first() {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => {
            let text = s.trim().to_lowercase();
            let parsed = match text.trim_start_matches(['+', '-']) {
                "inf" | "infinity" => Some(if text.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY }),
                "nan" => Some(f64::NAN),
                _ => text.replace('_', "").parse::<f64>().ok(),
            };
            parsed
                .map(Value::Float)
                .ok_or_else(|| interp.error("ValueError", format!("could not convert string to float: {}", args[0].repr())))
        }
        Some(value) => match value.as_number() {
            Some(number) => Ok(Value::Float(number.as_f64())),
            None => Err(interp.error(
                "TypeError",
                format!("float() argument must be a string or a real number, not '{}'", value.type_name()),
            )),
        },
    }
}

fn sequence(interp: &Interpreter, name: &str, args: &[Value]) -> Result<Vec<Value>, Raised> {
    expect_args(interp, name, args, 0, 1)?;
    match args.first() {
        Some(value) => interp.iterate(value),
        None => Ok(Vec::new()),
    }
}

fn len(interp: &Interpreter, args: &[Value]) -> Result<Value, Raised> {
    expect_args(interp, "len", args, 1, 1)?;
    let length = match &args[0] {
        Value::Str(s) => s.chars().count() as i64,
        Value::List(items) => items.borrow().len() as i64,
        Value::Tuple(items) => items.len() as i64,
        Value::Dict(entries) => entries.borrow().len() as i64,
        range @ Value::Range { .. } => i64::try_from(range_len(range))
            .map_err(|_| interp.error("OverflowError", "Python int too large to convert to C ssize_t"))?,
        other => {
            return Err(interp.error("TypeError", format!("object of type '{}' has no len()", other.type_name())))
        }
    };
    Ok(Value::Int(length))
}

fn range(interp: &Interpreter, args: &[Value]) -> Result<Value, Raised> {
    expect_args(interp, "range", args, 1, 3)?;
    let mut bounds = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Int(n) => bounds.push(*n),
            Value::Bool(b) => bounds.push(i64::from(*b)),
            other => {
                return Err(interp.error(
                    "TypeError",
                    format!("'{}' object cannot be interpreted as an integer", other.type_name()),
                ))
            }
        }
    }
    let (start, stop, step) = match bounds[..] {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step, ..] => (start, stop, step),
        [] => (0, 0, 1),
    };
    if step == 0 {
        return Err(interp.error("ValueError", "range() arg 3 must not be zero"));
    }
    Ok(Value::Range { start, stop, step })
}

fn isinstance(interp: &Interpreter, args: &[Value]) -> Result<Value, Raised> {
    expect_args(interp, "isinstance", args, 2, 2)?;
    Ok(Value::Bool(is_instance(&args[0], &args[1])))
}

fn is_instance(value: &Value, class: &Value) -> bool {
    match class {
        Value::Tuple(classes) => classes.iter().any(|class| is_instance(value, class)),
        Value::Class(class) => match value {
            Value::Exception(exception) => exception.class.is_subclass_of(class),
            _ => false,
        },
        Value::NativeFunction(name) if TYPE_NAMES.contains(&name.as_str()) => {
            value.type_name() == *name || (name == "int" && matches!(value, Value::Bool(_)))
        }
        _ => false,
    }
}

fn enumerate(interp: &Interpreter, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value, Raised> {
    expect_args(interp, "enumerate", args, 1, 2)?;
    let start = match (args.get(1), kwargs.iter().find(|(key, _)| key == "start")) {
        (Some(Value::Int(n)), None) | (None, Some((_, Value::Int(n)))) => *n,
        (None, None) => 0,
        _ => return Err(interp.error("TypeError", "enumerate() start must be a single integer")),
    };
    let items = interp.iterate(&args[0])?;
    let pairs = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| Value::tuple(vec![Value::Int(start + index as i64), item]))
        .collect();
    Ok(Value::list(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, Raised> {
        let mut interp = Interpreter::new();
        handle(&mut interp, name, &args, &[]).unwrap()
    }

    #[test]
    fn test_int_conversions() {
        assert_eq!(call("int", vec![Value::Float(-2.7)]).unwrap(), Value::Int(-2));
        assert_eq!(call("int", vec![Value::str(" 12 ")]).unwrap(), Value::Int(12));
        let raised = call("int", vec![Value::str("two")]).unwrap_err();
        assert_eq!(raised.value.to_display(), "invalid literal for int() with base 10: 'two'");
    }

    #[test]
    fn test_range_validation() {
        assert_eq!(call("range", vec![Value::Int(3)]).unwrap(), Value::Range { start: 0, stop: 3, step: 1 });
        assert!(call("range", vec![Value::Int(0), Value::Int(3), Value::Int(0)]).is_err());
        assert!(call("range", vec![Value::Float(1.0)]).is_err());
    }

    #[test]
    fn test_len_of_a_range_wider_than_int() {
        let wide = call("range", vec![Value::Int(i64::MIN), Value::Int(i64::MAX)]).unwrap();
        let raised = call("len", vec![wide]).unwrap_err();
        assert_eq!(raised.value.to_display(), "Python int too large to convert to C ssize_t");
        let half = call("range", vec![Value::Int(0), Value::Int(i64::MAX)]).unwrap();
        assert_eq!(call("len", vec![half]).unwrap(), Value::Int(i64::MAX));
    }

    #[test]
    fn test_isinstance_with_builtin_types() {
        let int = Value::NativeFunction("int".to_string());
        assert_eq!(call("isinstance", vec![Value::Bool(true), int.clone()]).unwrap(), Value::Bool(true));
        assert_eq!(call("isinstance", vec![Value::str("x"), int]).unwrap(), Value::Bool(false));
    }
}
