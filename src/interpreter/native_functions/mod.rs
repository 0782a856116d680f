// File: src/interpreter/native_functions/mod.rs
//
// Native (built-in) function implementations, split by category.
// Each category exposes `handle`, returning `None` for names it does not own.

pub mod async_ops;
pub mod breakall_ops;
pub mod collections;
pub mod io;
pub mod math;
pub mod strings;
pub mod type_ops;

use super::{Environment, Interpreter, Raised, Value};

/// Natives that take keyword arguments
const ACCEPTS_KEYWORDS: &[&str] =
    &["print", "enumerate", "destination_from_break_count", "destination_from_loop_number"];

/// Main dispatcher that routes native function calls to appropriate category modules
pub fn call_native_function(
    interp: &mut Interpreter,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    env: &Environment,
) -> Result<Value, Raised> {
    if !kwargs.is_empty() && !ACCEPTS_KEYWORDS.contains(&name) {
        return Err(interp.error("TypeError", format!("{}() takes no keyword arguments", name)));
    }

    if let Some(result) = io::handle(interp, name, &args, &kwargs) {
        return result;
    }
    if let Some(result) = type_ops::handle(interp, name, &args, &kwargs) {
        return result;
    }
    if let Some(result) = math::handle(interp, name, &args) {
        return result;
    }
    if let Some(result) = async_ops::handle(interp, name, &args) {
        return result;
    }
    if let Some(result) = breakall_ops::handle(interp, name, &args, &kwargs, env) {
        return result;
    }

    Err(interp.error("NameError", format!("Unknown native function: {}", name)))
}

/// Calls a method of a builtin type on `receiver`
pub fn call_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, Raised> {
    if let Some(result) = collections::call_method(interp, receiver, name, &args) {
        return result;
    }
    if let Some(result) = strings::call_method(interp, receiver, name, &args) {
        return result;
    }
    Err(interp.error(
        "AttributeError",
        format!("'{}' object has no attribute '{}'", receiver.type_name(), name),
    ))
}

/// Whether `receiver` has a builtin method called `name`
pub fn has_method(receiver: &Value, name: &str) -> bool {
    match receiver {
        Value::List(_) => collections::LIST_METHODS.contains(&name),
        Value::Dict(_) => collections::DICT_METHODS.contains(&name),
        Value::Str(_) => strings::STR_METHODS.contains(&name),
        _ => false,
    }
}

/// Checks a positional argument count
pub(crate) fn expect_args(
    interp: &Interpreter,
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), Raised> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { min.to_string() } else { format!("{} to {}", min, max) };
        return Err(interp.error(
            "TypeError",
            format!("{}() takes {} arguments ({} given)", name, expected, args.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_native_is_an_error() {
        let mut interp = Interpreter::new();
        let env = Environment::module(interp.globals());
        let result = call_native_function(&mut interp, "no_such_function", Vec::new(), Vec::new(), &env);
        assert!(result.is_err());
    }

    #[test]
    fn test_keywords_rejected_where_unsupported() {
        let mut interp = Interpreter::new();
        let env = Environment::module(interp.globals());
        let kwargs = vec![("x".to_string(), Value::Int(1))];
        let raised = call_native_function(&mut interp, "len", vec![Value::str("a")], kwargs, &env).unwrap_err();
        assert_eq!(raised.value.to_display(), "len() takes no keyword arguments");
    }
}
