// File: src/interpreter/native_functions/breakall_ops.rs
//
// Host bindings of the breakall package: `ExitMarker`, `enable_breakall`,
// `supports_breakall` and the run-time destination resolvers that rewritten
// code imports from `breakall.runtime`.

use crate::driver;
use crate::errors::DiagnosticContext;
use crate::interpreter::{Environment, Interpreter, Raised, Value};
use crate::rewriter::resolve::{ExitForm, Magnitude};
use crate::runtime;

/// Parameters of the resolvers after the magnitude, in positional order
const CONTEXT_PARAMS: &[&str] = &[
    "current_loop",
    "filename",
    "line",
    "function",
    "col_offset",
    "spacing",
    "unparsed_node",
    "error_length",
    "indicator",
];

pub fn handle(
    interp: &mut Interpreter,
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    env: &Environment,
) -> Option<Result<Value, Raised>> {
    let result = match name {
        "ExitMarker" => exit_marker(interp, args),
        "enable_breakall" => match args {
            [] => {
                driver::enable_all_in_host(interp, &env.globals);
                Ok(Value::None)
            }
            [function] => driver::enable_in_host(interp, function),
            _ => Err(interp.error(
                "TypeError",
                format!("enable_breakall() takes at most 1 argument ({} given)", args.len()),
            )),
        },
        "supports_breakall" => match args {
            [function] => Ok(Value::Bool(driver::supports_breakall(function))),
            _ => Err(interp.error("TypeError", "supports_breakall() takes exactly one argument")),
        },
        "destination_from_break_count" => resolve(interp, ExitForm::Count, args, kwargs),
        "destination_from_loop_number" => resolve(interp, ExitForm::LoopNumber, args, kwargs),
        _ => return None,
    };
    Some(result)
}

fn exit_marker(interp: &Interpreter, args: &[Value]) -> Result<Value, Raised> {
    match args {
        [Value::Int(depth)] if *depth >= 1 => Ok(Value::ExitMarker(*depth as usize)),
        [other] => Err(interp.error(
            "ValueError",
            format!("ExitMarker() depth must be a positive integer, not {}", other.repr()),
        )),
        _ => Err(interp.error("TypeError", "ExitMarker() takes exactly one argument")),
    }
}

/// Converts a host value into a magnitude the way `int()` sees it
fn magnitude(value: &Value) -> Magnitude {
    match value {
        Value::Int(n) => Magnitude::Int(*n),
        Value::Float(f) => Magnitude::Float(*f),
        Value::Bool(b) => Magnitude::Bool(*b),
        Value::Str(s) => Magnitude::Str(s.to_string()),
        other => Magnitude::Other(other.to_display()),
    }
}

fn resolve(
    interp: &Interpreter,
    form: ExitForm,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<Value, Raised> {
    let (function_name, magnitude_name) = match form {
        ExitForm::Count => ("destination_from_break_count", "count"),
        ExitForm::LoopNumber => ("destination_from_loop_number", "loop"),
    };
    let mut names = vec![magnitude_name];
    names.extend_from_slice(CONTEXT_PARAMS);

    let mut bound: Vec<Option<Value>> = vec![None; names.len()];
    if args.len() > names.len() {
        return Err(interp.error(
            "TypeError",
            format!("{}() takes at most {} arguments ({} given)", function_name, names.len(), args.len()),
        ));
    }
    for (slot, value) in bound.iter_mut().zip(args) {
        *slot = Some(value.clone());
    }
    for (key, value) in kwargs {
        let Some(index) = names.iter().position(|name| name == key) else {
            return Err(interp.error(
                "TypeError",
                format!("{}() got an unexpected keyword argument '{}'", function_name, key),
            ));
        };
        if bound[index].is_some() {
            return Err(interp.error(
                "TypeError",
                format!("{}() got multiple values for argument '{}'", function_name, key),
            ));
        }
        bound[index] = Some(value.clone());
    }

    let missing = names
        .iter()
        .zip(&bound)
        .take(names.len() - 1)
        .find(|(_, value)| value.is_none())
        .map(|(name, _)| *name);
    if let Some(name) = missing {
        return Err(interp.error(
            "TypeError",
            format!("{}() missing required argument: '{}'", function_name, name),
        ));
    }

    let int = |index: usize| -> Result<usize, Raised> {
        match &bound[index] {
            Some(Value::Int(n)) if *n >= 0 => Ok(*n as usize),
            other => Err(interp.error(
                "TypeError",
                format!(
                    "{}() argument '{}' must be a non-negative int, not {}",
                    function_name,
                    names[index],
                    other.as_ref().map_or("None".to_string(), Value::type_name)
                ),
            )),
        }
    };
    let text = |index: usize| bound[index].as_ref().map(Value::to_display).unwrap_or_default();

    let current_loop = int(1)?;
    let context = DiagnosticContext {
        filename: text(2),
        line: int(3)?,
        function: text(4),
        col_offset: int(5)?,
        spacing: int(6)?,
        unparsed_node: text(7),
        error_length: int(8)?,
        indicator: match &bound[9] {
            Some(value) => value.to_display().chars().next().unwrap_or('^'),
            None => '^',
        },
    };
    let raw = bound[0].as_ref().map(magnitude).unwrap_or(Magnitude::Other("None".to_string()));

    runtime::destination(form, &raw, current_loop, context)
        .map(|depth| Value::Int(depth as i64))
        .map_err(|diagnostic| interp.diagnostic(diagnostic))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(count: Value, current_loop: i64) -> Vec<(String, Value)> {
        vec![
            ("count".to_string(), count),
            ("current_loop".to_string(), Value::Int(current_loop)),
            ("filename".to_string(), Value::str("t.py")),
            ("line".to_string(), Value::Int(4)),
            ("function".to_string(), Value::str("f")),
            ("col_offset".to_string(), Value::Int(8)),
            ("spacing".to_string(), Value::Int(10)),
            ("unparsed_node".to_string(), Value::str("breakall: n")),
            ("error_length".to_string(), Value::Int(1)),
        ]
    }

    #[test]
    fn test_resolver_binding_returns_depth() {
        let interp = Interpreter::new();
        let depth = resolve(&interp, ExitForm::Count, &[], &keywords(Value::Int(2), 3)).unwrap();
        assert_eq!(depth, Value::Int(2));
    }

    #[test]
    fn test_resolver_binding_raises_diagnostic() {
        let interp = Interpreter::new();
        let raised = resolve(&interp, ExitForm::Count, &[], &keywords(Value::str("x"), 3)).unwrap_err();
        let Value::Exception(exception) = &raised.value else {
            panic!("expected an exception");
        };
        assert_eq!(exception.class.name, "BreakAllRuntimeError");
        let diagnostic = exception.diagnostic.as_ref().unwrap();
        assert_eq!(diagnostic.message, "Cannot parse the break count `x`");
        assert_eq!(diagnostic.context.unparsed_node, "breakall: n");
    }

    #[test]
    fn test_resolver_binding_rejects_unknown_keywords() {
        let interp = Interpreter::new();
        let mut kwargs = keywords(Value::Int(1), 1);
        kwargs.push(("colour".to_string(), Value::None));
        assert!(resolve(&interp, ExitForm::Count, &[], &kwargs).is_err());
    }

    #[test]
    fn test_exit_marker_requires_positive_depth() {
        let interp = Interpreter::new();
        assert_eq!(exit_marker(&interp, &[Value::Int(2)]).unwrap(), Value::ExitMarker(2));
        assert!(exit_marker(&interp, &[Value::Int(0)]).is_err());
    }
}
