// File: src/interpreter/native_functions/io.rs
//
// I/O native functions

use crate::interpreter::{Interpreter, Raised, Value};

pub fn handle(
    interp: &mut Interpreter,
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Option<Result<Value, Raised>> {
    if name != "print" {
        return None;
    }
    Some(print(interp, args, kwargs))
}

fn print(interp: &mut Interpreter, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value, Raised> {
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    for (key, value) in kwargs {
        let text = match value {
            Value::None => continue,
            Value::Str(s) => s.to_string(),
            other => {
                return Err(interp.error(
                    "TypeError",
                    format!("{} must be None or a string, not {}", key, other.type_name()),
                ))
            }
        };
        match key.as_str() {
            "sep" => sep = text,
            "end" => end = text,
            other => {
                return Err(interp.error("TypeError", format!("'{}' is an invalid keyword argument for print()", other)))
            }
        }
    }

    let line: Vec<String> = args.iter().map(Value::to_display).collect();
    interp.write_output(&format!("{}{}", line.join(&sep), end));
    Ok(Value::None)
}
