// File: src/interpreter/native_functions/async_ops.rs
//
// The `asyncio` module. Coroutines run to completion when awaited, so an
// `async for` behaves exactly like `for` and counts as one loop level.

use std::cell::RefCell;
use std::rc::Rc;

use super::expect_args;
use crate::interpreter::{Coroutine, Interpreter, Raised, Value};

pub fn handle(interp: &mut Interpreter, name: &str, args: &[Value]) -> Option<Result<Value, Raised>> {
    let result = match name {
        "asyncio.run" => {
            expect_args(interp, "run", args, 1, 1).and_then(|_| match &args[0] {
                Value::Coroutine(_) => interp.await_value(args[0].clone()),
                other => Err(interp.error(
                    "ValueError",
                    format!("a coroutine was expected, got {}", other.repr()),
                )),
            })
        }
        "asyncio.sleep" => expect_args(interp, "sleep", args, 1, 2).and_then(|_| match args[0].as_number() {
            Some(_) => {
                let result = args.get(1).cloned().unwrap_or(Value::None);
                Ok(Value::Coroutine(Rc::new(RefCell::new(Coroutine::Ready(result)))))
            }
            None => Err(interp.error(
                "TypeError",
                format!("'{}' object cannot be interpreted as a delay", args[0].type_name()),
            )),
        }),
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_resolves_immediately() {
        let mut interp = Interpreter::new();
        let coroutine = handle(&mut interp, "asyncio.sleep", &[Value::Int(0), Value::str("done")]).unwrap().unwrap();
        let result = handle(&mut interp, "asyncio.run", &[coroutine.clone()]).unwrap().unwrap();
        assert_eq!(result, Value::str("done"));
        assert!(interp.await_value(coroutine).is_err());
    }
}
