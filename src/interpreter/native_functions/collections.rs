// File: src/interpreter/native_functions/collections.rs
//
// List and dict methods

use super::expect_args;
use crate::interpreter::{Interpreter, Raised, Value};

pub const LIST_METHODS: &[&str] = &["append", "extend", "pop"];
pub const DICT_METHODS: &[&str] = &["get", "keys", "values", "items"];

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, Raised>> {
    let result = match (receiver, name) {
        (Value::List(items), "append") => {
            expect_args(interp, "append", args, 1, 1).map(|_| {
                items.borrow_mut().push(args[0].clone());
                Value::None
            })
        }
        (Value::List(items), "extend") => expect_args(interp, "extend", args, 1, 1)
            .and_then(|_| interp.iterate(&args[0]))
            .map(|extra| {
                items.borrow_mut().extend(extra);
                Value::None
            }),
        (Value::List(items), "pop") => pop(interp, &mut items.borrow_mut(), args),
        (Value::Dict(entries), "get") => expect_args(interp, "get", args, 1, 2).map(|_| {
            let entries = entries.borrow();
            let found = entries.iter().find(|(key, _)| *key == args[0]).map(|(_, value)| value.clone());
            found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None))
        }),
        (Value::Dict(entries), "keys") => expect_args(interp, "keys", args, 0, 0)
            .map(|_| Value::list(entries.borrow().iter().map(|(key, _)| key.clone()).collect())),
        (Value::Dict(entries), "values") => expect_args(interp, "values", args, 0, 0)
            .map(|_| Value::list(entries.borrow().iter().map(|(_, value)| value.clone()).collect())),
        (Value::Dict(entries), "items") => expect_args(interp, "items", args, 0, 0).map(|_| {
            let pairs = entries
                .borrow()
                .iter()
                .map(|(key, value)| Value::tuple(vec![key.clone(), value.clone()]))
                .collect();
            Value::list(pairs)
        }),
        _ => return None,
    };
    Some(result)
}

fn pop(interp: &Interpreter, items: &mut Vec<Value>, args: &[Value]) -> Result<Value, Raised> {
    expect_args(interp, "pop", args, 0, 1)?;
    if items.is_empty() {
        return Err(interp.error("IndexError", "pop from empty list"));
    }
    let index = match args.first() {
        None => items.len() - 1,
        Some(Value::Int(n)) => {
            let len = items.len() as i64;
            let index = if *n < 0 { n + len } else { *n };
            if !(0..len).contains(&index) {
                return Err(interp.error("IndexError", "pop index out of range"));
            }
            index as usize
        }
        Some(other) => {
            return Err(interp.error(
                "TypeError",
                format!("'{}' object cannot be interpreted as an integer", other.type_name()),
            ))
        }
    };
    Ok(items.remove(index))
}

/// Inserts or replaces `key` in a dict's entries
pub fn dict_set(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match entries.iter_mut().find(|(existing, _)| *existing == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_methods_mutate_in_place() {
        let mut interp = Interpreter::new();
        let list = Value::list(vec![Value::Int(1)]);
        call_method(&mut interp, &list, "append", &[Value::Int(2)]).unwrap().unwrap();
        call_method(&mut interp, &list, "extend", &[Value::tuple(vec![Value::Int(3)])]).unwrap().unwrap();
        assert_eq!(list.repr(), "[1, 2, 3]");
        let popped = call_method(&mut interp, &list, "pop", &[Value::Int(0)]).unwrap().unwrap();
        assert_eq!(popped, Value::Int(1));
        assert_eq!(list.repr(), "[2, 3]");
    }

    #[test]
    fn test_dict_get_default() {
        let mut interp = Interpreter::new();
        let mut entries = Vec::new();
        dict_set(&mut entries, Value::str("a"), Value::Int(1));
        dict_set(&mut entries, Value::str("a"), Value::Int(2));
        let dict = Value::Dict(std::rc::Rc::new(std::cell::RefCell::new(entries)));
        let found = call_method(&mut interp, &dict, "get", &[Value::str("a")]).unwrap().unwrap();
        assert_eq!(found, Value::Int(2));
        let missing = call_method(&mut interp, &dict, "get", &[Value::str("b"), Value::Int(0)]).unwrap().unwrap();
        assert_eq!(missing, Value::Int(0));
    }
}
