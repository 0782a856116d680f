// File: src/interpreter/value.rs
//
// Runtime value types for the host language.
// Defines all value types that can be represented and manipulated at runtime.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::environment::Namespace;
use crate::ast::{Expr, Stmt};
use crate::errors::BreakAllError;
use crate::unparse::{float_repr, string_repr};

/// Source text a function was defined in
#[derive(Debug)]
pub struct SourceText {
    pub filename: String,
    pub text: Rc<str>,
    /// Whether the code executed from this text went through the rewriter
    pub rewritten: bool,
}

impl SourceText {
    pub fn new(filename: &str, text: &str) -> Rc<Self> {
        Rc::new(Self { filename: filename.to_string(), text: Rc::from(text), rewritten: false })
    }

    pub fn rewritten(filename: &str, text: &str) -> Rc<Self> {
        Rc::new(Self { filename: filename.to_string(), text: Rc::from(text), rewritten: true })
    }

    /// Lines `first..=last` (1-based), each ending with a newline
    pub fn lines(&self, first: usize, last: usize) -> Option<String> {
        if first == 0 || last < first {
            return None;
        }
        let selected: Vec<&str> = self.text.lines().skip(first - 1).take(last - first + 1).collect();
        if selected.is_empty() {
            return None;
        }
        Some(selected.iter().map(|line| format!("{}\n", line)).collect())
    }
}

/// What a function evaluates when called
#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Rc<Vec<Stmt>>),
    /// Lambda body
    Expr(Rc<Expr>),
}

/// A user-defined function or lambda
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    /// Default value per parameter, aligned with `params`
    pub defaults: Vec<Option<Value>>,
    pub vararg: Option<String>,
    pub body: FunctionBody,
    pub is_async: bool,
    pub globals: Namespace,
    pub closure: Vec<Namespace>,
    /// Where the definition lives; `None` for lambdas and generated code
    pub source: Option<Rc<SourceText>>,
    /// First line of the definition including decorators, and its last line
    pub lines: (usize, usize),
    pub supports_breakall: Cell<bool>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("is_async", &self.is_async)
            .finish()
    }
}

/// A builtin exception class
#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub bases: Vec<Rc<Class>>,
}

impl Class {
    pub fn new(name: &str, bases: Vec<Rc<Class>>) -> Rc<Self> {
        Rc::new(Self { name: name.to_string(), bases })
    }

    /// Whether `self` is `other` or derives from it
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self.name == other.name || self.bases.iter().any(|base| base.is_subclass_of(other))
    }
}

/// An exception instance
#[derive(Debug)]
pub struct ExceptionObject {
    pub class: Rc<Class>,
    pub message: String,
    /// Present when the exception carries a breakall diagnostic
    pub diagnostic: Option<BreakAllError>,
}

#[derive(Debug)]
pub struct ModuleObject {
    pub name: String,
    pub namespace: Namespace,
}

/// State of a coroutine created by calling an `async def`
#[derive(Debug)]
pub enum Coroutine {
    /// Arguments are bound; the body has not run
    Pending { function: Rc<Function>, locals: Namespace },
    /// Resolves to a value without running anything
    Ready(Value),
    /// Already awaited
    Done,
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    /// Insertion ordered key/value pairs
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    /// Native (built-in) function by name
    NativeFunction(String),
    /// Method of a builtin type bound to its receiver
    BoundMethod { receiver: Box<Value>, name: String },
    Class(Rc<Class>),
    Exception(Rc<ExceptionObject>),
    /// Exit request unwinding to the guard of the loop at this depth
    ExitMarker(usize),
    Module(Rc<ModuleObject>),
    Coroutine(Rc<RefCell<Coroutine>>),
}

impl Value {
    pub fn str(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Tuple(_) => "tuple".to_string(),
            Value::Dict(_) => "dict".to_string(),
            Value::Range { .. } => "range".to_string(),
            Value::Function(_) => "function".to_string(),
            Value::NativeFunction(_) => "builtin_function_or_method".to_string(),
            Value::BoundMethod { .. } => "builtin_function_or_method".to_string(),
            Value::Class(_) => "type".to_string(),
            Value::Exception(exception) => exception.class.name.clone(),
            Value::ExitMarker(_) => "ExitMarker".to_string(),
            Value::Module(_) => "module".to_string(),
            Value::Coroutine(_) => "coroutine".to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
            Value::Range { .. } => range_len(self) > 0,
            _ => true,
        }
    }

    /// `str(value)`
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(exception) => exception.message.clone(),
            _ => self.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => string_repr(s),
            Value::List(items) => {
                let items: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => {
                let items: Vec<String> = items.iter().map(Value::repr).collect();
                format!("({})", items.join(", "))
            }
            Value::Dict(entries) => {
                let entries: Vec<String> =
                    entries.borrow().iter().map(|(k, v)| format!("{}: {}", k.repr(), v.repr())).collect();
                format!("{{{}}}", entries.join(", "))
            }
            Value::Range { start, stop, step } if *step == 1 => format!("range({}, {})", start, stop),
            Value::Range { start, stop, step } => format!("range({}, {}, {})", start, stop, step),
            Value::Function(function) => format!("<function {}>", function.name),
            Value::NativeFunction(name) => format!("<built-in function {}>", name),
            Value::BoundMethod { receiver, name } => {
                format!("<built-in method {} of {} object>", name, receiver.type_name())
            }
            Value::Class(class) => format!("<class '{}'>", class.name),
            Value::Exception(exception) => {
                format!("{}({})", exception.class.name, string_repr(&exception.message))
            }
            Value::ExitMarker(depth) => format!("<exit marker for loop {}>", depth),
            Value::Module(module) => format!("<module '{}'>", module.name),
            Value::Coroutine(_) => "<coroutine object>".to_string(),
        }
    }
}

/// Number of items a range yields; wide ranges can exceed `i64::MAX`
pub fn range_len(value: &Value) -> i128 {
    let Value::Range { start, stop, step } = value else {
        return 0;
    };
    let (start, stop, step) = (i128::from(*start), i128::from(*stop), i128::from(*step));
    match step {
        step if step > 0 && stop > start => (stop - start + step - 1) / step,
        step if step < 0 && start > stop => (start - stop - step - 1) / -step,
        _ => 0,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (Value::Range { start, stop, step }, Value::Range { start: s2, stop: e2, step: t2 }) => {
                start == s2 && stop == e2 && step == t2
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => a.name == b.name,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::ExitMarker(a), Value::ExitMarker(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => Rc::ptr_eq(a, b),
            _ => match (self.as_number(), other.as_number()) {
                (Some(Number::Int(a)), Some(Number::Int(b))) => a == b,
                (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

/// Numeric view of a value; bools count as integers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }
}

impl Value {
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::str("1"), Value::Int(1));
    }

    #[test]
    fn test_repr() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(list.repr(), "[1, 'a', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::Float(2.0).to_display(), "2.0");
        assert_eq!(Value::str("x").to_display(), "x");
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(&Value::Range { start: 0, stop: 10, step: 3 }), 4);
        assert_eq!(range_len(&Value::Range { start: 5, stop: 0, step: -2 }), 3);
        assert_eq!(range_len(&Value::Range { start: 5, stop: 0, step: 1 }), 0);
        assert_eq!(range_len(&Value::Range { start: i64::MIN, stop: i64::MAX, step: 1 }), i128::from(u64::MAX));
        assert_eq!(range_len(&Value::Range { start: i64::MAX, stop: i64::MIN, step: i64::MIN }), 2);
    }

    #[test]
    fn test_exit_markers_compare_by_depth() {
        assert_eq!(Value::ExitMarker(2), Value::ExitMarker(2));
        assert_ne!(Value::ExitMarker(2), Value::ExitMarker(1));
    }

    #[test]
    fn test_source_lines() {
        let source = SourceText::new("t.py", "a\nb\nc\n");
        assert_eq!(source.lines(2, 3).as_deref(), Some("b\nc\n"));
        assert_eq!(source.lines(0, 1), None);
    }

    #[test]
    fn test_subclass_chain() {
        let base = Class::new("Exception", Vec::new());
        let runtime = Class::new("RuntimeError", vec![base.clone()]);
        let specific = Class::new("BreakAllRuntimeError", vec![runtime.clone()]);
        assert!(specific.is_subclass_of(&base));
        assert!(!base.is_subclass_of(&runtime));
    }
}
