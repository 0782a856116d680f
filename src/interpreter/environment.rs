// File: src/interpreter/environment.rs
//
// Lexical scoping environment for variable management in the interpreter.
// A module runs with one namespace serving as both globals and locals; each
// function call gets a fresh local namespace chained to the namespaces of the
// functions that lexically enclose it.

use super::value::Value;
use ahash::{AHashMap, AHashSet};
use std::cell::RefCell;
use std::rc::Rc;

/// Shared mutable mapping from names to values
pub type Namespace = Rc<RefCell<AHashMap<String, Value>>>;

/// Creates an empty namespace
pub fn new_namespace() -> Namespace {
    Rc::new(RefCell::new(AHashMap::new()))
}

/// Variable storage for one executing frame
///
/// Lookup searches the local namespace, then the enclosing function
/// namespaces innermost first, then the globals. Assignment writes locals
/// unless the frame declared the name `global` or `nonlocal`.
///
/// # Examples
///
/// ```ignore
/// let globals = new_namespace();
/// let module = Environment::module(globals.clone());
/// module.assign("x", Value::Int(10));
///
/// let call = Environment::function(globals, new_namespace(), Vec::new(), Default::default());
/// call.assign("x", Value::Int(20));                // shadows the global
/// assert_eq!(module.lookup("x"), Some(Value::Int(10)));
/// ```
#[derive(Clone, Debug)]
pub struct Environment {
    pub globals: Namespace,
    pub locals: Namespace,
    /// Namespaces of lexically enclosing function calls, innermost first
    pub enclosing: Vec<Namespace>,
    pub declarations: Rc<Declarations>,
    /// Whether `locals` belongs to a function call
    is_function: bool,
}

/// Names a function body declared `global` or `nonlocal`
#[derive(Clone, Debug, Default)]
pub struct Declarations {
    pub global: AHashSet<String>,
    pub nonlocal: AHashSet<String>,
}

impl Environment {
    /// Frame for module level code
    pub fn module(globals: Namespace) -> Self {
        Self {
            locals: globals.clone(),
            globals,
            enclosing: Vec::new(),
            declarations: Rc::new(Declarations::default()),
            is_function: false,
        }
    }

    /// Module level frame with separate locals, as used when re-executing a
    /// rewritten definition
    pub fn detached(globals: Namespace, locals: Namespace) -> Self {
        Self {
            globals,
            locals,
            enclosing: Vec::new(),
            declarations: Rc::new(Declarations::default()),
            is_function: false,
        }
    }

    /// Frame for one function call
    pub fn function(
        globals: Namespace,
        locals: Namespace,
        enclosing: Vec<Namespace>,
        declarations: Declarations,
    ) -> Self {
        Self { globals, locals, enclosing, declarations: Rc::new(declarations), is_function: true }
    }

    /// Namespaces a function defined in this frame closes over
    pub fn closure(&self) -> Vec<Namespace> {
        if !self.is_function {
            return Vec::new();
        }
        let mut closure = Vec::with_capacity(self.enclosing.len() + 1);
        closure.push(self.locals.clone());
        closure.extend(self.enclosing.iter().cloned());
        closure
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if self.declarations.global.contains(name) {
            return self.globals.borrow().get(name).cloned();
        }
        if let Some(value) = self.locals.borrow().get(name) {
            return Some(value.clone());
        }
        for scope in &self.enclosing {
            if let Some(value) = scope.borrow().get(name) {
                return Some(value.clone());
            }
        }
        self.globals.borrow().get(name).cloned()
    }

    pub fn assign(&self, name: &str, value: Value) {
        if self.declarations.global.contains(name) {
            self.globals.borrow_mut().insert(name.to_string(), value);
            return;
        }
        if self.declarations.nonlocal.contains(name) {
            if let Some(scope) = self.enclosing.iter().find(|scope| scope.borrow().contains_key(name)) {
                scope.borrow_mut().insert(name.to_string(), value);
                return;
            }
        }
        self.locals.borrow_mut().insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_locals_shadow_globals() {
        let globals = new_namespace();
        let module = Environment::module(globals.clone());
        module.assign("x", Value::Int(10));

        let call = Environment::function(globals, new_namespace(), Vec::new(), Declarations::default());
        assert_eq!(call.lookup("x"), Some(Value::Int(10)));
        call.assign("x", Value::Int(20));
        assert_eq!(call.lookup("x"), Some(Value::Int(20)));
        assert_eq!(module.lookup("x"), Some(Value::Int(10)));
    }

    #[test]
    fn test_global_and_nonlocal_declarations() {
        let globals = new_namespace();
        let outer = new_namespace();
        outer.borrow_mut().insert("count".to_string(), Value::Int(0));

        let mut declarations = Declarations::default();
        declarations.global.insert("total".to_string());
        declarations.nonlocal.insert("count".to_string());
        let call = Environment::function(globals.clone(), new_namespace(), vec![outer.clone()], declarations);

        call.assign("total", Value::Int(5));
        call.assign("count", Value::Int(1));
        assert_eq!(globals.borrow().get("total"), Some(&Value::Int(5)));
        assert_eq!(outer.borrow().get("count"), Some(&Value::Int(1)));
        assert!(call.locals.borrow().is_empty());
    }

    #[test]
    fn test_module_frames_close_over_nothing() {
        let module = Environment::module(new_namespace());
        assert!(module.closure().is_empty());
        let call = Environment::function(new_namespace(), new_namespace(), Vec::new(), Declarations::default());
        assert_eq!(call.closure().len(), 1);
    }
}
