// File: src/builtins.rs
//
// Built-in names of the host language: the builtin function table, the
// exception class hierarchy and the builtin modules (`breakall`,
// `breakall.runtime`, `breakall.exceptions`, `asyncio`). The functions
// themselves are implemented in `interpreter::native_functions`.

use std::rc::Rc;

use ahash::AHashMap;

use crate::interpreter::{new_namespace, Class, ModuleObject, Namespace, Value};

/// Builtin functions available in every module without an import
pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "print",
    "range",
    "len",
    "int",
    "str",
    "float",
    "bool",
    "list",
    "tuple",
    "abs",
    "min",
    "max",
    "sum",
    "repr",
    "isinstance",
    "enumerate",
    "ExitMarker",
];

/// Exception classes as (name, bases), parents before children
const EXCEPTION_HIERARCHY: &[(&str, &[&str])] = &[
    ("BaseException", &[]),
    ("Exception", &["BaseException"]),
    ("RuntimeError", &["Exception"]),
    ("NotImplementedError", &["RuntimeError"]),
    ("SyntaxError", &["Exception"]),
    ("ValueError", &["Exception"]),
    ("TypeError", &["Exception"]),
    ("NameError", &["Exception"]),
    ("LookupError", &["Exception"]),
    ("IndexError", &["LookupError"]),
    ("KeyError", &["LookupError"]),
    ("ArithmeticError", &["Exception"]),
    ("ZeroDivisionError", &["ArithmeticError"]),
    ("OverflowError", &["ArithmeticError"]),
    ("AttributeError", &["Exception"]),
    ("ImportError", &["Exception"]),
    ("AssertionError", &["Exception"]),
    ("BreakAllError", &["Exception"]),
    ("BreakAllSyntaxError", &["BreakAllError", "SyntaxError"]),
    ("BreakAllRuntimeError", &["BreakAllError", "RuntimeError"]),
    ("BreakAllEnvironmentError", &["BreakAllError"]),
];

/// Names exported by `breakall.exceptions` (and re-exported by `breakall`)
const BREAKALL_EXCEPTIONS: &[&str] =
    &["BreakAllError", "BreakAllSyntaxError", "BreakAllRuntimeError", "BreakAllEnvironmentError"];

/// Builds every builtin exception class, keyed by name
pub fn exception_classes() -> AHashMap<String, Rc<Class>> {
    let mut classes: AHashMap<String, Rc<Class>> = AHashMap::new();
    for (name, bases) in EXCEPTION_HIERARCHY {
        let bases = bases.iter().filter_map(|base| classes.get(*base).cloned()).collect();
        classes.insert(name.to_string(), Class::new(name, bases));
    }
    classes
}

/// Namespace searched after a module's globals
pub fn builtin_namespace(classes: &AHashMap<String, Rc<Class>>) -> Namespace {
    let namespace = new_namespace();
    {
        let mut names = namespace.borrow_mut();
        for name in BUILTIN_FUNCTIONS {
            names.insert(name.to_string(), Value::NativeFunction(name.to_string()));
        }
        for (name, class) in classes {
            if !BREAKALL_EXCEPTIONS.contains(&name.as_str()) {
                names.insert(name.clone(), Value::Class(class.clone()));
            }
        }
        names.insert("True".to_string(), Value::Bool(true));
        names.insert("False".to_string(), Value::Bool(false));
        names.insert("None".to_string(), Value::None);
    }
    namespace
}

/// Modules served without touching the file system
pub fn builtin_module(name: &str, classes: &AHashMap<String, Rc<Class>>) -> Option<Value> {
    let exports: Vec<(String, Value)> = match name {
        "breakall" => {
            let mut exports = vec![
                // Importable so that unrewritten code and linters see a defined name
                ("breakall".to_string(), Value::str("breakall")),
                ("enable_breakall".to_string(), Value::NativeFunction("enable_breakall".to_string())),
                ("supports_breakall".to_string(), Value::NativeFunction("supports_breakall".to_string())),
                ("__version__".to_string(), Value::str(env!("CARGO_PKG_VERSION"))),
            ];
            exports.extend(runtime_exports());
            exports.extend(exception_exports(classes));
            for submodule in ["breakall.runtime", "breakall.exceptions"] {
                if let Some(value) = builtin_module(submodule, classes) {
                    exports.push((submodule.trim_start_matches("breakall.").to_string(), value));
                }
            }
            exports
        }
        "breakall.runtime" => runtime_exports(),
        "breakall.exceptions" => exception_exports(classes),
        "asyncio" => vec![
            ("run".to_string(), Value::NativeFunction("asyncio.run".to_string())),
            ("sleep".to_string(), Value::NativeFunction("asyncio.sleep".to_string())),
        ],
        _ => return None,
    };

    let namespace = new_namespace();
    namespace.borrow_mut().extend(exports);
    Some(Value::Module(Rc::new(ModuleObject { name: name.to_string(), namespace })))
}

fn runtime_exports() -> Vec<(String, Value)> {
    ["destination_from_break_count", "destination_from_loop_number"]
        .iter()
        .map(|name| (name.to_string(), Value::NativeFunction(name.to_string())))
        .collect()
}

fn exception_exports(classes: &AHashMap<String, Rc<Class>>) -> Vec<(String, Value)> {
    BREAKALL_EXCEPTIONS
        .iter()
        .filter_map(|name| classes.get(*name).map(|class| (name.to_string(), Value::Class(class.clone()))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakall_errors_extend_host_classes() {
        let classes = exception_classes();
        let syntax = &classes["BreakAllSyntaxError"];
        assert!(syntax.is_subclass_of(&classes["SyntaxError"]));
        assert!(syntax.is_subclass_of(&classes["BreakAllError"]));
        assert!(classes["BreakAllRuntimeError"].is_subclass_of(&classes["RuntimeError"]));
        assert!(!classes["BreakAllEnvironmentError"].is_subclass_of(&classes["RuntimeError"]));
    }

    #[test]
    fn test_breakall_module_exports() {
        let classes = exception_classes();
        let Some(Value::Module(module)) = builtin_module("breakall", &classes) else {
            panic!("breakall module missing");
        };
        let names = module.namespace.borrow();
        assert!(names.contains_key("enable_breakall"));
        assert!(names.contains_key("destination_from_loop_number"));
        assert!(matches!(names.get("runtime"), Some(Value::Module(_))));
        assert!(builtin_module("nope", &classes).is_none());
    }

    #[test]
    fn test_builtin_namespace_hides_breakall_exceptions() {
        let classes = exception_classes();
        let namespace = builtin_namespace(&classes);
        assert!(namespace.borrow().contains_key("ValueError"));
        assert!(!namespace.borrow().contains_key("BreakAllError"));
    }
}
