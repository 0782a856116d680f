// File: src/driver.rs
//
// Entry points tying the rewriter to the interpreter: rewriting source text,
// enabling `breakall` on live functions and running whole scripts.
//
// Enabling a function recovers the lines it was defined on, rewrites them and
// executes the rewritten definition against the function's own globals. The
// replacement is read back from a fresh local namespace, so the globals are
// untouched until the caller stores the result.

use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashSet;
use tracing::{debug, warn};

use crate::ast::{Module, StmtKind};
use crate::errors::{BreakAllError, Error};
use crate::interpreter::{new_namespace, Environment, Interpreter, Namespace, Raised, Value};
use crate::location::increment_lineno;
use crate::parser::parse_module;
use crate::rewriter::{is_alias, BreakAllRewriter, RewriteOptions, BREAKALL, ENABLE_BREAKALL};
use crate::unparse::unparse_module;

/// Parses `source` and applies the rewrite to every function and loop in it
pub fn rewrite_source(source: &str, options: &RewriteOptions) -> Result<Module, Error> {
    let module = parse_module(source, &options.filename)?;
    Ok(BreakAllRewriter::new(options).rewrite_module(module)?)
}

pub fn read_source(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// A function `enable_all` could not rewrite
#[derive(Debug, Clone, PartialEq)]
pub struct EnableFailure {
    pub name: String,
    pub error: Error,
}

/// Rewrites one function from its source and returns the replacement.
///
/// Fails with `BreakAllEnvironmentError` when the value has no recoverable
/// source (natives, lambdas, generated code), and with the rewrite diagnostic
/// when the body misuses `breakall`.
pub fn enable_breakall(interp: &mut Interpreter, function: &Value) -> Result<Value, Error> {
    enable_in_host(interp, function).map_err(|raised| interp.to_error(raised))
}

/// `enable_breakall` as seen from host code: failures stay raised objects
pub(crate) fn enable_in_host(interp: &mut Interpreter, function: &Value) -> Result<Value, Raised> {
    let Value::Function(original) = function else {
        let name = match function {
            Value::NativeFunction(name) => name.clone(),
            other => other.type_name(),
        };
        return Err(interp.diagnostic(no_source(&name)));
    };
    let (first, last) = original.lines;
    let Some((source, text)) = original.source.as_ref().and_then(|source| {
        source.lines(first, last).map(|text| (source.clone(), text))
    }) else {
        return Err(interp.diagnostic(no_source(&original.name)));
    };

    let line_offset = first - 1;
    let mut options = RewriteOptions::new(&source.filename).with_line_offset(line_offset);
    options.aliases.extend(aliases_in(&original.globals));

    let mut module = parse_module(&strip_indentation(&text), &source.filename)
        .map_err(|error| interp.error("SyntaxError", error.message))?;
    drop_outer_decorators(&mut module, &options.aliases);
    debug!(function = %original.name, first, last, "enabling breakall");

    let mut module = BreakAllRewriter::new(&options)
        .rewrite_module(module)
        .map_err(|diagnostic| interp.diagnostic(diagnostic))?;
    increment_lineno(&mut module, line_offset);

    let locals = new_namespace();
    let env = Environment::detached(original.globals.clone(), locals.clone());
    interp.exec_module(&module, &env, Some(source))?;

    let replacement = locals.borrow().get(&original.name).cloned();
    Ok(match replacement {
        Some(Value::Function(enabled)) => {
            enabled.supports_breakall.set(true);
            Value::Function(enabled)
        }
        Some(other) => other,
        None => {
            original.supports_breakall.set(false);
            function.clone()
        }
    })
}

/// Applies `enable_breakall` to every function bound in `namespace`, in name
/// order, storing each replacement back. Failures are logged and returned.
pub fn enable_all(interp: &mut Interpreter, namespace: &Namespace) -> Vec<EnableFailure> {
    let mut functions: Vec<(String, Value)> = namespace
        .borrow()
        .iter()
        .filter(|(_, value)| matches!(value, Value::Function(_)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    functions.sort_by(|a, b| a.0.cmp(&b.0));

    let mut failures = Vec::new();
    for (name, function) in functions {
        match enable_in_host(interp, &function) {
            Ok(enabled) => {
                namespace.borrow_mut().insert(name, enabled);
            }
            Err(raised) => {
                let error = interp.to_error(raised);
                warn!(function = %name, "Could not enable the `breakall` statement on the function `{}`", name);
                failures.push(EnableFailure { name, error });
            }
        }
    }
    failures
}

/// Zero-argument `enable_breakall()` called from host code
pub(crate) fn enable_all_in_host(interp: &mut Interpreter, namespace: &Namespace) {
    let failures = enable_all(interp, namespace);
    if !failures.is_empty() {
        debug!(count = failures.len(), "enable_breakall() skipped functions");
    }
}

pub fn supports_breakall(value: &Value) -> bool {
    match value {
        Value::Function(function) => function.supports_breakall.get(),
        _ => false,
    }
}

fn no_source(function: &str) -> BreakAllError {
    BreakAllError::environment(
        "No source code found",
        "The function source code could not be retrieved",
        function,
    )
}

/// Global names bound to the `enable_breakall` builtin
fn aliases_in(globals: &Namespace) -> AHashSet<String> {
    let mut aliases: AHashSet<String> = globals
        .borrow()
        .iter()
        .filter(|(_, value)| matches!(value, Value::NativeFunction(name) if name == ENABLE_BREAKALL))
        .map(|(name, _)| name.clone())
        .collect();
    aliases.insert(ENABLE_BREAKALL.to_string());
    aliases
}

/// Removes the decorators listed above the first alias. They are applied
/// again by the decorator chain that is calling us.
fn drop_outer_decorators(module: &mut Module, aliases: &AHashSet<String>) {
    let Some(StmtKind::FunctionDef(def)) = module.body.first_mut().map(|stmt| &mut stmt.kind) else {
        return;
    };
    if let Some(index) = def.decorators.iter().position(|decorator| is_alias(decorator, aliases)) {
        def.decorators.drain(..index);
    }
}

/// Removes the first line's indentation from every line
fn strip_indentation(text: &str) -> String {
    let indentation = text.chars().take_while(|c| *c == ' ' || *c == '\t').count();
    if indentation == 0 {
        return text.to_string();
    }
    text.lines()
        .map(|line| {
            let leading = line.chars().take_while(|c| *c == ' ' || *c == '\t').count();
            format!("{}\n", &line[leading.min(indentation)..])
        })
        .collect()
}

/// Settings of `run_file`
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Where to write the rewritten source: a path, or `-` for standard output
    pub output: Option<String>,
    /// Also rewrite every module the script imports from disk
    pub trace: bool,
    pub search_paths: Vec<PathBuf>,
    pub indicator: char,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { output: None, trace: false, search_paths: Vec::new(), indicator: '^' }
    }
}

/// Rewrites a script as a whole and executes it in the interpreter's
/// `__main__` namespace
pub fn run_file(interp: &mut Interpreter, path: &Path, options: &RunOptions) -> Result<(), Error> {
    let filename = path.display().to_string();
    let source = read_source(path)?;
    let rewrite_options = RewriteOptions::new(&filename).with_indicator(options.indicator);
    let module = rewrite_source(&source, &rewrite_options)?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        interp.module_loader.add_search_path(parent);
    }
    for search_path in &options.search_paths {
        interp.module_loader.add_search_path(search_path);
    }
    if options.trace {
        interp.module_loader.enable_trace(rewrite_options);
    }

    let breakall = interp.import_module(BREAKALL).map_err(|raised| interp.to_error(raised))?;
    interp.globals().borrow_mut().insert(BREAKALL.to_string(), breakall);

    debug!(file = %filename, "running rewritten script");
    interp.run_rewritten(&module, &source, &filename)?;

    if let Some(output) = &options.output {
        write_rewritten(interp, &module, output)?;
    }
    Ok(())
}

fn write_rewritten(interp: &mut Interpreter, module: &Module, output: &str) -> Result<(), Error> {
    let text = format!("{}\n", unparse_module(module));
    if output == "-" {
        interp.write_output(&text);
        return Ok(());
    }
    let path = Path::new(output);
    fs::write(path, text).map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn test_strip_indentation_uses_first_line() {
        let text = "    @dec\n    def f():\n        pass\n\n";
        assert_eq!(strip_indentation(text), "@dec\ndef f():\n    pass\n\n");
        assert_eq!(strip_indentation("def f():\n    pass\n"), "def f():\n    pass\n");
    }

    #[test]
    fn test_aliases_follow_bindings() {
        let globals = new_namespace();
        globals.borrow_mut().insert("eb".into(), Value::NativeFunction(ENABLE_BREAKALL.into()));
        globals.borrow_mut().insert("other".into(), Value::NativeFunction("print".into()));
        let aliases = aliases_in(&globals);
        assert!(aliases.contains("eb"));
        assert!(aliases.contains(ENABLE_BREAKALL));
        assert!(!aliases.contains("other"));
    }

    #[test]
    fn test_outer_decorators_are_dropped() {
        let mut module = parse_module("@outer\n@enable_breakall\n@inner\ndef f():\n    pass\n", "t.py").unwrap();
        let aliases: AHashSet<String> = [ENABLE_BREAKALL.to_string()].into_iter().collect();
        drop_outer_decorators(&mut module, &aliases);
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected a function");
        };
        let names: Vec<_> = def.decorators.iter().filter_map(|d| d.as_name()).collect();
        assert_eq!(names, vec!["enable_breakall", "inner"]);
    }

    #[test]
    fn test_natives_have_no_source() {
        let mut interp = Interpreter::new();
        let error = enable_breakall(&mut interp, &Value::NativeFunction("len".into())).unwrap_err();
        let diagnostic = error.as_breakall().unwrap();
        assert_eq!(diagnostic.title, "No source code found");
        assert_eq!(diagnostic.context.function, "len");
    }
}
