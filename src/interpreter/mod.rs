// File: src/interpreter/mod.rs
//
// Tree-walking interpreter for the host language.
// Executes programs (rewritten or not) by traversing the Abstract Syntax Tree.
//
// Statements produce a `ControlFlow` signal; raised objects unwind through
// `Err(Raised)`. Exit markers produced by rewritten code travel the same way
// as exceptions but only an `except <marker>` clause of the same depth stops
// them, so user handlers see exactly what a plain `break` would show them.
//
// It supports:
// - Functions, lambdas and closures with lexical scoping (`global`/`nonlocal`)
// - try/except/else/finally with a builtin exception hierarchy
// - for/while loops with `else`, `async def`/`await`/`async for`
// - Imports of builtin modules and of `.py` files on the search path

mod control_flow;
mod environment;
pub mod native_functions;
pub mod operators;
mod value;

pub use control_flow::{ControlFlow, Raised};
pub use environment::{new_namespace, Declarations, Environment, Namespace};
pub use value::{
    range_len, Class, Coroutine, ExceptionObject, Function, FunctionBody, ModuleObject, Number, SourceText,
    Value,
};

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::ast::{
    Alias, Expr, ExprKind, FStringPart, FunctionDef, Keyword, Location, Module, Stmt, StmtKind,
};
use crate::builtins;
use crate::errors::{BreakAllError, Error, HostError, SourceLocation};
use crate::module::{ModuleLoader, ModuleSource};
use crate::parser::parse_module;
use crate::rewriter::BreakAllRewriter;
use native_functions::collections::dict_set;

/// Nested calls allowed before `RuntimeError: maximum recursion depth exceeded`
const MAX_CALL_DEPTH: usize = 64;

/// Main interpreter that executes host programs
pub struct Interpreter {
    builtins: Namespace,
    globals: Namespace,
    classes: AHashMap<String, Rc<Class>>,
    output: Option<Arc<Mutex<Vec<u8>>>>,
    pub module_loader: ModuleLoader,
    call_stack: Vec<String>,
    /// File and statement currently executing
    filename: String,
    location: Location,
    source: Option<Rc<SourceText>>,
    /// Every source text executed so far, for error excerpts
    sources: AHashMap<String, Rc<SourceText>>,
    /// Exceptions being handled, innermost last
    handling: Vec<Raised>,
}

/// Items of a `for` loop; ranges are produced lazily
enum LoopItems {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
}

/// `breakall @ K` or `breakall: N` reaching the host unrewritten
fn is_unrewritten_exit(line: &str) -> bool {
    line.trim_start()
        .strip_prefix("breakall")
        .map_or(false, |rest| rest.trim_start().starts_with(['@', ':']))
}

impl Iterator for LoopItems {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            LoopItems::Range { next, stop, step } => {
                let done = if *step > 0 { *next >= *stop } else { *next <= *stop };
                if done {
                    return None;
                }
                let current = *next;
                *next = next.saturating_add(*step);
                Some(Value::Int(current))
            }
            LoopItems::Items(items) => items.next(),
        }
    }
}

impl Interpreter {
    /// Creates a new interpreter with an empty `__main__` namespace
    pub fn new() -> Self {
        let classes = builtins::exception_classes();
        let builtins = builtins::builtin_namespace(&classes);
        let globals = new_namespace();
        globals.borrow_mut().insert("__name__".to_string(), Value::str("__main__"));
        Interpreter {
            builtins,
            globals,
            classes,
            output: None,
            module_loader: ModuleLoader::new(),
            call_stack: Vec::new(),
            filename: "<string>".to_string(),
            location: Location::default(),
            source: None,
            sources: AHashMap::new(),
            handling: Vec::new(),
        }
    }

    /// The `__main__` namespace
    pub fn globals(&self) -> Namespace {
        self.globals.clone()
    }

    /// Sets the output sink for print statements (used for testing)
    pub fn set_output(&mut self, output: Arc<Mutex<Vec<u8>>>) {
        self.output = Some(output);
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        match &self.output {
            Some(output) => {
                if let Ok(mut buffer) = output.lock() {
                    buffer.extend_from_slice(text.as_bytes());
                }
            }
            None => {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
        }
    }

    /// Get the current call stack for error reporting
    pub fn get_call_stack(&self) -> Vec<String> {
        self.call_stack.clone()
    }

    /// Parses and runs `source` in the `__main__` namespace
    pub fn run_source(&mut self, source: &str, filename: &str) -> Result<(), Error> {
        let module = parse_module(source, filename)?;
        self.run_module(&module, source, filename)
    }

    /// Runs an already parsed (possibly rewritten) module in `__main__`.
    /// `source` is the text the module's positions refer to.
    pub fn run_module(&mut self, module: &Module, source: &str, filename: &str) -> Result<(), Error> {
        let env = Environment::module(self.globals.clone());
        self.exec_module(module, &env, Some(SourceText::new(filename, source)))
            .map_err(|raised| self.to_error(raised))
    }

    /// Runs a module produced by the rewriter; functions it defines report
    /// `supports_breakall`
    pub fn run_rewritten(&mut self, module: &Module, source: &str, filename: &str) -> Result<(), Error> {
        let env = Environment::module(self.globals.clone());
        self.exec_module(module, &env, Some(SourceText::rewritten(filename, source)))
            .map_err(|raised| self.to_error(raised))
    }

    /// Executes a module body in `env`
    pub fn exec_module(
        &mut self,
        module: &Module,
        env: &Environment,
        source: Option<Rc<SourceText>>,
    ) -> Result<(), Raised> {
        let saved = self.save_position();
        if let Some(source) = source {
            self.filename = source.filename.clone();
            self.sources.insert(source.filename.clone(), source.clone());
            self.source = Some(source);
        }
        let result = self.exec_block(&module.body, env);
        self.restore_position(saved);
        result.map(|_| ())
    }

    /// Calls a host callable from Rust
    pub fn call(&mut self, function: &Value, args: Vec<Value>) -> Result<Value, Error> {
        let env = Environment::module(self.globals.clone());
        self.call_value(function, args, Vec::new(), &env).map_err(|raised| self.to_error(raised))
    }

    /// Looks up a builtin exception class
    pub fn class(&self, name: &str) -> Option<Rc<Class>> {
        self.classes.get(name).cloned()
    }

    // ----- raising -----

    /// A new exception of builtin class `class`, raised at the current position
    pub(crate) fn error(&self, class: &str, message: impl Into<String>) -> Raised {
        let class = self
            .classes
            .get(class)
            .or_else(|| self.classes.get("Exception"))
            .cloned()
            .unwrap_or_else(|| Class::new(class, Vec::new()));
        let exception = ExceptionObject { class, message: message.into(), diagnostic: None };
        Raised::new(Value::Exception(Rc::new(exception))).at(&self.filename, self.location)
    }

    /// A breakall diagnostic raised as its host exception class
    pub(crate) fn diagnostic(&self, diagnostic: BreakAllError) -> Raised {
        let class_name = diagnostic.kind.class_name();
        let class = self.classes.get(class_name).cloned().unwrap_or_else(|| Class::new(class_name, Vec::new()));
        let exception = ExceptionObject { class, message: diagnostic.body(), diagnostic: Some(diagnostic) };
        Raised::new(Value::Exception(Rc::new(exception))).at(&self.filename, self.location)
    }

    /// Converts an object that escaped to the top level into a crate error
    pub fn to_error(&self, raised: Raised) -> Error {
        let (filename, location) = raised.origin.clone().unwrap_or_else(|| (self.filename.clone(), self.location));
        let (class, message) = match &raised.value {
            Value::Exception(exception) => {
                if let Some(diagnostic) = &exception.diagnostic {
                    return Error::BreakAll(diagnostic.clone());
                }
                (exception.class.name.clone(), exception.message.clone())
            }
            Value::ExitMarker(depth) => {
                ("RuntimeError".to_string(), format!("exit marker for loop {} escaped its guard", depth))
            }
            other => ("RuntimeError".to_string(), format!("unhandled object {}", other.repr())),
        };

        let mut error = HostError::exception(
            &class,
            message,
            SourceLocation::with_file(location.line, location.column + 1, filename.clone()),
        );
        if let Some(line) = self.source_line(&filename, location.line) {
            if class == "TypeError" && is_unrewritten_exit(&line) {
                error = error.with_help(
                    "`breakall` statements only work in rewritten code; decorate the function with \
                     `@enable_breakall` or run the file with `breakall run`"
                        .to_string(),
                );
            }
            error = error.with_source(line);
        }
        Error::Host(error)
    }

    fn source_line(&self, filename: &str, line: usize) -> Option<String> {
        let source = self.sources.get(filename)?;
        source.text.lines().nth(line.checked_sub(1)?).map(str::to_string)
    }

    fn save_position(&self) -> (String, Location, Option<Rc<SourceText>>) {
        (self.filename.clone(), self.location, self.source.clone())
    }

    fn restore_position(&mut self, saved: (String, Location, Option<Rc<SourceText>>)) {
        (self.filename, self.location, self.source) = saved;
    }

    // ----- statements -----

    /// Executes statements in order until one changes the control flow
    pub fn exec_block(&mut self, body: &[Stmt], env: &Environment) -> Result<ControlFlow, Raised> {
        for stmt in body {
            let flow = self.exec_stmt(stmt, env)?;
            if flow != ControlFlow::Normal {
                return Ok(flow);
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Environment) -> Result<ControlFlow, Raised> {
        self.location = stmt.location;
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.define_function(def, stmt.location, env)?;
            }
            StmtKind::Return { value } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::None,
                };
                return Ok(ControlFlow::Return(value));
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(value, env)?;
                for target in targets {
                    self.assign_target(target, value.clone(), env)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.exec_aug_assign(target, *op, value, env)?,
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval_expr(value, env)?;
                    self.assign_target(target, value, env)?;
                }
            }
            StmtKind::For { target, iter, body, orelse, .. } => {
                let iterable = self.eval_expr(iter, env)?;
                let items = self.loop_items(&iterable)?;
                for item in items {
                    self.assign_target(target, item, env)?;
                    match self.exec_block(body, env)? {
                        ControlFlow::Break => return Ok(ControlFlow::Normal),
                        ControlFlow::Normal | ControlFlow::Continue => {}
                        flow @ ControlFlow::Return(_) => return Ok(flow),
                    }
                }
                return self.exec_block(orelse, env);
            }
            StmtKind::While { test, body, orelse } => {
                while self.eval_expr(test, env)?.is_truthy() {
                    match self.exec_block(body, env)? {
                        ControlFlow::Break => return Ok(ControlFlow::Normal),
                        ControlFlow::Normal | ControlFlow::Continue => {}
                        flow @ ControlFlow::Return(_) => return Ok(flow),
                    }
                }
                return self.exec_block(orelse, env);
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval_expr(test, env)?.is_truthy() { body } else { orelse };
                return self.exec_block(branch, env);
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                return self.exec_try(body, handlers, orelse, finalbody, env);
            }
            StmtKind::Raise { exc, cause } => return Err(self.exec_raise(exc.as_ref(), cause.as_ref(), stmt, env)),
            StmtKind::Import { names } => {
                for alias in names {
                    self.exec_import(alias, env)?;
                }
            }
            StmtKind::ImportFrom { module, names } => self.exec_import_from(module, names, env)?,
            StmtKind::Global { .. } | StmtKind::Nonlocal { .. } | StmtKind::Pass => {}
            StmtKind::Expr { value } => {
                self.eval_expr(value, env)?;
            }
            StmtKind::Break => return Ok(ControlFlow::Break),
            StmtKind::Continue => return Ok(ControlFlow::Continue),
        }
        Ok(ControlFlow::Normal)
    }

    fn define_function(&mut self, def: &FunctionDef, location: Location, env: &Environment) -> Result<(), Raised> {
        let mut decorators = Vec::with_capacity(def.decorators.len());
        for decorator in &def.decorators {
            decorators.push(self.eval_expr(decorator, env)?);
        }
        let defaults = self.eval_defaults(&def.params, env)?;
        let first_line = def
            .decorators
            .iter()
            .map(|decorator| decorator.location.line)
            .filter(|line| *line > 0)
            .chain(std::iter::once(location.line))
            .min()
            .unwrap_or(location.line);

        let function = Function {
            name: def.name.clone(),
            params: def.params.args.iter().map(|param| param.name.clone()).collect(),
            defaults,
            vararg: def.params.vararg.clone(),
            body: FunctionBody::Block(Rc::new(def.body.clone())),
            is_async: def.is_async,
            globals: env.globals.clone(),
            closure: env.closure(),
            source: self.source.clone(),
            lines: (first_line, location.end_line),
            supports_breakall: Cell::new(self.source.as_ref().map_or(false, |source| source.rewritten)),
        };

        let mut value = Value::Function(Rc::new(function));
        for decorator in decorators.iter().rev() {
            value = self.call_value(decorator, vec![value], Vec::new(), env)?;
        }
        env.assign(&def.name, value);
        Ok(())
    }

    fn eval_defaults(&mut self, params: &crate::ast::Parameters, env: &Environment) -> Result<Vec<Option<Value>>, Raised> {
        let mut defaults = Vec::with_capacity(params.args.len());
        for param in &params.args {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval_expr(expr, env)?),
                None => None,
            });
        }
        Ok(defaults)
    }

    fn exec_aug_assign(
        &mut self,
        target: &Expr,
        op: crate::ast::BinOp,
        value: &Expr,
        env: &Environment,
    ) -> Result<(), Raised> {
        match &target.kind {
            ExprKind::Name { id } => {
                let current = self.lookup(id, env)?;
                let value = self.eval_expr(value, env)?;
                if let (crate::ast::BinOp::Add, Value::List(items)) = (op, &current) {
                    let extra = self.iterate(&value)?;
                    items.borrow_mut().extend(extra);
                    return Ok(());
                }
                let result = self.binary(op, &current, &value)?;
                env.assign(id, result);
                Ok(())
            }
            ExprKind::Subscript { value: container, index } => {
                let container = self.eval_expr(container, env)?;
                let index = self.eval_expr(index, env)?;
                let current = self.subscript(&container, &index)?;
                let value = self.eval_expr(value, env)?;
                let result = self.binary(op, &current, &value)?;
                self.store_subscript(&container, index, result)
            }
            _ => Err(self.error("SyntaxError", "illegal expression for augmented assignment")),
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[crate::ast::ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        env: &Environment,
    ) -> Result<ControlFlow, Raised> {
        let outcome = match self.exec_block(body, env) {
            Ok(ControlFlow::Normal) => self.exec_block(orelse, env),
            Ok(flow) => Ok(flow),
            Err(raised) => self.handle_raised(raised, handlers, env),
        };
        if finalbody.is_empty() {
            return outcome;
        }
        match self.exec_block(finalbody, env)? {
            ControlFlow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle_raised(
        &mut self,
        raised: Raised,
        handlers: &[crate::ast::ExceptHandler],
        env: &Environment,
    ) -> Result<ControlFlow, Raised> {
        for handler in handlers {
            let matches = match &handler.type_ {
                None => !raised.is_exit_marker(),
                Some(expr) => {
                    let expected = self.eval_expr(expr, env)?;
                    exception_matches(&raised.value, &expected)
                }
            };
            if !matches {
                continue;
            }
            if let Value::ExitMarker(depth) = raised.value {
                trace!(depth, "exit marker caught by its guard");
            }
            if let Some(name) = &handler.name {
                env.assign(name, raised.value.clone());
            }
            self.handling.push(raised);
            let result = self.exec_block(&handler.body, env);
            self.handling.pop();
            return result;
        }
        Err(raised)
    }

    fn exec_raise(&mut self, exc: Option<&Expr>, cause: Option<&Expr>, stmt: &Stmt, env: &Environment) -> Raised {
        let Some(exc) = exc else {
            return match self.handling.last() {
                Some(raised) => raised.clone(),
                None => self.error("RuntimeError", "No active exception to reraise"),
            };
        };
        let value = match self.eval_expr(exc, env) {
            Ok(value) => value,
            Err(raised) => return raised,
        };
        if let Some(cause) = cause {
            if let Err(raised) = self.eval_expr(cause, env) {
                return raised;
            }
        }
        let value = match value {
            Value::Class(class) => self.instantiate(&class, &[]),
            value @ (Value::Exception(_) | Value::ExitMarker(_)) => value,
            _ => return self.error("TypeError", "exceptions must derive from BaseException"),
        };
        if let Value::ExitMarker(depth) = value {
            trace!(depth, line = stmt.location.line, "raising exit marker");
        }
        Raised::new(value).at(&self.filename, stmt.location)
    }

    fn exec_import(&mut self, alias: &Alias, env: &Environment) -> Result<(), Raised> {
        let module = self.import_module(&alias.name)?;
        match &alias.asname {
            Some(asname) => env.assign(asname, module),
            None => {
                let top = alias.name.split('.').next().unwrap_or(&alias.name);
                let top_module = if top == alias.name { module } else { self.import_module(top)? };
                env.assign(top, top_module);
            }
        }
        Ok(())
    }

    fn exec_import_from(&mut self, module_name: &str, names: &[Alias], env: &Environment) -> Result<(), Raised> {
        let module = self.import_module(module_name)?;
        let Value::Module(module_object) = &module else {
            return Err(self.error("ImportError", format!("'{}' is not a module", module_name)));
        };
        for alias in names {
            let found = module_object.namespace.borrow().get(&alias.name).cloned();
            let value = match found {
                Some(value) => value,
                None => self.import_module(&format!("{}.{}", module_name, alias.name)).map_err(|_| {
                    self.error(
                        "ImportError",
                        format!("cannot import name '{}' from '{}'", alias.name, module_name),
                    )
                })?,
            };
            env.assign(alias.asname.as_ref().unwrap_or(&alias.name), value);
        }
        Ok(())
    }

    /// Imports a builtin module or a `.py` file from the search path
    pub fn import_module(&mut self, name: &str) -> Result<Value, Raised> {
        if let Some(module) = self.module_loader.cached(name) {
            return Ok(module);
        }
        if let Some(module) = builtins::builtin_module(name, &self.classes) {
            self.module_loader.finish(name, Some(module.clone()));
            return Ok(module);
        }

        let source = self.module_loader.begin(name).map_err(|e| self.error("ImportError", e.to_string()))?;
        let result = self.exec_module_source(&source);
        self.module_loader.finish(name, result.as_ref().ok().cloned());
        result
    }

    fn exec_module_source(&mut self, source: &ModuleSource) -> Result<Value, Raised> {
        let filename = source.path.display().to_string();
        let mut module = parse_module(&source.text, &filename).map_err(|e| {
            self.error("SyntaxError", format!("{} ({}:{})", e.message, filename, e.location.line))
        })?;
        let rewritten = match self.module_loader.trace_options(&source.path) {
            Some(options) => {
                debug!(module = %source.name, "rewriting imported module");
                module = BreakAllRewriter::new(&options).rewrite_module(module).map_err(|e| self.diagnostic(e))?;
                true
            }
            None => false,
        };

        let text = if rewritten {
            SourceText::rewritten(&filename, &source.text)
        } else {
            SourceText::new(&filename, &source.text)
        };
        let globals = new_namespace();
        globals.borrow_mut().insert("__name__".to_string(), Value::str(&source.name));
        let env = Environment::module(globals.clone());
        self.exec_module(&module, &env, Some(text))?;
        Ok(Value::Module(Rc::new(ModuleObject { name: source.name.clone(), namespace: globals })))
    }

    // ----- assignment -----

    fn assign_target(&mut self, target: &Expr, value: Value, env: &Environment) -> Result<(), Raised> {
        match &target.kind {
            ExprKind::Name { id } => {
                env.assign(id, value);
                Ok(())
            }
            ExprKind::Tuple { elts } | ExprKind::List { elts } => self.unpack(elts, value, env),
            ExprKind::Subscript { value: container, index } => {
                let container = self.eval_expr(container, env)?;
                let index = self.eval_expr(index, env)?;
                self.store_subscript(&container, index, value)
            }
            ExprKind::Attribute { attr, .. } => {
                Err(self.error("AttributeError", format!("attribute '{}' is read-only", attr)))
            }
            _ => Err(self.error("SyntaxError", "cannot assign to expression")),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value, env: &Environment) -> Result<(), Raised> {
        let items = self.iterate(&value)?;
        let starred = targets.iter().position(|t| matches!(t.kind, ExprKind::Starred { .. }));
        match starred {
            None => {
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!("not enough values to unpack (expected {}, got {})", targets.len(), items.len())
                    };
                    return Err(self.error("ValueError", message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign_target(target, item, env)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    return Err(self.error(
                        "ValueError",
                        format!(
                            "not enough values to unpack (expected at least {}, got {})",
                            targets.len() - 1,
                            items.len()
                        ),
                    ));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign_target(target, item, env)?;
                }
                if let ExprKind::Starred { value } = &targets[star].kind {
                    self.assign_target(value, Value::list(middle), env)?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign_target(target, item, env)?;
                }
            }
        }
        Ok(())
    }

    fn store_subscript(&self, container: &Value, index: Value, value: Value) -> Result<(), Raised> {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let position = self.sequence_index(&index, items.len(), "list assignment")?;
                items[position] = value;
                Ok(())
            }
            Value::Dict(entries) => {
                dict_set(&mut entries.borrow_mut(), index, value);
                Ok(())
            }
            other => Err(self.error(
                "TypeError",
                format!("'{}' object does not support item assignment", other.type_name()),
            )),
        }
    }

    // ----- expressions -----

    pub fn eval_expr(&mut self, expr: &Expr, env: &Environment) -> Result<Value, Raised> {
        match &expr.kind {
            ExprKind::Name { id } => self.lookup(id, env),
            ExprKind::Constant { value: crate::ast::Constant::LargeInt(digits) } => Err(self.error(
                "OverflowError",
                format!("integer literal {} does not fit in 64 bits", digits),
            )),
            ExprKind::Constant { value } => Ok(constant(value)),
            ExprKind::JoinedStr { parts } => self.eval_fstring(parts, env),
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval_expr(left, env)?;
                let right = self.eval_expr(right, env)?;
                self.binary(*op, &left, &right)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval_expr(operand, env)?;
                operators::unary(*op, &operand).map_err(|(class, message)| self.error(class, message))
            }
            ExprKind::BoolOp { op, values } => {
                let mut result = Value::None;
                for value in values {
                    result = self.eval_expr(value, env)?;
                    let decided = match op {
                        crate::ast::BoolOp::And => !result.is_truthy(),
                        crate::ast::BoolOp::Or => result.is_truthy(),
                    };
                    if decided {
                        break;
                    }
                }
                Ok(result)
            }
            ExprKind::Compare { left, ops, comparators } => {
                let mut current = self.eval_expr(left, env)?;
                for (op, comparator) in ops.iter().zip(comparators) {
                    let next = self.eval_expr(comparator, env)?;
                    let holds = operators::compare_op(*op, &current, &next)
                        .map_err(|(class, message)| self.error(class, message))?;
                    if !holds {
                        return Ok(Value::Bool(false));
                    }
                    current = next;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Call { func, args, keywords } => self.eval_call(func, args, keywords, env),
            ExprKind::Attribute { value, attr } => {
                let value = self.eval_expr(value, env)?;
                self.attribute(&value, attr)
            }
            ExprKind::Subscript { value, index } => {
                let value = self.eval_expr(value, env)?;
                let index = self.eval_expr(index, env)?;
                self.subscript(&value, &index)
            }
            ExprKind::List { elts } => Ok(Value::list(self.eval_elements(elts, env)?)),
            ExprKind::Tuple { elts } => Ok(Value::tuple(self.eval_elements(elts, env)?)),
            ExprKind::Dict { keys, values } => {
                let mut entries = Vec::with_capacity(keys.len());
                for (key, value) in keys.iter().zip(values) {
                    let key = self.eval_expr(key, env)?;
                    let value = self.eval_expr(value, env)?;
                    dict_set(&mut entries, key, value);
                }
                Ok(Value::Dict(Rc::new(RefCell::new(entries))))
            }
            ExprKind::Lambda { params, body } => {
                let defaults = self.eval_defaults(params, env)?;
                let function = Function {
                    name: "<lambda>".to_string(),
                    params: params.args.iter().map(|param| param.name.clone()).collect(),
                    defaults,
                    vararg: params.vararg.clone(),
                    body: FunctionBody::Expr(Rc::new(body.as_ref().clone())),
                    is_async: false,
                    globals: env.globals.clone(),
                    closure: env.closure(),
                    source: self.source.clone(),
                    lines: (0, 0),
                    supports_breakall: Cell::new(false),
                };
                Ok(Value::Function(Rc::new(function)))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval_expr(test, env)?.is_truthy() {
                    self.eval_expr(body, env)
                } else {
                    self.eval_expr(orelse, env)
                }
            }
            ExprKind::Await { value } => {
                let value = self.eval_expr(value, env)?;
                self.await_value(value)
            }
            ExprKind::Starred { .. } => Err(self.error("SyntaxError", "can't use starred expression here")),
        }
    }

    fn lookup(&self, name: &str, env: &Environment) -> Result<Value, Raised> {
        env.lookup(name)
            .or_else(|| self.builtins.borrow().get(name).cloned())
            .ok_or_else(|| self.error("NameError", format!("name '{}' is not defined", name)))
    }

    fn binary(&self, op: crate::ast::BinOp, left: &Value, right: &Value) -> Result<Value, Raised> {
        operators::binary(op, left, right).map_err(|(class, message)| self.error(class, message))
    }

    fn eval_elements(&mut self, elts: &[Expr], env: &Environment) -> Result<Vec<Value>, Raised> {
        let mut items = Vec::with_capacity(elts.len());
        for elt in elts {
            match &elt.kind {
                ExprKind::Starred { value } => {
                    let value = self.eval_expr(value, env)?;
                    items.extend(self.iterate(&value)?);
                }
                _ => items.push(self.eval_expr(elt, env)?),
            }
        }
        Ok(items)
    }

    fn eval_fstring(&mut self, parts: &[FStringPart], env: &Environment) -> Result<Value, Raised> {
        let mut text = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(literal) => text.push_str(literal),
                FStringPart::Expr { value, conversion, format_spec } => {
                    let value = self.eval_expr(value, env)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::str(&value.repr()),
                        Some(_) => Value::str(&value.to_display()),
                        None => value,
                    };
                    let spec = format_spec.as_deref().unwrap_or("");
                    let formatted = native_functions::strings::format_value(&value, spec)
                        .map_err(|message| self.error("ValueError", message))?;
                    text.push_str(&formatted);
                }
            }
        }
        Ok(Value::str(&text))
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        env: &Environment,
    ) -> Result<Value, Raised> {
        let callee = self.eval_expr(func, env)?;
        let args = self.eval_elements(args, env)?;
        let mut kwargs = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            kwargs.push((keyword.arg.clone(), self.eval_expr(&keyword.value, env)?));
        }
        self.call_value(&callee, args, kwargs, env)
    }

    /// Calls any callable value
    pub fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        env: &Environment,
    ) -> Result<Value, Raised> {
        match callee {
            Value::Function(function) => {
                let locals = self.bind_arguments(function, args, kwargs)?;
                if function.is_async {
                    let coroutine = Coroutine::Pending { function: function.clone(), locals };
                    return Ok(Value::Coroutine(Rc::new(RefCell::new(coroutine))));
                }
                self.run_function(function, locals)
            }
            Value::NativeFunction(name) => native_functions::call_native_function(self, name, args, kwargs, env),
            Value::BoundMethod { receiver, name } => {
                if !kwargs.is_empty() {
                    return Err(self.error("TypeError", format!("{}() takes no keyword arguments", name)));
                }
                native_functions::call_method(self, receiver, name, args)
            }
            Value::Class(class) => {
                if !kwargs.is_empty() {
                    return Err(self.error("TypeError", format!("{}() takes no keyword arguments", class.name)));
                }
                Ok(self.instantiate(class, &args))
            }
            other => Err(self.error("TypeError", format!("'{}' object is not callable", other.type_name()))),
        }
    }

    fn instantiate(&self, class: &Rc<Class>, args: &[Value]) -> Value {
        let message = match args {
            [] => String::new(),
            [single] => single.to_display(),
            many => Value::tuple(many.to_vec()).repr(),
        };
        Value::Exception(Rc::new(ExceptionObject { class: class.clone(), message, diagnostic: None }))
    }

    fn bind_arguments(
        &self,
        function: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Namespace, Raised> {
        let locals = new_namespace();
        let mut bound: Vec<Option<Value>> = vec![None; function.params.len()];
        let mut args = args.into_iter();

        for slot in bound.iter_mut() {
            match args.next() {
                Some(arg) => *slot = Some(arg),
                None => break,
            }
        }
        let extra: Vec<Value> = args.collect();
        match &function.vararg {
            Some(name) => {
                locals.borrow_mut().insert(name.clone(), Value::tuple(extra));
            }
            None if !extra.is_empty() => {
                return Err(self.error(
                    "TypeError",
                    format!(
                        "{}() takes {} positional arguments but {} were given",
                        function.name,
                        function.params.len(),
                        function.params.len() + extra.len()
                    ),
                ));
            }
            None => {}
        }

        for (key, value) in kwargs {
            let Some(index) = function.params.iter().position(|param| *param == key) else {
                return Err(self.error(
                    "TypeError",
                    format!("{}() got an unexpected keyword argument '{}'", function.name, key),
                ));
            };
            if bound[index].is_some() {
                return Err(self.error(
                    "TypeError",
                    format!("{}() got multiple values for argument '{}'", function.name, key),
                ));
            }
            bound[index] = Some(value);
        }

        let mut names = locals.borrow_mut();
        for ((param, slot), default) in function.params.iter().zip(bound).zip(&function.defaults) {
            match slot.or_else(|| default.clone()) {
                Some(value) => {
                    names.insert(param.clone(), value);
                }
                None => {
                    return Err(self.error(
                        "TypeError",
                        format!("{}() missing 1 required positional argument: '{}'", function.name, param),
                    ));
                }
            }
        }
        drop(names);
        Ok(locals)
    }

    fn run_function(&mut self, function: &Rc<Function>, locals: Namespace) -> Result<Value, Raised> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(self.error("RuntimeError", "maximum recursion depth exceeded"));
        }

        let declarations = match &function.body {
            FunctionBody::Block(body) => collect_declarations(body),
            FunctionBody::Expr(_) => Declarations::default(),
        };
        let env = Environment::function(function.globals.clone(), locals, function.closure.clone(), declarations);

        let saved = self.save_position();
        if let Some(source) = &function.source {
            self.filename = source.filename.clone();
            self.source = Some(source.clone());
        }
        self.call_stack.push(function.name.clone());
        let result = match &function.body {
            FunctionBody::Block(body) => self.exec_block(body, &env).map(|flow| match flow {
                ControlFlow::Return(value) => value,
                _ => Value::None,
            }),
            FunctionBody::Expr(expr) => self.eval_expr(expr, &env),
        };
        self.call_stack.pop();
        self.restore_position(saved);
        result
    }

    /// Runs a coroutine to completion
    pub fn await_value(&mut self, value: Value) -> Result<Value, Raised> {
        let Value::Coroutine(coroutine) = value else {
            return Err(self.error(
                "TypeError",
                format!("object {} can't be used in 'await' expression", value.type_name()),
            ));
        };
        let state = std::mem::replace(&mut *coroutine.borrow_mut(), Coroutine::Done);
        match state {
            Coroutine::Pending { function, locals } => self.run_function(&function, locals),
            Coroutine::Ready(value) => Ok(value),
            Coroutine::Done => Err(self.error("RuntimeError", "cannot reuse already awaited coroutine")),
        }
    }

    fn attribute(&self, value: &Value, attr: &str) -> Result<Value, Raised> {
        let found = match value {
            Value::Module(module) => module.namespace.borrow().get(attr).cloned(),
            Value::Function(function) => match attr {
                "__name__" => Some(Value::str(&function.name)),
                "supports_breakall" => Some(Value::Bool(function.supports_breakall.get())),
                _ => None,
            },
            Value::Exception(exception) => exception_attribute(exception, attr),
            Value::Class(class) if attr == "__name__" => Some(Value::str(&class.name)),
            receiver if native_functions::has_method(receiver, attr) => {
                Some(Value::BoundMethod { receiver: Box::new(receiver.clone()), name: attr.to_string() })
            }
            _ => None,
        };
        found.ok_or_else(|| match value {
            Value::Module(module) => {
                self.error("AttributeError", format!("module '{}' has no attribute '{}'", module.name, attr))
            }
            other => self.error(
                "AttributeError",
                format!("'{}' object has no attribute '{}'", other.type_name(), attr),
            ),
        })
    }

    fn subscript(&self, value: &Value, index: &Value) -> Result<Value, Raised> {
        match value {
            Value::List(items) => {
                let items = items.borrow();
                let position = self.sequence_index(index, items.len(), "list")?;
                Ok(items[position].clone())
            }
            Value::Tuple(items) => {
                let position = self.sequence_index(index, items.len(), "tuple")?;
                Ok(items[position].clone())
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let position = self.sequence_index(index, chars.len(), "string")?;
                Ok(Value::str(&chars[position].to_string()))
            }
            range @ Value::Range { start, step, .. } => {
                let len = range_len(range).min(i128::from(i64::MAX)) as usize;
                let position = self.sequence_index(index, len, "range object")?;
                Ok(Value::Int((i128::from(*start) + i128::from(*step) * position as i128) as i64))
            }
            Value::Dict(entries) => entries
                .borrow()
                .iter()
                .find(|(key, _)| key == index)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| self.error("KeyError", index.repr())),
            other => Err(self.error("TypeError", format!("'{}' object is not subscriptable", other.type_name()))),
        }
    }

    fn sequence_index(&self, index: &Value, len: usize, what: &str) -> Result<usize, Raised> {
        let Some(Number::Int(raw)) = index.as_number() else {
            return Err(self.error(
                "TypeError",
                format!("{} indices must be integers, not {}", what, index.type_name()),
            ));
        };
        let len = len as i64;
        let position = if raw < 0 { raw + len } else { raw };
        if !(0..len).contains(&position) {
            return Err(self.error("IndexError", format!("{} index out of range", what)));
        }
        Ok(position as usize)
    }

    /// Materializes an iterable
    pub fn iterate(&self, value: &Value) -> Result<Vec<Value>, Raised> {
        Ok(self.loop_items(value)?.collect())
    }

    fn loop_items(&self, value: &Value) -> Result<LoopItems, Raised> {
        let items = match value {
            Value::Range { start, stop, step } => {
                return Ok(LoopItems::Range { next: *start, stop: *stop, step: *step });
            }
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.as_ref().clone(),
            Value::Str(text) => text.chars().map(|c| Value::str(&c.to_string())).collect(),
            Value::Dict(entries) => entries.borrow().iter().map(|(key, _)| key.clone()).collect(),
            other => {
                return Err(self.error("TypeError", format!("'{}' object is not iterable", other.type_name())));
            }
        };
        Ok(LoopItems::Items(items.into_iter()))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn constant(value: &crate::ast::Constant) -> Value {
    use crate::ast::Constant;
    match value {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(n) => Value::Int(*n),
        Constant::LargeInt(_) => Value::Int(i64::MAX),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::str(s),
    }
}

/// Whether an `except <expected>` clause stops `raised`
fn exception_matches(raised: &Value, expected: &Value) -> bool {
    match (raised, expected) {
        (_, Value::Tuple(options)) => options.iter().any(|option| exception_matches(raised, option)),
        (Value::ExitMarker(depth), Value::ExitMarker(guard)) => depth == guard,
        (Value::Exception(exception), Value::Class(class)) => exception.class.is_subclass_of(class),
        _ => false,
    }
}

fn exception_attribute(exception: &ExceptionObject, attr: &str) -> Option<Value> {
    if attr == "args" {
        return Some(Value::tuple(vec![Value::str(&exception.message)]));
    }
    let diagnostic = exception.diagnostic.as_ref()?;
    let context = &diagnostic.context;
    Some(match attr {
        "title" => Value::str(&diagnostic.title),
        "message" => Value::str(&diagnostic.message),
        "filename" => Value::str(&context.filename),
        "line" => Value::Int(context.line as i64),
        "function" => Value::str(&context.function),
        _ => return None,
    })
}

/// `global`/`nonlocal` names of a function body, not descending into nested functions
fn collect_declarations(body: &[Stmt]) -> Declarations {
    fn walk(body: &[Stmt], declarations: &mut Declarations) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Global { names } => declarations.global.extend(names.iter().cloned()),
                StmtKind::Nonlocal { names } => declarations.nonlocal.extend(names.iter().cloned()),
                StmtKind::For { body, orelse, .. }
                | StmtKind::While { body, orelse, .. }
                | StmtKind::If { body, orelse, .. } => {
                    walk(body, declarations);
                    walk(orelse, declarations);
                }
                StmtKind::Try { body, handlers, orelse, finalbody } => {
                    walk(body, declarations);
                    for handler in handlers {
                        walk(&handler.body, declarations);
                    }
                    walk(orelse, declarations);
                    walk(finalbody, declarations);
                }
                _ => {}
            }
        }
    }

    let mut declarations = Declarations::default();
    walk(body, &mut declarations);
    declarations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (Result<(), Error>, String) {
        let output = Arc::new(Mutex::new(Vec::new()));
        let mut interp = Interpreter::new();
        interp.set_output(output.clone());
        let result = interp.run_source(source, "test.py");
        let text = String::from_utf8(output.lock().unwrap().clone()).unwrap();
        (result, text)
    }

    #[test]
    fn test_exit_markers_skip_generic_handlers() {
        let source = "\
guard = ExitMarker(2)
try:
    try:
        raise guard
    except Exception:
        print('generic')
    except:
        print('bare')
    finally:
        print('finally')
except guard:
    print('guard')
";
        let (result, output) = run(source);
        result.unwrap();
        assert_eq!(output, "finally\nguard\n");
    }

    #[test]
    fn test_guard_only_matches_its_depth() {
        let source = "\
try:
    try:
        raise ExitMarker(1)
    except ExitMarker(2):
        print('inner')
except ExitMarker(1):
    print('outer')
";
        let (result, output) = run(source);
        result.unwrap();
        assert_eq!(output, "outer\n");
    }

    #[test]
    fn test_escaped_marker_is_reported() {
        let (result, _) = run("raise ExitMarker(3)\n");
        let error = result.unwrap_err().to_string();
        assert!(error.contains("exit marker for loop 3 escaped its guard"));
    }

    #[test]
    fn test_closures_and_nonlocal() {
        let source = "\
def counter():
    count = 0
    def bump():
        nonlocal count
        count += 1
        return count
    return bump

bump = counter()
bump()
print(bump())
";
        let (result, output) = run(source);
        result.unwrap();
        assert_eq!(output, "2\n");
    }

    #[test]
    fn test_uncaught_exception_location() {
        let (result, _) = run("x = 1\ny = x / 0\n");
        let Err(Error::Host(error)) = result else {
            panic!("expected a host error");
        };
        assert_eq!(error.kind, crate::errors::ErrorKind::Exception("ZeroDivisionError".to_string()));
        assert_eq!(error.location.line, 2);
        assert_eq!(error.source_line.as_deref(), Some("y = x / 0"));
    }

    #[test]
    fn test_collect_declarations_skips_nested_functions() {
        let module = parse_module(
            "if x:\n    global a\ndef inner():\n    global b\n",
            "t.py",
        )
        .unwrap();
        let declarations = collect_declarations(&module.body);
        assert!(declarations.global.contains("a"));
        assert!(!declarations.global.contains("b"));
    }
}
