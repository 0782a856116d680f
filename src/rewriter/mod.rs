// File: src/rewriter/mod.rs
//
// The breakall rewriter: turns multi-level loop exits into single-level
// constructs the interpreter already understands.
//
// Recognised statements:
// - `breakall`           exit every enclosing loop of the function
// - `breakall: N`        exit N loops, counted from the innermost
// - `breakall @ K`       exit to the K-th loop, counted from the outermost
//
// A loop at depth d that some exit targets is wrapped as
//
//     d@breakall = ExitMarker(d)
//     try:
//         <loop>
//     except d@breakall:
//         pass
//
// and the exit becomes `raise d@breakall`. Magnitudes that are not literals
// are resolved while the program runs through `breakall.runtime`; every loop
// up to the current depth is then guarded because any of them may be the
// target. Untouched loops come out unchanged.

pub mod resolve;
pub mod scope;

use ahash::{AHashMap, AHashSet};
use tracing::{debug, trace};

use crate::ast::{
    Alias, ExceptHandler, Expr, ExprKind, FunctionDef, Keyword, Location, Module, Stmt, StmtKind,
};
use crate::errors::{BreakAllError, DiagnosticContext};
use crate::location::{copy_location, fix_missing_locations, CopyMode};
use crate::unparse::{unparse_expr, unparse_stmt};

use resolve::{parse_int_text, resolve, Destination, ExitForm, Magnitude, ResolveFailure};
use scope::ScopeTracker;

/// The reserved identifier
pub const BREAKALL: &str = "breakall";

/// Name of the decorator that requests the rewrite
pub const ENABLE_BREAKALL: &str = "enable_breakall";

/// Builtin constructing an exit marker value
pub const EXIT_MARKER: &str = "ExitMarker";

/// Module holding the runtime resolvers
pub const RUNTIME_MODULE: &str = "breakall.runtime";

const MISUSE_PREFIX: &str =
    "The `breakall` statement must be alone, followed by `:` and a break count or `@` and a loop number";

/// Synthetic name bound to the exit marker of loop `depth`
pub fn marker_name(depth: usize) -> String {
    format!("{}@{}", depth, BREAKALL)
}

/// Settings for one rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOptions {
    /// Shown in diagnostics
    pub filename: String,
    /// Added to node lines in diagnostics; the first line of an extracted
    /// function is not line 1 of its file
    pub line_offset: usize,
    /// Decorator names that request this rewrite; removed from the output
    pub aliases: AHashSet<String>,
    /// Underline character of diagnostics
    pub indicator: char,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        let mut aliases = AHashSet::new();
        aliases.insert(ENABLE_BREAKALL.to_string());
        Self { filename: "<string>".to_string(), line_offset: 0, aliases, indicator: '^' }
    }
}

impl RewriteOptions {
    pub fn new(filename: &str) -> Self {
        Self { filename: filename.to_string(), ..Default::default() }
    }

    pub fn with_line_offset(mut self, line_offset: usize) -> Self {
        self.line_offset = line_offset;
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.aliases.insert(alias.to_string());
        self
    }

    pub fn with_indicator(mut self, indicator: char) -> Self {
        self.indicator = indicator;
        self
    }
}

/// Which side of an operator the reserved name sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    Unary,
    Left,
    Right,
}

/// Tree walker applying the rewrite to one module.
///
/// Walk state lives here and nowhere else; each rewrite builds a fresh one.
pub struct BreakAllRewriter<'a> {
    options: &'a RewriteOptions,
    scope: ScopeTracker,
    /// Last name each lambda (keyed by position) was bound to
    lambda_names: AHashMap<(usize, usize), String>,
}

impl<'a> BreakAllRewriter<'a> {
    pub fn new(options: &'a RewriteOptions) -> Self {
        Self { options, scope: ScopeTracker::new(), lambda_names: AHashMap::new() }
    }

    /// Rewrites a whole module. The result is fully positioned.
    pub fn rewrite_module(mut self, module: Module) -> Result<Module, BreakAllError> {
        let body = self.visit_body(module.body)?;
        let mut module = Module { body };
        fix_missing_locations(&mut module);
        Ok(module)
    }

    fn visit_body(&mut self, body: Vec<Stmt>) -> Result<Vec<Stmt>, BreakAllError> {
        let mut rewritten = Vec::with_capacity(body.len());
        for stmt in body {
            rewritten.extend(self.visit_stmt(stmt)?);
        }
        Ok(rewritten)
    }

    fn visit_stmt(&mut self, stmt: Stmt) -> Result<Vec<Stmt>, BreakAllError> {
        self.remember_lambda_names(&stmt);
        self.check_misuse(&stmt)?;

        match exit_statement(&stmt) {
            Some(ExitStatement::All) => return self.visit_exit_all(stmt),
            Some(ExitStatement::LoopNumber) => return self.visit_loop_number(stmt),
            Some(ExitStatement::Count) => return self.visit_break_count(stmt),
            None => {}
        }

        let Stmt { kind, location } = stmt;
        let kind = match kind {
            StmtKind::FunctionDef(def) => StmtKind::FunctionDef(self.visit_function(def)?),
            loop_kind @ (StmtKind::For { .. } | StmtKind::While { .. }) => {
                return self.visit_loop(loop_kind, location);
            }
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test,
                body: self.visit_body(body)?,
                orelse: self.visit_body(orelse)?,
            },
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                let body = self.visit_body(body)?;
                let mut visited = Vec::with_capacity(handlers.len());
                for handler in handlers {
                    visited.push(ExceptHandler { body: self.visit_body(handler.body)?, ..handler });
                }
                StmtKind::Try {
                    body,
                    handlers: visited,
                    orelse: self.visit_body(orelse)?,
                    finalbody: self.visit_body(finalbody)?,
                }
            }
            other => other,
        };
        Ok(vec![Stmt::new(kind, location)])
    }

    fn visit_function(&mut self, mut def: FunctionDef) -> Result<FunctionDef, BreakAllError> {
        let before = def.decorators.len();
        def.decorators.retain(|decorator| !is_alias(decorator, &self.options.aliases));
        if def.decorators.len() != before {
            trace!(function = %def.name, "removed breakall decorator");
        }

        debug!(function = %def.name, "rewriting function");
        self.scope.enter_function(&def.name);
        let body = self.visit_body(std::mem::take(&mut def.body));
        self.scope.exit_function();
        def.body = body?;
        Ok(def)
    }

    /// Header and `else` run at the enclosing depth; only the body is inside the loop.
    fn visit_loop(&mut self, kind: StmtKind, location: Location) -> Result<Vec<Stmt>, BreakAllError> {
        let depth = self.scope.enter_loop();
        let (kind, orelse) = match kind {
            StmtKind::For { target, iter, body, orelse, is_async } => {
                let body = self.visit_body(body);
                let kind = body.map(|body| StmtKind::For { target, iter, body, orelse: Vec::new(), is_async });
                (kind, orelse)
            }
            StmtKind::While { test, body, orelse } => {
                let body = self.visit_body(body);
                (body.map(|body| StmtKind::While { test, body, orelse: Vec::new() }), orelse)
            }
            other => (Ok(other), Vec::new()),
        };
        let used = self.scope.take_usage(depth);
        self.scope.exit_loop();

        let mut kind = kind?;
        let rewritten_orelse = self.visit_body(orelse)?;
        match &mut kind {
            StmtKind::For { orelse, .. } | StmtKind::While { orelse, .. } => *orelse = rewritten_orelse,
            _ => {}
        }
        let loop_stmt = Stmt::new(kind, location);

        if !used {
            return Ok(vec![loop_stmt]);
        }
        debug!(depth, line = location.line, "guarding loop");
        Ok(guard_loop(loop_stmt, depth))
    }

    /// Bare `breakall`: always the outermost loop of the function
    fn visit_exit_all(&mut self, stmt: Stmt) -> Result<Vec<Stmt>, BreakAllError> {
        if self.scope.depth() == 0 {
            let context = self.context(&stmt, 0, BREAKALL.len());
            return Err(BreakAllError::syntax(
                "Invalid break operation",
                "The `breakall` statement must be used inside a loop",
                context,
            ));
        }
        trace!(line = stmt.location.line, "breakall -> exit to loop 1");
        self.scope.mark_usage(1);
        Ok(vec![raise_marker(1, stmt.location)])
    }

    fn visit_break_count(&mut self, stmt: Stmt) -> Result<Vec<Stmt>, BreakAllError> {
        let StmtKind::AnnAssign { annotation, value, .. } = &stmt.kind else {
            return Ok(vec![stmt]);
        };

        let annotation_text = unparse_expr(annotation);
        if value.is_some() {
            let spacing = BREAKALL.len() + 2 + annotation_text.len() + 1;
            let context = self.context(&stmt, spacing, 1);
            return Err(BreakAllError::syntax(
                "Invalid break operation",
                format!("{}, not `=`", MISUSE_PREFIX),
                context,
            ));
        }

        let context = self.context(&stmt, BREAKALL.len() + 2, annotation_text.len());
        let magnitude = annotation.clone();
        self.visit_exit(ExitForm::Count, magnitude, context, stmt.location)
    }

    fn visit_loop_number(&mut self, stmt: Stmt) -> Result<Vec<Stmt>, BreakAllError> {
        let StmtKind::Expr { value } = &stmt.kind else {
            return Ok(vec![stmt]);
        };
        let Some(right) = loop_number_operand(value) else {
            return Ok(vec![stmt]);
        };

        let context = self.context(&stmt, BREAKALL.len() + 3, unparse_expr(right).len());
        let magnitude = right.clone();
        self.visit_exit(ExitForm::LoopNumber, magnitude, context, stmt.location)
    }

    fn visit_exit(
        &mut self,
        form: ExitForm,
        magnitude: Expr,
        context: DiagnosticContext,
        location: Location,
    ) -> Result<Vec<Stmt>, BreakAllError> {
        let depth = self.scope.depth();
        if depth == 0 {
            let failure = ResolveFailure::OutOfRange { form, depth };
            return Err(BreakAllError::syntax(failure.title(), failure.message(), context));
        }

        let Some(literal) = literal_magnitude(&magnitude) else {
            trace!(?form, depth, line = location.line, "deferring exit to runtime resolver");
            self.scope.mark_usage_up_to(depth);
            return Ok(dynamic_exit(form, magnitude, depth, &context, location));
        };

        let destination = literal
            .coerce(form)
            .and_then(|value| resolve(form, value, depth))
            .map_err(|failure| BreakAllError::syntax(failure.title(), failure.message(), context))?;

        match destination {
            Destination::Break => {
                trace!(?form, depth, "exit resolves to plain break");
                Ok(vec![Stmt::new(StmtKind::Break, location)])
            }
            Destination::Exit(target) => {
                trace!(?form, depth, target, "exit resolves to loop");
                self.scope.mark_usage(target);
                Ok(vec![raise_marker(target, location)])
            }
        }
    }

    /// Diagnostic context pointing into `stmt`
    fn context(&self, stmt: &Stmt, spacing: usize, error_length: usize) -> DiagnosticContext {
        self.context_with_text(stmt, first_line(&unparse_stmt(stmt)), spacing, error_length)
    }

    fn context_with_text(
        &self,
        stmt: &Stmt,
        unparsed_node: String,
        spacing: usize,
        error_length: usize,
    ) -> DiagnosticContext {
        DiagnosticContext {
            filename: self.options.filename.clone(),
            line: stmt.location.line + self.options.line_offset,
            function: self.scope.function_name(),
            col_offset: stmt.location.column,
            spacing,
            unparsed_node,
            error_length,
            indicator: self.options.indicator,
        }
    }

    // ----- anonymous function names -----

    fn remember_lambda_names(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Assign { targets, value } if targets.len() == 1 => {
                self.remember_pair(&targets[0], value);
            }
            StmtKind::AnnAssign { target, value: Some(value), .. } => self.remember_pair(target, value),
            _ => {}
        }
    }

    fn remember_pair(&mut self, target: &Expr, value: &Expr) {
        match (&target.kind, &value.kind) {
            (ExprKind::Name { id }, ExprKind::Lambda { .. }) => {
                self.lambda_names.insert(position(value), id.clone());
            }
            (ExprKind::Tuple { elts: targets }, ExprKind::Tuple { elts: values }) => {
                if targets.iter().any(|t| matches!(t.kind, ExprKind::Starred { .. })) {
                    return;
                }
                for (target, value) in targets.iter().zip(values) {
                    if let (ExprKind::Name { id }, ExprKind::Lambda { .. }) = (&target.kind, &value.kind) {
                        self.lambda_names.insert(position(value), id.clone());
                    }
                }
            }
            _ => {}
        }
    }

    fn lambda_label(&self, lambda: &Expr) -> String {
        match self.lambda_names.get(&position(lambda)) {
            Some(name) => format!("<lambda@{}>", name),
            None => "<lambda>".to_string(),
        }
    }

    // ----- misuse detection -----

    /// Rejects the reserved name used as an operand anywhere in the
    /// statement's own expressions. Nested statements are checked when visited.
    fn check_misuse(&mut self, stmt: &Stmt) -> Result<(), BreakAllError> {
        match &stmt.kind {
            StmtKind::Expr { value } if value.is_name(BREAKALL) => Ok(()),
            StmtKind::Expr { value } => match loop_number_operand(value) {
                Some(right) => self.check_expr(stmt, right),
                None => self.check_expr(stmt, value),
            },
            StmtKind::AnnAssign { target, annotation, value } if target.is_name(BREAKALL) => {
                self.check_expr(stmt, annotation)?;
                match value {
                    Some(value) => self.check_expr(stmt, value),
                    None => Ok(()),
                }
            }
            _ => {
                for expr in own_exprs(stmt) {
                    self.check_expr(stmt, expr)?;
                }
                Ok(())
            }
        }
    }

    fn check_expr(&mut self, stmt: &Stmt, expr: &Expr) -> Result<(), BreakAllError> {
        match &expr.kind {
            ExprKind::BinOp { left, op, right } => {
                if left.is_name(BREAKALL) {
                    return Err(self.misuse(stmt, expr, op.symbol(), Operand::Left));
                }
                if right.is_name(BREAKALL) {
                    return Err(self.misuse(stmt, expr, op.symbol(), Operand::Right));
                }
            }
            ExprKind::UnaryOp { op, operand } if operand.is_name(BREAKALL) => {
                return Err(self.misuse(stmt, expr, op.symbol(), Operand::Unary));
            }
            ExprKind::BoolOp { op, values } => {
                if let Some(index) = values.iter().position(|v| v.is_name(BREAKALL)) {
                    let side = if index == 0 { Operand::Left } else { Operand::Right };
                    return Err(self.misuse(stmt, expr, op.symbol(), side));
                }
            }
            ExprKind::Compare { left, ops, comparators } => {
                if left.is_name(BREAKALL) {
                    return Err(self.misuse(stmt, expr, ops[0].symbol(), Operand::Left));
                }
                if let Some(index) = comparators.iter().position(|c| c.is_name(BREAKALL)) {
                    return Err(self.misuse(stmt, expr, ops[index].symbol(), Operand::Right));
                }
            }
            ExprKind::Lambda { params, body } => {
                for param in &params.args {
                    if let Some(default) = &param.default {
                        self.check_expr(stmt, default)?;
                    }
                }
                let label = self.lambda_label(expr);
                self.scope.enter_function(&label);
                let result = self.check_expr(stmt, body);
                self.scope.exit_function();
                return result;
            }
            _ => {}
        }
        for child in expr_children(expr) {
            self.check_expr(stmt, child)?;
        }
        Ok(())
    }

    fn misuse(&self, stmt: &Stmt, sub: &Expr, op: &str, side: Operand) -> BreakAllError {
        let rendered = unparse_stmt(stmt);
        let sub_text = unparse_expr(sub);
        let line = rendered
            .lines()
            .find(|line| line.contains(&sub_text))
            .or_else(|| rendered.lines().next())
            .unwrap_or_default()
            .to_string();
        let base = line.find(&sub_text).unwrap_or(0);

        let (message, offset) = match side {
            Operand::Unary => (format!("{}, not preceded by `{}`", MISUSE_PREFIX, op), 0),
            Operand::Left => (format!("{}, not `{}`", MISUSE_PREFIX, op), BREAKALL.len() + 1),
            Operand::Right => {
                let pattern = format!("{} {}", op, BREAKALL);
                let fallback = sub_text.len().saturating_sub(BREAKALL.len() + op.len() + 1);
                (format!("{}, not `{}`", MISUSE_PREFIX, op), find_word(&sub_text, &pattern).unwrap_or(fallback))
            }
        };
        trace!(op, line = stmt.location.line, "invalid breakall operation");
        let context = self.context_with_text(stmt, line, base + offset, op.len());
        BreakAllError::syntax("Invalid break operation", message, context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitStatement {
    /// `breakall`
    All,
    /// `breakall: N`
    Count,
    /// `breakall @ K`
    LoopNumber,
}

fn exit_statement(stmt: &Stmt) -> Option<ExitStatement> {
    match &stmt.kind {
        StmtKind::Expr { value } if value.is_name(BREAKALL) => Some(ExitStatement::All),
        StmtKind::Expr { value } if loop_number_operand(value).is_some() => Some(ExitStatement::LoopNumber),
        StmtKind::AnnAssign { target, .. } if target.is_name(BREAKALL) => Some(ExitStatement::Count),
        _ => None,
    }
}

/// `breakall @ K` as a whole expression: returns K
fn loop_number_operand(value: &Expr) -> Option<&Expr> {
    match &value.kind {
        ExprKind::BinOp { left, op: crate::ast::BinOp::MatMult, right } if left.is_name(BREAKALL) => {
            Some(right)
        }
        _ => None,
    }
}

/// A literal, optionally signed with unary `+`/`-`. `None` means "resolve at runtime".
fn literal_magnitude(expr: &Expr) -> Option<Magnitude> {
    use crate::ast::{Constant, UnaryOp};

    let constant = |value: &Constant| match value {
        Constant::Int(v) => Magnitude::Int(*v),
        Constant::LargeInt(_) => Magnitude::Int(i64::MAX),
        Constant::Float(v) => Magnitude::Float(*v),
        Constant::Bool(b) => Magnitude::Bool(*b),
        Constant::Str(_) | Constant::None => Magnitude::Other(unparse_expr(expr)),
    };

    match &expr.kind {
        ExprKind::Constant { value: crate::ast::Constant::Str(s) } => Some(Magnitude::Str(s.clone())),
        ExprKind::Constant { value } => Some(constant(value)),
        ExprKind::UnaryOp { op: op @ (UnaryOp::UAdd | UnaryOp::USub), operand } => {
            let ExprKind::Constant { value } = &operand.kind else { return None };
            if let Constant::Str(text) = value {
                return Some(match parse_int_text(text) {
                    Some(v) if *op == UnaryOp::USub => Magnitude::Int(v.saturating_neg()),
                    Some(v) => Magnitude::Int(v),
                    None => Magnitude::Other(unparse_expr(expr)),
                });
            }
            let magnitude = match constant(value) {
                Magnitude::Int(v) if *op == UnaryOp::USub => Magnitude::Int(v.saturating_neg()),
                Magnitude::Float(v) if *op == UnaryOp::USub => Magnitude::Float(-v),
                Magnitude::Bool(b) if *op == UnaryOp::USub => Magnitude::Int(-i64::from(b)),
                Magnitude::Bool(b) => Magnitude::Int(i64::from(b)),
                other => other,
            };
            Some(magnitude)
        }
        _ => None,
    }
}

/// Whether a decorator names one of `aliases`, bare or as an attribute
pub(crate) fn is_alias(decorator: &Expr, aliases: &AHashSet<String>) -> bool {
    match &decorator.kind {
        ExprKind::Name { id } => aliases.contains(id),
        ExprKind::Attribute { attr, .. } => aliases.contains(attr),
        _ => false,
    }
}

fn position(expr: &Expr) -> (usize, usize) {
    (expr.location.line, expr.location.column)
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

/// Byte offset of `pattern` in `text` where it is not followed by an identifier character
fn find_word(text: &str, pattern: &str) -> Option<usize> {
    text.match_indices(pattern).map(|(index, _)| index).find(|index| {
        text[index + pattern.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
    })
}

fn guard_loop(loop_stmt: Stmt, depth: usize) -> Vec<Stmt> {
    let location = loop_stmt.location;
    let name = marker_name(depth);

    let mut assign = Stmt::synthetic(StmtKind::Assign {
        targets: vec![Expr::name(name.clone())],
        value: Expr::call(Expr::name(EXIT_MARKER), vec![Expr::int(depth as i64)], Vec::new()),
    });
    let mut guard = Stmt::synthetic(StmtKind::Try {
        body: vec![loop_stmt],
        handlers: vec![ExceptHandler {
            type_: Some(Expr::name(name)),
            name: None,
            body: vec![Stmt::synthetic(StmtKind::Pass)],
            location: Location::default(),
        }],
        orelse: Vec::new(),
        finalbody: Vec::new(),
    });
    copy_location(location, &mut assign, CopyMode::FILL);
    copy_location(location, &mut guard, CopyMode::FILL);
    vec![assign, guard]
}

fn raise_marker(depth: usize, location: Location) -> Stmt {
    let mut stmt = Stmt::synthetic(StmtKind::Raise { exc: Some(Expr::name(marker_name(depth))), cause: None });
    copy_location(location, &mut stmt, CopyMode::FILL);
    stmt
}

/// `from breakall.runtime import <resolver>` then `raise ExitMarker(<resolver>(...))`
fn dynamic_exit(
    form: ExitForm,
    magnitude: Expr,
    depth: usize,
    context: &DiagnosticContext,
    location: Location,
) -> Vec<Stmt> {
    let (resolver, argument) = match form {
        ExitForm::Count => ("destination_from_break_count", "count"),
        ExitForm::LoopNumber => ("destination_from_loop_number", "loop"),
    };

    let keyword = |arg: &str, value: Expr| Keyword { arg: arg.to_string(), value };
    let mut keywords = vec![
        keyword(argument, magnitude),
        keyword("current_loop", Expr::int(depth as i64)),
        keyword("filename", Expr::string(context.filename.clone())),
        keyword("line", Expr::int(context.line as i64)),
        keyword("function", Expr::string(context.function.clone())),
        keyword("col_offset", Expr::int(context.col_offset as i64)),
        keyword("spacing", Expr::int(context.spacing as i64)),
        keyword("unparsed_node", Expr::string(context.unparsed_node.clone())),
        keyword("error_length", Expr::int(context.error_length as i64)),
    ];
    if context.indicator != '^' {
        keywords.push(keyword("indicator", Expr::string(context.indicator.to_string())));
    }

    let mut import = Stmt::synthetic(StmtKind::ImportFrom {
        module: RUNTIME_MODULE.to_string(),
        names: vec![Alias { name: resolver.to_string(), asname: None }],
    });
    let destination = Expr::call(Expr::name(resolver), Vec::new(), keywords);
    let mut raise = Stmt::synthetic(StmtKind::Raise {
        exc: Some(Expr::call(Expr::name(EXIT_MARKER), vec![destination], Vec::new())),
        cause: None,
    });
    copy_location(location, &mut import, CopyMode::FILL);
    copy_location(location, &mut raise, CopyMode::FILL);
    vec![import, raise]
}

/// Expressions that belong to `stmt` itself, excluding nested statements
fn own_exprs(stmt: &Stmt) -> Vec<&Expr> {
    let mut exprs = Vec::new();
    match &stmt.kind {
        StmtKind::FunctionDef(def) => {
            exprs.extend(def.decorators.iter());
            for param in &def.params.args {
                exprs.extend(param.annotation.iter());
                exprs.extend(param.default.iter());
            }
            exprs.extend(def.returns.iter());
        }
        StmtKind::Return { value } => exprs.extend(value.iter()),
        StmtKind::Assign { targets, value } => {
            exprs.extend(targets.iter());
            exprs.push(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            exprs.push(target);
            exprs.push(value);
        }
        StmtKind::AnnAssign { target, annotation, value } => {
            exprs.push(target);
            exprs.push(annotation);
            exprs.extend(value.iter());
        }
        StmtKind::For { target, iter, .. } => {
            exprs.push(target);
            exprs.push(iter);
        }
        StmtKind::While { test, .. } | StmtKind::If { test, .. } => exprs.push(test),
        StmtKind::Try { handlers, .. } => {
            for handler in handlers {
                exprs.extend(handler.type_.iter());
            }
        }
        StmtKind::Raise { exc, cause } => {
            exprs.extend(exc.iter());
            exprs.extend(cause.iter());
        }
        StmtKind::Expr { value } => exprs.push(value),
        StmtKind::Import { .. }
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global { .. }
        | StmtKind::Nonlocal { .. }
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
    exprs
}

fn expr_children(expr: &Expr) -> Vec<&Expr> {
    use crate::ast::FStringPart;

    match &expr.kind {
        ExprKind::Name { .. } | ExprKind::Constant { .. } => Vec::new(),
        ExprKind::JoinedStr { parts } => parts
            .iter()
            .filter_map(|part| match part {
                FStringPart::Expr { value, .. } => Some(value.as_ref()),
                FStringPart::Literal(_) => None,
            })
            .collect(),
        ExprKind::BinOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        ExprKind::UnaryOp { operand, .. } => vec![operand.as_ref()],
        ExprKind::BoolOp { values, .. } => values.iter().collect(),
        ExprKind::Compare { left, comparators, .. } => {
            let mut children = vec![left.as_ref()];
            children.extend(comparators.iter());
            children
        }
        ExprKind::Call { func, args, keywords } => {
            let mut children = vec![func.as_ref()];
            children.extend(args.iter());
            children.extend(keywords.iter().map(|k| &k.value));
            children
        }
        ExprKind::Attribute { value, .. } | ExprKind::Await { value } | ExprKind::Starred { value } => {
            vec![value.as_ref()]
        }
        ExprKind::Subscript { value, index } => vec![value.as_ref(), index.as_ref()],
        ExprKind::List { elts } | ExprKind::Tuple { elts } => elts.iter().collect(),
        ExprKind::Dict { keys, values } => keys.iter().chain(values.iter()).collect(),
        ExprKind::Lambda { body, .. } => vec![body.as_ref()],
        ExprKind::IfExp { test, body, orelse } => vec![test.as_ref(), body.as_ref(), orelse.as_ref()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use crate::unparse::unparse_module;

    fn rewrite(source: &str) -> Result<String, BreakAllError> {
        let options = RewriteOptions::new("test.py");
        let module = parse_module(source, "test.py").unwrap();
        BreakAllRewriter::new(&options).rewrite_module(module).map(|m| unparse_module(&m))
    }

    #[test]
    fn test_untouched_loops_are_unchanged() {
        let source = "for i in x:\n    for j in y:\n        break\n";
        assert_eq!(rewrite(source).unwrap(), source.trim_end());
    }

    #[test]
    fn test_literal_one_is_plain_break() {
        let rewritten = rewrite("for i in x:\n    for j in y:\n        breakall: 1\n").unwrap();
        assert!(!rewritten.contains("ExitMarker"));
        assert!(rewritten.contains("        break"));
    }

    #[test]
    fn test_signed_literal_is_static() {
        let error = rewrite("for i in x:\n    breakall: -1\n").unwrap_err();
        assert_eq!(error.message, "The break count must be greater than 0");
        assert_eq!(error.context.error_length, 2);
    }

    #[test]
    fn test_lambda_label_in_diagnostics() {
        let error = rewrite("def f():\n    g = lambda: breakall + 1\n").unwrap_err();
        assert_eq!(error.context.function, "f.<lambda@g>");
    }

    #[test]
    fn test_tuple_unpacked_lambda_names() {
        let error = rewrite("a, b = lambda: 1, lambda: -breakall\n").unwrap_err();
        assert_eq!(error.context.function, "<lambda@b>");
    }

    #[test]
    fn test_find_word_skips_longer_identifiers() {
        assert_eq!(find_word("x + breakall_2 + breakall", "+ breakall"), Some(15));
    }

    #[test]
    fn test_markers_have_unique_names() {
        assert_eq!(marker_name(3), "3@breakall");
    }
}
