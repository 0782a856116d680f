// File: src/unparse.rs
//
// Turns trees back into host source text.
//
// Used for three things: rendering the offending node inside diagnostics,
// measuring the width of the part to underline, and `breakall rewrite` /
// `run --output` which print the rewritten program. Output uses four space
// indentation, `elif` for else-if chains and the fewest parentheses that keep
// the tree's meaning.

use crate::ast::{
    BinOp, BoolOp, Constant, ExceptHandler, Expr, ExprKind, FStringPart, Module, Parameters, Stmt,
    StmtKind, UnaryOp,
};

mod precedence {
    pub const TUPLE: u8 = 0;
    pub const TEST: u8 = 1;
    pub const OR: u8 = 2;
    pub const AND: u8 = 3;
    pub const NOT: u8 = 4;
    pub const CMP: u8 = 5;
    pub const BOR: u8 = 6;
    pub const BXOR: u8 = 7;
    pub const BAND: u8 = 8;
    pub const SHIFT: u8 = 9;
    pub const ARITH: u8 = 10;
    pub const TERM: u8 = 11;
    pub const FACTOR: u8 = 12;
    pub const POWER: u8 = 13;
    pub const AWAIT: u8 = 14;
    pub const ATOM: u8 = 15;
}

use precedence::*;

/// Source text of a whole module, without a trailing newline.
pub fn unparse_module(module: &Module) -> String {
    unparse_body(&module.body)
}

pub fn unparse_body(body: &[Stmt]) -> String {
    let mut writer = Writer::default();
    writer.block(body);
    writer.lines.join("\n")
}

pub fn unparse_stmt(stmt: &Stmt) -> String {
    unparse_body(std::slice::from_ref(stmt))
}

pub fn unparse_expr(expr: &Expr) -> String {
    expr_at(expr, TUPLE)
}

#[derive(Default)]
struct Writer {
    lines: Vec<String>,
    indent: usize,
}

impl Writer {
    fn line(&mut self, text: String) {
        self.lines.push(format!("{}{}", "    ".repeat(self.indent), text));
    }

    fn block(&mut self, body: &[Stmt]) {
        if body.is_empty() {
            self.line("pass".to_string());
        }
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn suite(&mut self, header: String, body: &[Stmt]) {
        self.line(header);
        self.indent += 1;
        self.block(body);
        self.indent -= 1;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                for decorator in &def.decorators {
                    self.line(format!("@{}", expr_at(decorator, TEST)));
                }
                let mut header = format!(
                    "{}def {}({})",
                    if def.is_async { "async " } else { "" },
                    def.name,
                    params(&def.params, true)
                );
                if let Some(returns) = &def.returns {
                    header.push_str(&format!(" -> {}", expr_at(returns, TEST)));
                }
                header.push(':');
                self.suite(header, &def.body);
            }
            StmtKind::Return { value } => match value {
                Some(value) => self.line(format!("return {}", expr_at(value, TUPLE))),
                None => self.line("return".to_string()),
            },
            StmtKind::Assign { targets, value } => {
                let mut text = String::new();
                for target in targets {
                    text.push_str(&expr_at(target, TUPLE));
                    text.push_str(" = ");
                }
                text.push_str(&expr_at(value, TUPLE));
                self.line(text);
            }
            StmtKind::AugAssign { target, op, value } => {
                self.line(format!("{} {}= {}", expr_at(target, TUPLE), op.symbol(), expr_at(value, TUPLE)));
            }
            StmtKind::AnnAssign { target, annotation, value } => {
                let mut text = format!("{}: {}", expr_at(target, TEST), expr_at(annotation, TEST));
                if let Some(value) = value {
                    text.push_str(&format!(" = {}", expr_at(value, TUPLE)));
                }
                self.line(text);
            }
            StmtKind::For { target, iter, body, orelse, is_async } => {
                let header = format!(
                    "{}for {} in {}:",
                    if *is_async { "async " } else { "" },
                    expr_at(target, TUPLE),
                    expr_at(iter, TUPLE)
                );
                self.suite(header, body);
                if !orelse.is_empty() {
                    self.suite("else:".to_string(), orelse);
                }
            }
            StmtKind::While { test, body, orelse } => {
                self.suite(format!("while {}:", expr_at(test, TEST)), body);
                if !orelse.is_empty() {
                    self.suite("else:".to_string(), orelse);
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.suite(format!("if {}:", expr_at(test, TEST)), body);
                let mut rest = orelse;
                loop {
                    match rest.as_slice() {
                        [] => break,
                        [Stmt { kind: StmtKind::If { test, body, orelse }, .. }] => {
                            self.suite(format!("elif {}:", expr_at(test, TEST)), body);
                            rest = orelse;
                        }
                        _ => {
                            self.suite("else:".to_string(), rest);
                            break;
                        }
                    }
                }
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                self.suite("try:".to_string(), body);
                for handler in handlers {
                    self.handler(handler);
                }
                if !orelse.is_empty() {
                    self.suite("else:".to_string(), orelse);
                }
                if !finalbody.is_empty() {
                    self.suite("finally:".to_string(), finalbody);
                }
            }
            StmtKind::Raise { exc, cause } => {
                let mut text = "raise".to_string();
                if let Some(exc) = exc {
                    text.push_str(&format!(" {}", expr_at(exc, TEST)));
                }
                if let Some(cause) = cause {
                    text.push_str(&format!(" from {}", expr_at(cause, TEST)));
                }
                self.line(text);
            }
            StmtKind::Import { names } => {
                let names: Vec<String> = names.iter().map(alias).collect();
                self.line(format!("import {}", names.join(", ")));
            }
            StmtKind::ImportFrom { module, names } => {
                let names: Vec<String> = names.iter().map(alias).collect();
                self.line(format!("from {} import {}", module, names.join(", ")));
            }
            StmtKind::Global { names } => self.line(format!("global {}", names.join(", "))),
            StmtKind::Nonlocal { names } => self.line(format!("nonlocal {}", names.join(", "))),
            StmtKind::Expr { value } => self.line(expr_at(value, TUPLE)),
            StmtKind::Pass => self.line("pass".to_string()),
            StmtKind::Break => self.line("break".to_string()),
            StmtKind::Continue => self.line("continue".to_string()),
        }
    }

    fn handler(&mut self, handler: &ExceptHandler) {
        let mut header = "except".to_string();
        if let Some(type_) = &handler.type_ {
            header.push(' ');
            header.push_str(&expr_at(type_, TEST));
        }
        if let Some(name) = &handler.name {
            header.push_str(&format!(" as {}", name));
        }
        header.push(':');
        self.suite(header, &handler.body);
    }
}

fn alias(alias: &crate::ast::Alias) -> String {
    match &alias.asname {
        Some(asname) => format!("{} as {}", alias.name, asname),
        None => alias.name.clone(),
    }
}

fn params(params: &Parameters, annotations: bool) -> String {
    let mut parts = Vec::new();
    for param in &params.args {
        let mut text = param.name.clone();
        match (&param.annotation, &param.default) {
            (Some(annotation), default) if annotations => {
                text.push_str(&format!(": {}", expr_at(annotation, TEST)));
                if let Some(default) = default {
                    text.push_str(&format!(" = {}", expr_at(default, TEST)));
                }
            }
            (_, Some(default)) => text.push_str(&format!("={}", expr_at(default, TEST))),
            _ => {}
        }
        parts.push(text);
    }
    if let Some(vararg) = &params.vararg {
        parts.push(format!("*{}", vararg));
    }
    parts.join(", ")
}

fn binop_precedence(op: BinOp) -> u8 {
    match op {
        BinOp::BitOr => BOR,
        BinOp::BitXor => BXOR,
        BinOp::BitAnd => BAND,
        BinOp::LShift | BinOp::RShift => SHIFT,
        BinOp::Add | BinOp::Sub => ARITH,
        BinOp::Mult | BinOp::MatMult | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => TERM,
        BinOp::Pow => POWER,
    }
}

fn wrap(text: String, own: u8, outer: u8) -> String {
    if own < outer {
        format!("({})", text)
    } else {
        text
    }
}

fn join(exprs: &[Expr], outer: u8) -> String {
    exprs.iter().map(|e| expr_at(e, outer)).collect::<Vec<_>>().join(", ")
}

fn expr_at(expr: &Expr, outer: u8) -> String {
    match &expr.kind {
        ExprKind::Name { id } => id.clone(),
        ExprKind::Constant { value } => constant(value),
        ExprKind::JoinedStr { parts } => fstring(parts),
        ExprKind::BinOp { left, op, right } => {
            let own = binop_precedence(*op);
            let (left_prec, right_prec) = if *op == BinOp::Pow { (own + 1, own) } else { (own, own + 1) };
            let text = format!("{} {} {}", expr_at(left, left_prec), op.symbol(), expr_at(right, right_prec));
            wrap(text, own, outer)
        }
        ExprKind::UnaryOp { op, operand } => {
            let (own, text) = match op {
                UnaryOp::Not => (NOT, format!("not {}", expr_at(operand, NOT))),
                other => (FACTOR, format!("{}{}", other.symbol(), expr_at(operand, FACTOR))),
            };
            wrap(text, own, outer)
        }
        ExprKind::BoolOp { op, values } => {
            let own = if *op == BoolOp::And { AND } else { OR };
            let separator = format!(" {} ", op.symbol());
            let text = values.iter().map(|v| expr_at(v, own + 1)).collect::<Vec<_>>().join(&separator);
            wrap(text, own, outer)
        }
        ExprKind::Compare { left, ops, comparators } => {
            let mut text = expr_at(left, CMP + 1);
            for (op, comparator) in ops.iter().zip(comparators) {
                text.push_str(&format!(" {} {}", op.symbol(), expr_at(comparator, CMP + 1)));
            }
            wrap(text, CMP, outer)
        }
        ExprKind::Call { func, args, keywords } => {
            let mut items: Vec<String> = args.iter().map(|a| expr_at(a, TEST)).collect();
            items.extend(keywords.iter().map(|k| format!("{}={}", k.arg, expr_at(&k.value, TEST))));
            format!("{}({})", expr_at(func, ATOM), items.join(", "))
        }
        ExprKind::Attribute { value, attr } => format!("{}.{}", expr_at(value, ATOM), attr),
        ExprKind::Subscript { value, index } => {
            let index = match &index.kind {
                ExprKind::Tuple { elts } if elts.len() > 1 => join(elts, TEST),
                _ => expr_at(index, TUPLE),
            };
            format!("{}[{}]", expr_at(value, ATOM), index)
        }
        ExprKind::List { elts } => format!("[{}]", join(elts, TEST)),
        ExprKind::Tuple { elts } => match elts.len() {
            0 => "()".to_string(),
            1 => format!("({},)", expr_at(&elts[0], TEST)),
            _ => wrap(join(elts, TEST), TUPLE, outer),
        },
        ExprKind::Dict { keys, values } => {
            let items: Vec<String> = keys
                .iter()
                .zip(values)
                .map(|(k, v)| format!("{}: {}", expr_at(k, TEST), expr_at(v, TEST)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
        ExprKind::Lambda { params: lambda_params, body } => {
            let params = params(lambda_params, false);
            let text = if params.is_empty() {
                format!("lambda: {}", expr_at(body, TEST))
            } else {
                format!("lambda {}: {}", params, expr_at(body, TEST))
            };
            wrap(text, TEST, outer)
        }
        ExprKind::IfExp { test, body, orelse } => {
            let text = format!(
                "{} if {} else {}",
                expr_at(body, TEST + 1),
                expr_at(test, TEST + 1),
                expr_at(orelse, TEST)
            );
            wrap(text, TEST, outer)
        }
        ExprKind::Await { value } => wrap(format!("await {}", expr_at(value, ATOM)), AWAIT, outer),
        ExprKind::Starred { value } => format!("*{}", expr_at(value, BOR)),
    }
}

fn constant(value: &Constant) -> String {
    match value {
        Constant::None => "None".to_string(),
        Constant::Bool(true) => "True".to_string(),
        Constant::Bool(false) => "False".to_string(),
        Constant::Int(v) => v.to_string(),
        Constant::LargeInt(digits) => digits.clone(),
        Constant::Float(v) => float_repr(*v),
        Constant::Str(s) => string_repr(s),
    }
}

/// Float text that reads back as a float
pub fn float_repr(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "1e309".to_string() } else { "-1e309".to_string() };
    }
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn escape(text: &str, quote: char, out: &mut String) {
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
}

/// Quoted string literal; single quotes unless the text holds only single quotes
pub fn string_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::new();
    out.push(quote);
    escape(text, quote, &mut out);
    out.push(quote);
    out
}

fn fstring(parts: &[FStringPart]) -> String {
    let fields: Vec<String> = parts
        .iter()
        .map(|part| match part {
            FStringPart::Literal(_) => String::new(),
            FStringPart::Expr { value, conversion, format_spec } => {
                let mut field = String::from("{");
                let inner = expr_at(value, TEST + 1);
                if inner.starts_with('{') {
                    field.push(' ');
                }
                field.push_str(&inner);
                if let Some(conversion) = conversion {
                    field.push('!');
                    field.push(*conversion);
                }
                if let Some(spec) = format_spec {
                    field.push(':');
                    field.push_str(spec);
                }
                field.push('}');
                field
            }
        })
        .collect();
    let quote = if fields.iter().any(|f| f.contains('\'')) { '"' } else { '\'' };

    let mut out = String::from("f");
    out.push(quote);
    for (part, field) in parts.iter().zip(&fields) {
        match part {
            FStringPart::Literal(text) => {
                let mut escaped = String::new();
                escape(text, quote, &mut escaped);
                out.push_str(&escaped.replace('{', "{{").replace('}', "}}"));
            }
            FStringPart::Expr { .. } => out.push_str(field),
        }
    }
    out.push(quote);
    out
}
