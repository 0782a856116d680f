// File: src/parser.rs
//
// Recursive descent parser for the host language.
// Transforms a sequence of tokens into an Abstract Syntax Tree (AST).
//
// The parser implements a traditional recursive descent parsing strategy with
// operator precedence for expressions. It supports:
// - Function definitions (sync and async) with decorators, defaults and *args
// - Control flow: if/elif/else, while/else, for/else, async for, try/except/else/finally
// - Assignment, augmented assignment and annotated assignment statements
// - import / from-import, global / nonlocal, raise ... from ...
// - Expressions with the usual precedence levels, lambdas, conditional expressions and f-strings
//
// `breakall`, `breakall: N` and `breakall @ K` need no special casing: they
// parse as an expression statement, an annotated assignment and a matrix
// multiplication respectively. The rewriter gives them their meaning.

use crate::ast::{
    Alias, BinOp, BoolOp, CmpOp, Constant, ExceptHandler, Expr, ExprKind, FStringPart, FunctionDef,
    Keyword, Location, Module, Param, Parameters, Stmt, StmtKind, UnaryOp,
};
use crate::errors::{HostError, SourceLocation};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::location::{copy_location, CopyMode};

/// Parses a whole source file.
pub fn parse_module(source: &str, filename: &str) -> Result<Module, HostError> {
    let tokens = tokenize(source).map_err(|e| e.with_file(filename))?;
    Parser::new(tokens).with_source(filename, source).parse()
}

/// Parses a single expression such as `count + 1` or `a, b`.
pub fn parse_expression(source: &str) -> Result<Expr, HostError> {
    let tokens = tokenize(source.trim())?;
    let mut parser = Parser::new(tokens).with_source("<expression>", source.trim());
    let expr = parser.parse_star_expressions()?;
    parser.expect_newline()?;
    if !matches!(parser.peek(), TokenKind::Eof) {
        return Err(parser.error("invalid syntax"));
    }
    Ok(expr)
}

/// Parser maintains position in token stream and provides methods to parse statements and expressions
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// End of the last consumed token that is not layout (Newline/Indent/Dedent)
    last_end: (usize, usize),
    filename: String,
    lines: Vec<String>,
}

impl Parser {
    /// Creates a new parser from a vector of tokens
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            let (line, column) = tokens.last().map(|t| (t.end_line, t.end_column)).unwrap_or((1, 0));
            tokens.push(Token { kind: TokenKind::Eof, line, column, end_line: line, end_column: column });
        }
        Parser { tokens, pos: 0, last_end: (1, 0), filename: "<unknown>".to_string(), lines: Vec::new() }
    }

    /// Attaches the file name and text used for error messages
    pub fn with_source(mut self, filename: &str, source: &str) -> Self {
        self.filename = filename.to_string();
        self.lines = source.lines().map(str::to_string).collect();
        self
    }

    /// Parse the entire token stream into a module
    pub fn parse(&mut self) -> Result<Module, HostError> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(Module { body })
    }

    // ----- token helpers -----

    fn current(&self) -> &Token {
        let index = self.pos.min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let index = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    /// Consume and return the current token; the final Eof is never passed
    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        if !matches!(token.kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof) {
            self.last_end = (token.end_line, token.end_column);
        }
        token
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), TokenKind::Operator(o) if o == op)
    }

    fn check_punct(&self, c: char) -> bool {
        matches!(self.peek(), TokenKind::Punctuation(p) if *p == c)
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if k == keyword)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let found = self.check_op(op);
        if found {
            self.advance();
        }
        found
    }

    fn eat_punct(&mut self, c: char) -> bool {
        let found = self.check_punct(c);
        if found {
            self.advance();
        }
        found
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.check_keyword(keyword);
        if found {
            self.advance();
        }
        found
    }

    fn expect_punct(&mut self, c: char) -> Result<Token, HostError> {
        if self.check_punct(c) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected '{}', found {}", c, describe(self.peek()))))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<Token, HostError> {
        if self.check_keyword(keyword) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected '{}', found {}", keyword, describe(self.peek()))))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, HostError> {
        match self.peek() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", describe(other)))),
        }
    }

    fn expect_newline(&mut self) -> Result<(), HostError> {
        match self.peek() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            other => Err(self.error(format!("invalid syntax: unexpected {}", describe(other)))),
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), TokenKind::Newline | TokenKind::Eof | TokenKind::Punctuation(';'))
    }

    fn at_expression_end(&self) -> bool {
        match self.peek() {
            TokenKind::Newline | TokenKind::Eof => true,
            TokenKind::Punctuation(c) => matches!(*c, ';' | ':' | ')' | ']' | '}'),
            TokenKind::Operator(op) => op == "=" || augmented_op(op).is_some(),
            _ => false,
        }
    }

    fn start(&self) -> (usize, usize) {
        let token = self.current();
        (token.line, token.column)
    }

    fn finish(&self, start: (usize, usize)) -> Location {
        Location::new(start.0, start.1, self.last_end.0, self.last_end.1)
    }

    fn error(&self, message: impl Into<String>) -> HostError {
        let token = self.current();
        self.error_at(message, token.line, token.column)
    }

    fn error_at(&self, message: impl Into<String>, line: usize, column: usize) -> HostError {
        let location = SourceLocation::with_file(line, column + 1, self.filename.clone());
        let mut error = HostError::parse_error(message.into(), location);
        if let Some(text) = self.lines.get(line.saturating_sub(1)) {
            error = error.with_source(text.clone());
        }
        error
    }

    // ----- statements -----

    fn parse_statement(&mut self) -> Result<Vec<Stmt>, HostError> {
        let stmt = match self.peek() {
            TokenKind::Keyword(k) => match k.as_str() {
                "def" => self.parse_function_def(Vec::new(), None)?,
                "async" => self.parse_async()?,
                "if" => self.parse_if()?,
                "while" => self.parse_while()?,
                "for" => self.parse_for(None)?,
                "try" => self.parse_try()?,
                "elif" | "else" | "except" | "finally" => {
                    return Err(self.error("invalid syntax"));
                }
                _ => return self.parse_simple_line(),
            },
            TokenKind::Operator(op) if op == "@" => self.parse_decorated()?,
            _ => return self.parse_simple_line(),
        };
        Ok(vec![stmt])
    }

    fn parse_simple_line(&mut self) -> Result<Vec<Stmt>, HostError> {
        let mut stmts = vec![self.parse_small_statement()?];
        while self.eat_punct(';') {
            if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_small_statement()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn parse_small_statement(&mut self) -> Result<Stmt, HostError> {
        let start = self.start();
        let kind = match self.peek() {
            TokenKind::Keyword(k) => match k.as_str() {
                "pass" => {
                    self.advance();
                    StmtKind::Pass
                }
                "break" => {
                    self.advance();
                    StmtKind::Break
                }
                "continue" => {
                    self.advance();
                    StmtKind::Continue
                }
                "return" => {
                    self.advance();
                    let value = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.parse_star_expressions()?)
                    };
                    StmtKind::Return { value }
                }
                "raise" => {
                    self.advance();
                    if self.at_statement_end() {
                        StmtKind::Raise { exc: None, cause: None }
                    } else {
                        let exc = Some(self.parse_test()?);
                        let cause = if self.eat_keyword("from") { Some(self.parse_test()?) } else { None };
                        StmtKind::Raise { exc, cause }
                    }
                }
                "global" | "nonlocal" => {
                    let global = k == "global";
                    self.advance();
                    let mut names = vec![self.expect_identifier()?];
                    while self.eat_punct(',') {
                        names.push(self.expect_identifier()?);
                    }
                    if global {
                        StmtKind::Global { names }
                    } else {
                        StmtKind::Nonlocal { names }
                    }
                }
                "import" => self.parse_import()?,
                "from" => self.parse_from_import()?,
                _ => return self.parse_expression_statement(),
            },
            _ => return self.parse_expression_statement(),
        };
        Ok(Stmt::new(kind, self.finish(start)))
    }

    fn parse_dotted_name(&mut self) -> Result<String, HostError> {
        let mut name = self.expect_identifier()?;
        while self.eat_punct('.') {
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        Ok(name)
    }

    fn parse_import(&mut self) -> Result<StmtKind, HostError> {
        self.advance();
        let mut names = Vec::new();
        loop {
            let name = self.parse_dotted_name()?;
            let asname = if self.eat_keyword("as") { Some(self.expect_identifier()?) } else { None };
            names.push(Alias { name, asname });
            if !self.eat_punct(',') {
                break;
            }
        }
        Ok(StmtKind::Import { names })
    }

    fn parse_from_import(&mut self) -> Result<StmtKind, HostError> {
        self.advance();
        if self.check_punct('.') {
            return Err(self.error("relative imports are not supported"));
        }
        let module = self.parse_dotted_name()?;
        self.expect_keyword("import")?;
        if self.check_op("*") {
            return Err(self.error("star imports are not supported"));
        }
        let parenthesized = self.eat_punct('(');
        let mut names = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let asname = if self.eat_keyword("as") { Some(self.expect_identifier()?) } else { None };
            names.push(Alias { name, asname });
            if !self.eat_punct(',') {
                break;
            }
            if parenthesized && self.check_punct(')') {
                break;
            }
        }
        if parenthesized {
            self.expect_punct(')')?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, HostError> {
        let start = self.start();
        let first = self.parse_star_expressions()?;

        if self.check_punct(':') {
            self.check_annotation_target(&first)?;
            self.advance();
            let annotation = self.parse_test()?;
            let value = if self.eat_op("=") { Some(self.parse_star_expressions()?) } else { None };
            let kind = StmtKind::AnnAssign { target: first, annotation, value };
            return Ok(Stmt::new(kind, self.finish(start)));
        }

        if self.check_op("=") {
            let mut targets = vec![first];
            let value = loop {
                self.advance();
                let next = self.parse_star_expressions()?;
                if self.check_op("=") {
                    targets.push(next);
                } else {
                    break next;
                }
            };
            for target in &targets {
                self.check_assignable(target)?;
            }
            return Ok(Stmt::new(StmtKind::Assign { targets, value }, self.finish(start)));
        }

        if let TokenKind::Operator(op) = self.peek() {
            if let Some(op) = augmented_op(op) {
                self.advance();
                if !matches!(
                    first.kind,
                    ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
                ) {
                    return Err(self.error_at(
                        "illegal expression for augmented assignment",
                        first.location.line,
                        first.location.column,
                    ));
                }
                let value = self.parse_star_expressions()?;
                let kind = StmtKind::AugAssign { target: first, op, value };
                return Ok(Stmt::new(kind, self.finish(start)));
            }
        }

        Ok(Stmt::new(StmtKind::Expr { value: first }, self.finish(start)))
    }

    fn check_assignable(&self, target: &Expr) -> Result<(), HostError> {
        match &target.kind {
            ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple { elts } | ExprKind::List { elts } => {
                elts.iter().try_for_each(|elt| self.check_assignable(elt))
            }
            ExprKind::Starred { value } => self.check_assignable(value),
            _ => Err(self.error_at(
                "cannot assign to expression",
                target.location.line,
                target.location.column,
            )),
        }
    }

    fn check_annotation_target(&self, target: &Expr) -> Result<(), HostError> {
        match &target.kind {
            ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple { .. } => Err(self.error_at(
                "only single target (not tuple) can be annotated",
                target.location.line,
                target.location.column,
            )),
            _ => Err(self.error_at(
                "illegal target for annotation",
                target.location.line,
                target.location.column,
            )),
        }
    }

    /// `:` followed by either a simple line or an indented block
    fn parse_block(&mut self) -> Result<Vec<Stmt>, HostError> {
        self.expect_punct(':')?;
        if !matches!(self.peek(), TokenKind::Newline) {
            return self.parse_simple_line();
        }
        self.advance();
        if !matches!(self.peek(), TokenKind::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.advance();

        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(body)
    }

    fn parse_async(&mut self) -> Result<Stmt, HostError> {
        let start = self.start();
        self.advance();
        if self.check_keyword("def") {
            self.parse_function_def(Vec::new(), Some(start))
        } else if self.check_keyword("for") {
            self.parse_for(Some(start))
        } else {
            Err(self.error("expected 'def' or 'for' after 'async'"))
        }
    }

    fn parse_decorated(&mut self) -> Result<Stmt, HostError> {
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(self.parse_test()?);
            self.expect_newline()?;
        }
        if self.check_keyword("def") {
            self.parse_function_def(decorators, None)
        } else if self.check_keyword("async") {
            let start = self.start();
            self.advance();
            if !self.check_keyword("def") {
                return Err(self.error("expected 'def' after 'async'"));
            }
            self.parse_function_def(decorators, Some(start))
        } else {
            Err(self.error("expected a function definition after decorators"))
        }
    }

    fn parse_function_def(
        &mut self,
        decorators: Vec<Expr>,
        async_start: Option<(usize, usize)>,
    ) -> Result<Stmt, HostError> {
        let is_async = async_start.is_some();
        let start = async_start.unwrap_or_else(|| self.start());
        self.expect_keyword("def")?;
        let name = self.expect_identifier()?;
        self.expect_punct('(')?;
        let params = self.parse_parameters(')', true)?;
        self.expect_punct(')')?;
        let returns = if self.eat_op("->") { Some(self.parse_test()?) } else { None };
        let body = self.parse_block()?;

        let def = FunctionDef { name, params, body, decorators, returns, is_async };
        Ok(Stmt::new(StmtKind::FunctionDef(def), self.finish(start)))
    }

    fn parse_parameters(&mut self, closing: char, annotations: bool) -> Result<Parameters, HostError> {
        let mut params = Parameters::default();
        while !self.check_punct(closing) {
            if self.check_op("**") {
                return Err(self.error("keyword parameter collections are not supported"));
            }
            if self.eat_op("*") {
                if params.vararg.is_some() {
                    return Err(self.error("duplicate *args parameter"));
                }
                params.vararg = Some(self.expect_identifier()?);
            } else {
                if params.vararg.is_some() {
                    return Err(self.error("parameters after *args are not supported"));
                }
                let name = self.expect_identifier()?;
                let annotation =
                    if annotations && self.eat_punct(':') { Some(self.parse_test()?) } else { None };
                let default = if self.eat_op("=") { Some(self.parse_test()?) } else { None };
                if default.is_none() && params.args.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                params.args.push(Param { name, annotation, default });
            }
            if !self.eat_punct(',') {
                break;
            }
        }
        Ok(params)
    }

    /// Parses `if` and `elif` alike; `elif` chains nest in `orelse`
    fn parse_if(&mut self) -> Result<Stmt, HostError> {
        let start = self.start();
        self.advance();
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = if self.check_keyword("elif") {
            vec![self.parse_if()?]
        } else if self.eat_keyword("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(StmtKind::If { test, body, orelse }, self.finish(start)))
    }

    fn parse_while(&mut self) -> Result<Stmt, HostError> {
        let start = self.start();
        self.advance();
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_keyword("else") { self.parse_block()? } else { Vec::new() };
        Ok(Stmt::new(StmtKind::While { test, body, orelse }, self.finish(start)))
    }

    fn parse_for(&mut self, async_start: Option<(usize, usize)>) -> Result<Stmt, HostError> {
        let is_async = async_start.is_some();
        let start = async_start.unwrap_or_else(|| self.start());
        self.expect_keyword("for")?;
        let target = self.parse_target_list()?;
        self.check_assignable(&target)?;
        self.expect_keyword("in")?;
        let iter = self.parse_star_expressions()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_keyword("else") { self.parse_block()? } else { Vec::new() };
        Ok(Stmt::new(StmtKind::For { target, iter, body, orelse, is_async }, self.finish(start)))
    }

    fn parse_target_list(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        let first = self.parse_target()?;
        if !self.check_punct(',') {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_punct(',') {
            if self.check_keyword("in") {
                break;
            }
            elts.push(self.parse_target()?);
        }
        Ok(Expr::new(ExprKind::Tuple { elts }, self.finish(start)))
    }

    fn parse_target(&mut self) -> Result<Expr, HostError> {
        if self.check_op("*") {
            let start = self.start();
            self.advance();
            let value = self.parse_bitor()?;
            return Ok(Expr::new(ExprKind::Starred { value: Box::new(value) }, self.finish(start)));
        }
        self.parse_bitor()
    }

    fn parse_try(&mut self) -> Result<Stmt, HostError> {
        let start = self.start();
        self.advance();
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        while self.check_keyword("except") {
            let handler_start = self.start();
            self.advance();
            let type_ = if self.check_punct(':') { None } else { Some(self.parse_test()?) };
            let name = if self.eat_keyword("as") { Some(self.expect_identifier()?) } else { None };
            let body = self.parse_block()?;
            handlers.push(ExceptHandler { type_, name, body, location: self.finish(handler_start) });
        }

        let orelse = if !handlers.is_empty() && self.eat_keyword("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_keyword("finally") { self.parse_block()? } else { Vec::new() };

        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt::new(StmtKind::Try { body, handlers, orelse, finalbody }, self.finish(start)))
    }

    // ----- expressions, lowest precedence first -----

    /// Comma separated expressions; more than one element makes a tuple
    pub fn parse_star_expressions(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        let first = self.parse_star_or_test()?;
        if !self.check_punct(',') {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_punct(',') {
            if self.at_expression_end() {
                break;
            }
            elts.push(self.parse_star_or_test()?);
        }
        Ok(Expr::new(ExprKind::Tuple { elts }, self.finish(start)))
    }

    fn parse_star_or_test(&mut self) -> Result<Expr, HostError> {
        if self.check_op("*") {
            let start = self.start();
            self.advance();
            let value = self.parse_bitor()?;
            return Ok(Expr::new(ExprKind::Starred { value: Box::new(value) }, self.finish(start)));
        }
        self.parse_test()
    }

    pub fn parse_test(&mut self) -> Result<Expr, HostError> {
        if self.check_keyword("lambda") {
            return self.parse_lambda();
        }
        let start = self.start();
        let body = self.parse_or_test()?;
        if !self.eat_keyword("if") {
            return Ok(body);
        }
        let test = self.parse_or_test()?;
        self.expect_keyword("else")?;
        let orelse = self.parse_test()?;
        let kind = ExprKind::IfExp { test: Box::new(test), body: Box::new(body), orelse: Box::new(orelse) };
        Ok(Expr::new(kind, self.finish(start)))
    }

    fn parse_lambda(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        self.advance();
        let params = self.parse_parameters(':', false)?;
        self.expect_punct(':')?;
        let body = self.parse_test()?;
        Ok(Expr::new(ExprKind::Lambda { params, body: Box::new(body) }, self.finish(start)))
    }

    fn parse_or_test(&mut self) -> Result<Expr, HostError> {
        self.parse_bool_level("or", BoolOp::Or, Self::parse_and_test)
    }

    fn parse_and_test(&mut self) -> Result<Expr, HostError> {
        self.parse_bool_level("and", BoolOp::And, Self::parse_not_test)
    }

    fn parse_bool_level(
        &mut self,
        keyword: &str,
        op: BoolOp,
        next: fn(&mut Self) -> Result<Expr, HostError>,
    ) -> Result<Expr, HostError> {
        let start = self.start();
        let first = next(self)?;
        if !self.check_keyword(keyword) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword(keyword) {
            values.push(next(self)?);
        }
        Ok(Expr::new(ExprKind::BoolOp { op, values }, self.finish(start)))
    }

    fn parse_not_test(&mut self) -> Result<Expr, HostError> {
        if !self.check_keyword("not") {
            return self.parse_comparison();
        }
        let start = self.start();
        self.advance();
        let operand = self.parse_not_test()?;
        Ok(Expr::new(ExprKind::UnaryOp { op: UnaryOp::Not, operand: Box::new(operand) }, self.finish(start)))
    }

    fn comparison_op(&self) -> Option<(CmpOp, usize)> {
        match self.peek() {
            TokenKind::Operator(op) => {
                let cmp = match op.as_str() {
                    "==" => CmpOp::Eq,
                    "!=" => CmpOp::NotEq,
                    "<" => CmpOp::Lt,
                    "<=" => CmpOp::LtE,
                    ">" => CmpOp::Gt,
                    ">=" => CmpOp::GtE,
                    _ => return None,
                };
                Some((cmp, 1))
            }
            TokenKind::Keyword(k) if k == "in" => Some((CmpOp::In, 1)),
            TokenKind::Keyword(k) if k == "not" => match self.peek_nth(1) {
                TokenKind::Keyword(next) if next == "in" => Some((CmpOp::NotIn, 2)),
                _ => None,
            },
            TokenKind::Keyword(k) if k == "is" => match self.peek_nth(1) {
                TokenKind::Keyword(next) if next == "not" => Some((CmpOp::IsNot, 2)),
                _ => Some((CmpOp::Is, 1)),
            },
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some((op, width)) = self.comparison_op() {
            for _ in 0..width {
                self.advance();
            }
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let kind = ExprKind::Compare { left: Box::new(left), ops, comparators };
        Ok(Expr::new(kind, self.finish(start)))
    }

    fn parse_binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<Expr, HostError>,
    ) -> Result<Expr, HostError> {
        let start = self.start();
        let mut left = next(self)?;
        loop {
            let op = match self.peek() {
                TokenKind::Operator(o) if ops.contains(&o.as_str()) => BinOp::from_symbol(o),
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            let right = next(self)?;
            let kind = ExprKind::BinOp { left: Box::new(left), op, right: Box::new(right) };
            left = Expr::new(kind, self.finish(start));
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Expr, HostError> {
        self.parse_binary_level(&["|"], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, HostError> {
        self.parse_binary_level(&["^"], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> Result<Expr, HostError> {
        self.parse_binary_level(&["&"], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> Result<Expr, HostError> {
        self.parse_binary_level(&["<<", ">>"], Self::parse_arith)
    }

    fn parse_arith(&mut self) -> Result<Expr, HostError> {
        self.parse_binary_level(&["+", "-"], Self::parse_term)
    }

    fn parse_term(&mut self) -> Result<Expr, HostError> {
        self.parse_binary_level(&["*", "/", "//", "%", "@"], Self::parse_factor)
    }

    fn parse_factor(&mut self) -> Result<Expr, HostError> {
        let op = match self.peek() {
            TokenKind::Operator(o) if o == "-" => Some(UnaryOp::USub),
            TokenKind::Operator(o) if o == "+" => Some(UnaryOp::UAdd),
            TokenKind::Operator(o) if o == "~" => Some(UnaryOp::Invert),
            _ => None,
        };
        let Some(op) = op else { return self.parse_power() };
        let start = self.start();
        self.advance();
        let operand = self.parse_factor()?;
        Ok(Expr::new(ExprKind::UnaryOp { op, operand: Box::new(operand) }, self.finish(start)))
    }

    fn parse_power(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        let base = self.parse_await()?;
        if !self.eat_op("**") {
            return Ok(base);
        }
        let exponent = self.parse_factor()?;
        let kind = ExprKind::BinOp { left: Box::new(base), op: BinOp::Pow, right: Box::new(exponent) };
        Ok(Expr::new(kind, self.finish(start)))
    }

    fn parse_await(&mut self) -> Result<Expr, HostError> {
        if !self.check_keyword("await") {
            return self.parse_primary();
        }
        let start = self.start();
        self.advance();
        let value = self.parse_primary()?;
        Ok(Expr::new(ExprKind::Await { value: Box::new(value) }, self.finish(start)))
    }

    fn parse_primary(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat_punct('(') {
                let (args, keywords) = self.parse_call_args()?;
                self.expect_punct(')')?;
                let kind = ExprKind::Call { func: Box::new(expr), args, keywords };
                expr = Expr::new(kind, self.finish(start));
            } else if self.eat_punct('[') {
                if self.check_punct(':') {
                    return Err(self.error("slices are not supported"));
                }
                let index = self.parse_star_expressions()?;
                if self.check_punct(':') {
                    return Err(self.error("slices are not supported"));
                }
                self.expect_punct(']')?;
                let kind = ExprKind::Subscript { value: Box::new(expr), index: Box::new(index) };
                expr = Expr::new(kind, self.finish(start));
            } else if self.eat_punct('.') {
                let attr = self.expect_identifier()?;
                expr = Expr::new(ExprKind::Attribute { value: Box::new(expr), attr }, self.finish(start));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>), HostError> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !self.check_punct(')') {
            if self.check_op("**") {
                return Err(self.error("keyword argument unpacking is not supported"));
            }
            let is_keyword = matches!(self.peek(), TokenKind::Identifier(_))
                && matches!(self.peek_nth(1), TokenKind::Operator(o) if o == "=");
            if is_keyword {
                let arg = self.expect_identifier()?;
                self.advance();
                let value = self.parse_test()?;
                keywords.push(Keyword { arg, value });
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.parse_star_or_test()?);
                if self.check_keyword("for") {
                    return Err(self.error("generator expressions are not supported"));
                }
            }
            if !self.eat_punct(',') {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn parse_atom(&mut self) -> Result<Expr, HostError> {
        let token = self.current().clone();
        let location = token_location(&token);
        let kind = match token.kind {
            TokenKind::Identifier(id) => ExprKind::Name { id },
            TokenKind::Int(value) => ExprKind::Constant { value: Constant::Int(value) },
            TokenKind::LargeInt(digits) => ExprKind::Constant { value: Constant::LargeInt(digits) },
            TokenKind::Float(value) => ExprKind::Constant { value: Constant::Float(value) },
            TokenKind::String(_) | TokenKind::FString(_) => return self.parse_strings(),
            TokenKind::Keyword(ref k) if k == "True" => ExprKind::Constant { value: Constant::Bool(true) },
            TokenKind::Keyword(ref k) if k == "False" => ExprKind::Constant { value: Constant::Bool(false) },
            TokenKind::Keyword(ref k) if k == "None" => ExprKind::Constant { value: Constant::None },
            TokenKind::Punctuation('(') => return self.parse_parenthesized(),
            TokenKind::Punctuation('[') => return self.parse_list(),
            TokenKind::Punctuation('{') => return self.parse_dict(),
            ref other => {
                return Err(self.error(format!("invalid syntax: unexpected {}", describe(other))));
            }
        };
        self.advance();
        Ok(Expr::new(kind, location))
    }

    fn parse_parenthesized(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        self.advance();
        if self.eat_punct(')') {
            return Ok(Expr::new(ExprKind::Tuple { elts: Vec::new() }, self.finish(start)));
        }
        let first = self.parse_star_or_test()?;
        if self.check_keyword("for") {
            return Err(self.error("generator expressions are not supported"));
        }
        if self.eat_punct(')') {
            return Ok(first);
        }
        if !self.check_punct(',') {
            return Err(self.error(format!("expected ')', found {}", describe(self.peek()))));
        }
        let mut elts = vec![first];
        while self.eat_punct(',') {
            if self.check_punct(')') {
                break;
            }
            elts.push(self.parse_star_or_test()?);
        }
        self.expect_punct(')')?;
        Ok(Expr::new(ExprKind::Tuple { elts }, self.finish(start)))
    }

    fn parse_list(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        self.advance();
        let mut elts = Vec::new();
        while !self.check_punct(']') {
            elts.push(self.parse_star_or_test()?);
            if self.check_keyword("for") {
                return Err(self.error("comprehensions are not supported"));
            }
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(']')?;
        Ok(Expr::new(ExprKind::List { elts }, self.finish(start)))
    }

    fn parse_dict(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        self.advance();
        let mut keys = Vec::new();
        let mut values = Vec::new();
        while !self.check_punct('}') {
            keys.push(self.parse_test()?);
            if !self.check_punct(':') {
                return Err(self.error("set literals are not supported"));
            }
            self.advance();
            values.push(self.parse_test()?);
            if self.check_keyword("for") {
                return Err(self.error("comprehensions are not supported"));
            }
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct('}')?;
        Ok(Expr::new(ExprKind::Dict { keys, values }, self.finish(start)))
    }

    /// Adjacent string literals concatenate; any f-string makes the result a JoinedStr
    fn parse_strings(&mut self) -> Result<Expr, HostError> {
        let start = self.start();
        let mut parts = Vec::new();
        let mut formatted = false;
        while matches!(self.peek(), TokenKind::String(_) | TokenKind::FString(_)) {
            let token = self.advance();
            let location = token_location(&token);
            match token.kind {
                TokenKind::FString(text) => {
                    formatted = true;
                    for part in self.parse_fstring(&text, location)? {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, text),
                            expr => parts.push(expr),
                        }
                    }
                }
                TokenKind::String(text) => push_literal(&mut parts, text),
                _ => {}
            }
        }

        let location = self.finish(start);
        if formatted {
            return Ok(Expr::new(ExprKind::JoinedStr { parts }, location));
        }
        let text: String = parts
            .into_iter()
            .map(|part| match part {
                FStringPart::Literal(text) => text,
                FStringPart::Expr { .. } => String::new(),
            })
            .collect();
        Ok(Expr::new(ExprKind::Constant { value: Constant::Str(text) }, location))
    }

    /// Splits an f-string body into literal text and `{expr[!conv][:spec]}` fields.
    /// Field expressions take the position of the whole f-string token.
    fn parse_fstring(&self, text: &str, location: Location) -> Result<Vec<FStringPart>, HostError> {
        let chars: Vec<char> = text.chars().collect();
        let fail = |message: &str| self.error_at(format!("f-string: {}", message), location.line, location.column);
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    literal.push('}');
                    i += 2;
                    continue;
                }
                return Err(fail("single '}' is not allowed"));
            }
            if c != '{' {
                literal.push(c);
                i += 1;
                continue;
            }
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }
            if !literal.is_empty() {
                parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
            }

            let expr_start = i + 1;
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            let mut expr_end = None;
            let mut j = expr_start;
            while j < chars.len() {
                let d = chars[j];
                if let Some(q) = quote {
                    if d == q {
                        quote = None;
                    }
                    j += 1;
                    continue;
                }
                match d {
                    '\'' | '"' => quote = Some(d),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' if depth > 0 => depth -= 1,
                    '}' | ':' if depth == 0 => {
                        expr_end = Some(j);
                        break;
                    }
                    '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => {
                        expr_end = Some(j);
                        break;
                    }
                    _ => {}
                }
                j += 1;
            }
            let Some(mut k) = expr_end else { return Err(fail("expecting '}'")) };

            let source: String = chars[expr_start..k].iter().collect();
            if source.trim().is_empty() {
                return Err(fail("empty expression not allowed"));
            }
            let mut value = parse_expression(&source)
                .map_err(|e| fail(&e.message))?;
            copy_location(location, &mut value, CopyMode::STAMP);

            let mut conversion = None;
            if chars[k] == '!' {
                conversion = chars.get(k + 1).copied();
                if !matches!(conversion, Some('r' | 's' | 'a')) {
                    return Err(fail("invalid conversion character: expected 's', 'r', or 'a'"));
                }
                k += 2;
            }
            let mut format_spec = None;
            if chars.get(k) == Some(&':') {
                let spec_start = k + 1;
                let mut close = spec_start;
                while close < chars.len() && chars[close] != '}' {
                    close += 1;
                }
                format_spec = Some(chars[spec_start..close].iter().collect());
                k = close;
            }
            if chars.get(k) != Some(&'}') {
                return Err(fail("expecting '}'"));
            }

            parts.push(FStringPart::Expr { value: Box::new(value), conversion, format_spec });
            i = k + 1;
        }

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }
}

fn token_location(token: &Token) -> Location {
    Location::new(token.line, token.column, token.end_line, token.end_column)
}

fn push_literal(parts: &mut Vec<FStringPart>, text: String) {
    if let Some(FStringPart::Literal(previous)) = parts.last_mut() {
        previous.push_str(&text);
    } else if !text.is_empty() {
        parts.push(FStringPart::Literal(text));
    }
}

/// Operator of an augmented assignment token such as `+=` or `//=`
fn augmented_op(token: &str) -> Option<BinOp> {
    let symbol = token.strip_suffix('=')?;
    if symbol.is_empty() {
        return None;
    }
    BinOp::from_symbol(symbol)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Identifier(name) => format!("name '{}'", name),
        TokenKind::Int(value) => format!("number {}", value),
        TokenKind::LargeInt(digits) => format!("number {}", digits),
        TokenKind::Float(value) => format!("number {}", value),
        TokenKind::String(_) | TokenKind::FString(_) => "string literal".to_string(),
        TokenKind::Operator(op) => format!("'{}'", op),
        TokenKind::Punctuation(c) => format!("'{}'", c),
        TokenKind::Keyword(k) => format!("keyword '{}'", k),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Indent => "indent".to_string(),
        TokenKind::Dedent => "dedent".to_string(),
        TokenKind::Eof => "end of file".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        parse_module(source, "<test>").unwrap().body
    }

    #[test]
    fn test_breakall_forms_parse_as_plain_statements() {
        let body = parse("breakall\nbreakall: 2\nbreakall @ 3\n");
        assert!(matches!(&body[0].kind, StmtKind::Expr { value } if value.is_name("breakall")));
        assert!(matches!(
            &body[1].kind,
            StmtKind::AnnAssign { target, value: None, .. } if target.is_name("breakall")
        ));
        let StmtKind::Expr { value } = &body[2].kind else { panic!("expected expression") };
        assert!(matches!(&value.kind, ExprKind::BinOp { op: BinOp::MatMult, .. }));
    }

    #[test]
    fn test_statement_locations() {
        let body = parse("for i in x:\n    breakall: 2\n");
        assert_eq!(body[0].location, Location::new(1, 0, 2, 15));
        let StmtKind::For { body: inner, .. } = &body[0].kind else { panic!("expected for") };
        assert_eq!(inner[0].location, Location::new(2, 4, 2, 15));
    }

    #[test]
    fn test_elif_nests_in_orelse() {
        let body = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    pass\n");
        let StmtKind::If { orelse, .. } = &body[0].kind else { panic!("expected if") };
        assert!(matches!(&orelse[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
    }

    #[test]
    fn test_decorated_async_function() {
        let body = parse("@enable_breakall\nasync def f(a, b=2, *rest):\n    return a\n");
        let StmtKind::FunctionDef(def) = &body[0].kind else { panic!("expected def") };
        assert!(def.is_async);
        assert_eq!(def.decorators.len(), 1);
        assert_eq!(def.params.args.len(), 2);
        assert_eq!(def.params.vararg.as_deref(), Some("rest"));
        assert_eq!(body[0].location.line, 2);
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        let ExprKind::BinOp { op, right, .. } = expr.kind else { panic!("expected binop") };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mult, .. }));
    }

    #[test]
    fn test_fstring_fields() {
        let expr = parse_expression("f'Count: {count!r}'").unwrap();
        let ExprKind::JoinedStr { parts } = expr.kind else { panic!("expected f-string") };
        assert_eq!(parts[0], FStringPart::Literal("Count: ".into()));
        assert!(matches!(&parts[1], FStringPart::Expr { conversion: Some('r'), .. }));
    }

    #[test]
    fn test_try_requires_handler() {
        assert!(parse_module("try:\n    pass\n", "<test>").is_err());
    }

    #[test]
    fn test_invalid_assignment_target() {
        let error = parse_module("f() = 1\n", "t.py").unwrap_err();
        assert!(error.message.contains("cannot assign"));
        assert_eq!(error.location.file.as_deref(), Some("t.py"));
    }

    #[test]
    fn test_tuple_unpacking_in_for() {
        let body = parse("for a, b in pairs:\n    pass\n");
        let StmtKind::For { target, .. } = &body[0].kind else { panic!("expected for") };
        assert!(matches!(&target.kind, ExprKind::Tuple { elts } if elts.len() == 2));
    }
}
