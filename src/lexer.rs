// File: src/lexer.rs
//
// Lexical analyzer (tokenizer) for the host language rewritten by breakall.
// Converts source code text into a stream of tokens for parsing.
//
// The host language is indentation structured, so besides the usual tokens the
// lexer produces Newline, Indent and Dedent markers:
// - Newlines inside (), [] and {} or after a `\` continuation are ignored
// - Blank and comment-only lines never change the indentation level
// - Tabs advance the indentation width to the next multiple of 8
//
// Supports:
// - Keywords: def, async, await, return, if, elif, else, for, in, while, break,
//   continue, pass, try, except, finally, as, raise, from, import, lambda, and,
//   or, not, is, global, nonlocal, True, False, None
// - Identifiers, integers (decimal, hex, octal, binary, `_` separators), floats
// - String literals (single, double and triple quoted, raw, f-strings)
// - Operators: + - * / // % ** @ << >> & | ^ ~ < > <= >= == != = -> := and
//   every augmented assignment form
// - Punctuation: ( ) [ ] { } , : . ;
// - Comments starting with #

use ahash::AHashSet;
use once_cell::sync::Lazy;

use crate::errors::{HostError, SourceLocation};

static KEYWORDS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "def", "async", "await", "return", "if", "elif", "else", "for", "in", "while", "break",
        "continue", "pass", "try", "except", "finally", "as", "raise", "from", "import", "lambda",
        "and", "or", "not", "is", "global", "nonlocal", "True", "False", "None",
    ]
    .into_iter()
    .collect()
});

const THREE_CHAR_OPERATORS: [&str; 5] = ["**=", "//=", ">>=", "<<=", "..."];
const TWO_CHAR_OPERATORS: [&str; 19] = [
    "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "->", "+=", "-=", "*=", "/=", "%=", "@=",
    "&=", "|=", "^=", ":=",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Int(i64),
    /// Decimal digits of an integer literal beyond the `i64` range
    LargeInt(String),
    Float(f64),
    String(String),
    /// Raw body of an f-string; the parser splits it into literal and expression parts
    FString(String),
    Operator(String),
    Punctuation(char),
    Keyword(String),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

/// Tokenizes host source code into a vector of tokens.
///
/// The returned stream always ends with `Eof`, preceded by a `Newline` and
/// enough `Dedent` tokens to close every open block.
pub fn tokenize(source: &str) -> Result<Vec<Token>, HostError> {
    Lexer::new(source).run()
}

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(word)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
    lines: Vec<String>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 0,
            indents: vec![0],
            bracket_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
            lines: source.lines().map(str::to_string).collect(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error_at(&self, message: impl Into<String>, line: usize, column: usize) -> HostError {
        let mut error =
            HostError::parse_error(message.into(), SourceLocation::new(line, column + 1));
        if let Some(text) = self.lines.get(line.saturating_sub(1)) {
            error = error.with_source(text.clone());
        }
        error
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column, end_line: self.line, end_column: self.col });
    }

    fn push_marker(&mut self, kind: TokenKind) {
        let (line, col) = (self.line, self.col);
        self.tokens.push(Token { kind, line, column: col, end_line: line, end_column: col });
    }

    fn last_is_newline(&self) -> bool {
        matches!(self.tokens.last().map(|t| &t.kind), None | Some(TokenKind::Newline))
    }

    fn run(mut self) -> Result<Vec<Token>, HostError> {
        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                if !self.read_indentation()? {
                    break;
                }
                continue;
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    if self.bracket_depth == 0 && !self.last_is_newline() {
                        self.push_marker(TokenKind::Newline);
                    }
                    self.bump();
                    if self.bracket_depth == 0 {
                        self.at_line_start = true;
                    }
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.bump();
                    self.bump();
                    self.bump();
                }
                '"' | '\'' => self.lex_string(String::new())?,
                '0'..='9' => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => self.lex_word()?,
                _ => self.lex_operator()?,
            }
        }

        if !self.last_is_newline() {
            self.push_marker(TokenKind::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push_marker(TokenKind::Dedent);
        }
        self.push_marker(TokenKind::Eof);
        Ok(self.tokens)
    }

    /// Measures the indentation of a new logical line and emits Indent/Dedent.
    /// Returns false once the input is exhausted.
    fn read_indentation(&mut self) -> Result<bool, HostError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width += 8 - width % 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.bump();
                return Ok(true);
            }
            Some('\r') => {
                self.bump();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push_marker(TokenKind::Indent);
        } else {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push_marker(TokenKind::Dedent);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(self.error_at(
                    "unindent does not match any outer indentation level",
                    self.line,
                    self.col,
                ));
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_word(&mut self) -> Result<(), HostError> {
        let (line, column) = (self.line, self.col);
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }

        // String prefixes: r"..", f"..", b"..", rf"..", fr"..", u".."
        if matches!(self.peek(), Some('"' | '\'')) && is_string_prefix(&word) {
            self.pos -= word.chars().count();
            self.col -= word.chars().count();
            return self.lex_string(word.to_lowercase());
        }

        let kind = if is_keyword(&word) {
            TokenKind::Keyword(word)
        } else {
            TokenKind::Identifier(word)
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn lex_string(&mut self, prefix: String) -> Result<(), HostError> {
        let (line, column) = (self.line, self.col);
        for _ in 0..prefix.chars().count() {
            self.bump();
        }
        let raw = prefix.contains('r');
        let formatted = prefix.contains('f');

        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut text = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error_at("unterminated string literal", line, column));
            };
            if c == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
                text.push(c);
                self.bump();
                continue;
            }
            if c == '\n' && !triple {
                return Err(self.error_at("unterminated string literal", line, column));
            }
            if c == '\\' {
                self.bump();
                let Some(escaped) = self.bump() else {
                    return Err(self.error_at("unterminated string literal", line, column));
                };
                if raw {
                    text.push('\\');
                    text.push(escaped);
                    continue;
                }
                match escaped {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    '0' => text.push('\0'),
                    '\\' => text.push('\\'),
                    '\'' => text.push('\''),
                    '"' => text.push('"'),
                    '\n' => {}
                    other => {
                        text.push('\\');
                        text.push(other);
                    }
                }
                continue;
            }
            text.push(c);
            self.bump();
        }

        let kind = if formatted { TokenKind::FString(text) } else { TokenKind::String(text) };
        self.push(kind, line, column);
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), HostError> {
        let (line, column) = (self.line, self.col);

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c.is_digit(radix) {
                        digits.push(c);
                    } else if c != '_' {
                        break;
                    }
                    self.bump();
                }
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| self.error_at("invalid integer literal", line, column))?;
                self.push(TokenKind::Int(value), line, column);
                return Ok(());
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '_' {
                // separators are dropped
            } else if c == '.' && !is_float && self.peek_at(1).map_or(true, |n| !n.is_alphabetic())
            {
                is_float = true;
                text.push(c);
            } else if matches!(c, 'e' | 'E')
                && (self.peek_at(1).is_some_and(|n| n.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+' | '-'))
                        && self.peek_at(2).is_some_and(|n| n.is_ascii_digit())))
            {
                is_float = true;
                text.push(c);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
                continue;
            } else {
                break;
            }
            self.bump();
        }

        let kind = if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error_at("invalid float literal", line, column))?;
            TokenKind::Float(value)
        } else {
            match text.parse::<i64>() {
                Ok(value) => TokenKind::Int(value),
                Err(_) => TokenKind::LargeInt(text),
            }
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn lex_operator(&mut self) -> Result<(), HostError> {
        let (line, column) = (self.line, self.col);
        let rest: String = self.chars[self.pos..self.chars.len().min(self.pos + 3)].iter().collect();

        for op in THREE_CHAR_OPERATORS {
            if rest.starts_with(op) {
                for _ in 0..3 {
                    self.bump();
                }
                self.push(TokenKind::Operator(op.to_string()), line, column);
                return Ok(());
            }
        }
        for op in TWO_CHAR_OPERATORS {
            if rest.starts_with(op) {
                self.bump();
                self.bump();
                self.push(TokenKind::Operator(op.to_string()), line, column);
                return Ok(());
            }
        }

        let Some(c) = self.bump() else { return Ok(()) };
        let kind = match c {
            '+' | '-' | '*' | '/' | '%' | '@' | '&' | '|' | '^' | '~' | '<' | '>' | '=' => {
                TokenKind::Operator(c.to_string())
            }
            '(' | '[' | '{' => {
                self.bracket_depth += 1;
                TokenKind::Punctuation(c)
            }
            ')' | ']' | '}' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::Punctuation(c)
            }
            ',' | ':' | '.' | ';' => TokenKind::Punctuation(c),
            other => {
                return Err(self.error_at(format!("invalid character '{}'", other), line, column));
            }
        };
        self.push(kind, line, column);
        Ok(())
    }
}

fn is_string_prefix(word: &str) -> bool {
    let lower = word.to_lowercase();
    matches!(lower.as_str(), "r" | "f" | "b" | "u" | "rf" | "fr" | "rb" | "br")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = kinds("for i in x:\n    pass\nbreak\n");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Keyword("for".into()),
                TokenKind::Identifier("i".into()),
                TokenKind::Keyword("in".into()),
                TokenKind::Identifier("x".into()),
                TokenKind::Punctuation(':'),
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Keyword("pass".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Keyword("break".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_do_not_indent() {
        let tokens = kinds("x = 1\n\n        # comment\nx\n");
        assert!(!tokens.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = kinds("f(1,\n  2)\n");
        let newlines = tokens.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_breakall_forms() {
        assert_eq!(
            kinds("breakall @ 2"),
            vec![
                TokenKind::Identifier("breakall".into()),
                TokenKind::Operator("@".into()),
                TokenKind::Int(2),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("breakall: 2")[1], TokenKind::Punctuation(':'));
    }

    #[test]
    fn test_token_columns_are_zero_based() {
        let tokens = tokenize("    x").unwrap();
        let name = tokens.iter().find(|t| matches!(t.kind, TokenKind::Identifier(_))).unwrap();
        assert_eq!((name.line, name.column, name.end_column), (1, 4, 5));
    }

    #[test]
    fn test_strings_and_prefixes() {
        assert_eq!(kinds("'a\\nb'")[0], TokenKind::String("a\nb".into()));
        assert_eq!(kinds("r'a\\nb'")[0], TokenKind::String("a\\nb".into()));
        assert_eq!(kinds("f\"n={n}\"")[0], TokenKind::FString("n={n}".into()));
        assert_eq!(kinds("'''x\ny'''")[0], TokenKind::String("x\ny".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("0x1f")[0], TokenKind::Int(31));
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(kinds("99_999_999_999_999_999_999")[0], TokenKind::LargeInt("99999999999999999999".to_string()));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
    }

    #[test]
    fn test_bad_dedent_is_an_error() {
        let error = tokenize("if x:\n        a\n    b\n").unwrap_err();
        assert!(error.message.contains("unindent"));
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert!(tokenize("x = 'abc\n").is_err());
    }
}
