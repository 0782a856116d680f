// File: src/errors.rs
//
// Error handling and reporting for breakall.
//
// Two families of errors live here:
// - `BreakAllError`: the diagnostics raised for misused or out-of-range exits,
//   either while rewriting (syntax), while resolving a computed exit (runtime)
//   or while fetching a function's source (environment).
// - `HostError`: parse errors and uncaught exceptions of the host language,
//   pretty-printed with source location information.

use colored::Colorize;
use std::fmt;

/// Source location information for tracking where code appears in a file
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub file: Option<String>,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column, file: None }
    }

    pub fn with_file(line: usize, column: usize, file: String) -> Self {
        Self { line, column, file: Some(file) }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:{}:{}", file, self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// Types of host errors
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    ParseError,
    /// An exception escaped to the top level; carries the class name
    Exception(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::ParseError => write!(f, "SyntaxError"),
            ErrorKind::Exception(class) => write!(f, "{}", class),
        }
    }
}

/// A host language error with location information
#[derive(Debug, Clone, PartialEq)]
pub struct HostError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: SourceLocation,
    pub source_line: Option<String>,
    pub help: Option<String>,
}

impl HostError {
    pub fn new(kind: ErrorKind, message: String, location: SourceLocation) -> Self {
        Self { kind, message, location, source_line: None, help: None }
    }

    pub fn with_source(mut self, source_line: String) -> Self {
        self.source_line = Some(source_line);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn with_file(mut self, file: &str) -> Self {
        self.location.file = Some(file.to_string());
        self
    }

    /// Create a parse error
    pub fn parse_error(message: String, location: SourceLocation) -> Self {
        Self::new(ErrorKind::ParseError, message, location)
    }

    /// Create an error for an exception nobody caught
    pub fn exception(class: &str, message: String, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Exception(class.to_string()), message, location)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind_str = format!("{}", self.kind);
        writeln!(f, "{}: {}", kind_str.red().bold(), self.message.bold())?;

        if self.location.line > 0 {
            let location_str = format!("  --> {}", self.location);
            writeln!(f, "{}", location_str.bright_blue())?;
        }

        if let Some(ref source) = self.source_line {
            writeln!(f, "   {}", "|".bright_blue())?;
            writeln!(
                f,
                "{} {} {}",
                format!("{:3}", self.location.line).bright_blue(),
                "|".bright_blue(),
                source
            )?;
            writeln!(
                f,
                "   {} {}{}",
                "|".bright_blue(),
                " ".repeat(self.location.column.saturating_sub(1)),
                "^".red().bold()
            )?;
        }

        if let Some(ref help) = self.help {
            writeln!(f, "   {} {}", "=".bright_yellow(), format!("help: {}", help).bright_yellow())?;
        }

        Ok(())
    }
}

impl std::error::Error for HostError {}

/// Which phase detected a breakall problem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakAllErrorKind {
    /// Detected while rewriting: misuse or a literal count/index out of range
    Syntax,
    /// Detected while executing a computed count or index
    Runtime,
    /// The source of a function could not be obtained
    Environment,
}

impl BreakAllErrorKind {
    /// Name of the host exception class that carries this kind
    pub fn class_name(&self) -> &'static str {
        match self {
            BreakAllErrorKind::Syntax => "BreakAllSyntaxError",
            BreakAllErrorKind::Runtime => "BreakAllRuntimeError",
            BreakAllErrorKind::Environment => "BreakAllEnvironmentError",
        }
    }
}

/// Where and how to point at the offending source.
///
/// `col_offset` indents the source line, `spacing` shifts the indicator past
/// the part of the statement that is fine, and `error_length` is how many
/// indicator characters to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticContext {
    pub filename: String,
    pub line: usize,
    pub function: String,
    pub col_offset: usize,
    pub spacing: usize,
    pub unparsed_node: String,
    pub error_length: usize,
    pub indicator: char,
}

impl Default for DiagnosticContext {
    fn default() -> Self {
        Self {
            filename: "<unknown filename>".to_string(),
            line: 0,
            function: "<module>".to_string(),
            col_offset: 0,
            spacing: 0,
            unparsed_node: String::new(),
            error_length: 0,
            indicator: '^',
        }
    }
}

/// A breakall diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakAllError {
    pub kind: BreakAllErrorKind,
    pub title: String,
    pub message: String,
    pub context: DiagnosticContext,
}

impl BreakAllError {
    pub fn new(
        kind: BreakAllErrorKind,
        title: impl Into<String>,
        message: impl Into<String>,
        context: DiagnosticContext,
    ) -> Self {
        Self { kind, title: title.into(), message: message.into(), context }
    }

    pub fn syntax(title: impl Into<String>, message: impl Into<String>, context: DiagnosticContext) -> Self {
        Self::new(BreakAllErrorKind::Syntax, title, message, context)
    }

    pub fn runtime(title: impl Into<String>, message: impl Into<String>, context: DiagnosticContext) -> Self {
        Self::new(BreakAllErrorKind::Runtime, title, message, context)
    }

    /// Source retrieval failure for `function`.
    pub fn environment(title: impl Into<String>, message: impl Into<String>, function: &str) -> Self {
        let context = DiagnosticContext { function: function.to_string(), ..Default::default() };
        Self::new(BreakAllErrorKind::Environment, title, message, context)
    }

    /// The five line diagnostic block.
    pub fn body(&self) -> String {
        let ctx = &self.context;
        let pad = " ".repeat(ctx.col_offset);
        format!(
            "{}\nFile \"{}\", line {}, in {}\n{}{}\n{}{}{}\n{}",
            self.title,
            ctx.filename,
            ctx.line,
            ctx.function,
            pad,
            ctx.unparsed_node,
            pad,
            " ".repeat(ctx.spacing),
            ctx.indicator.to_string().repeat(ctx.error_length),
            self.message
        )
    }

    /// Colored report for terminals: `<ErrorType>: <block>`.
    pub fn report(&self) -> String {
        format!("{}: {}", self.kind.class_name().red().bold(), self.body())
    }
}

impl fmt::Display for BreakAllError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.body())
    }
}

impl std::error::Error for BreakAllError {}

/// Everything the public entry points can fail with.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    BreakAll(BreakAllError),
    Host(HostError),
    /// A file given to the driver could not be read or written
    Io { path: String, reason: String },
}

impl Error {
    pub fn io(path: &std::path::Path, error: std::io::Error) -> Self {
        Error::Io { path: path.display().to_string(), reason: error.to_string() }
    }

    pub fn as_breakall(&self) -> Option<&BreakAllError> {
        match self {
            Error::BreakAll(error) => Some(error),
            Error::Host(_) | Error::Io { .. } => None,
        }
    }

    /// Text printed by the CLI when the error reaches the top level
    pub fn report(&self) -> String {
        match self {
            Error::BreakAll(error) => error.report(),
            Error::Host(error) => error.to_string(),
            Error::Io { .. } => format!("{}: {}", "error".red().bold(), self),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BreakAll(error) => write!(f, "{}: {}", error.kind.class_name(), error.body()),
            Error::Host(error) => write!(f, "{}", error),
            Error::Io { path, reason } => write!(f, "{}: {}", path, reason),
        }
    }
}

impl std::error::Error for Error {}

impl From<BreakAllError> for Error {
    fn from(error: BreakAllError) -> Self {
        Error::BreakAll(error)
    }
}

impl From<HostError> for Error {
    fn from(error: HostError) -> Self {
        Error::Host(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_layout() {
        let error = BreakAllError::syntax(
            "Invalid break count",
            "The break count must be greater than 0",
            DiagnosticContext {
                filename: "t.py".into(),
                line: 3,
                function: "f".into(),
                col_offset: 4,
                spacing: 10,
                unparsed_node: "breakall: 0".into(),
                error_length: 1,
                indicator: '^',
            },
        );
        assert_eq!(
            error.body(),
            "Invalid break count\nFile \"t.py\", line 3, in f\n    breakall: 0\n              ^\nThe break count must be greater than 0"
        );
    }

    #[test]
    fn test_environment_defaults() {
        let error = BreakAllError::environment("No source code found", "gone", "len");
        assert_eq!(error.kind.class_name(), "BreakAllEnvironmentError");
        assert_eq!(error.context.filename, "<unknown filename>");
        assert_eq!(error.context.function, "len");
    }
}
