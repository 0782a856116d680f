// File: src/lib.rs
//
// Library interface for breakall.
// Exposes the rewriter, the host language it operates on and the interpreter
// that runs rewritten programs, for the CLI and for integration testing.

pub mod ast;
pub mod builtins;
pub mod driver;
pub mod errors;
pub mod interpreter;
pub mod lexer;
pub mod location;
pub mod module;
pub mod parser;
pub mod rewriter;
pub mod runtime;
pub mod unparse;

pub use driver::{enable_all, enable_breakall, rewrite_source, run_file, supports_breakall, EnableFailure, RunOptions};
pub use errors::{BreakAllError, BreakAllErrorKind, DiagnosticContext, Error};
pub use interpreter::Interpreter;
pub use rewriter::{BreakAllRewriter, RewriteOptions};
