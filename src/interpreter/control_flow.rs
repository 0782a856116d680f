// File: src/interpreter/control_flow.rs
//
// Control flow signals for statement execution.
//
// Executing a statement yields a ControlFlow telling the enclosing block what
// to do next. Raised objects (exceptions and exit markers) do not travel here:
// they unwind through `Err(Raised)` so `?` carries them outward until a
// matching handler is found.

use super::value::Value;
use crate::ast::Location;

/// Control flow signals for statement execution
///
/// Loops consume Break and Continue; function calls consume Return.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    /// Normal execution, continue to next statement
    Normal,
    /// Break statement encountered, exit the innermost loop
    Break,
    /// Continue statement encountered, skip to next loop iteration
    Continue,
    /// Return statement encountered, leave the current function
    Return(Value),
}

/// A raised object unwinding the host stack
#[derive(Debug, Clone)]
pub struct Raised {
    /// An exception instance or an exit marker
    pub value: Value,
    /// File and position of the statement that raised it
    pub origin: Option<(String, Location)>,
}

impl Raised {
    pub fn new(value: Value) -> Self {
        Self { value, origin: None }
    }

    /// Records where the object was raised unless already known
    pub fn at(mut self, filename: &str, location: Location) -> Self {
        if self.origin.is_none() {
            self.origin = Some((filename.to_string(), location));
        }
        self
    }

    pub fn is_exit_marker(&self) -> bool {
        matches!(self.value, Value::ExitMarker(_))
    }
}
