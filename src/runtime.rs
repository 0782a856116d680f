// File: src/runtime.rs
//
// Run-time resolution of computed exit magnitudes.
//
// `breakall: expr` and `breakall @ expr` with a non-literal magnitude are
// rewritten into a call to one of these functions. They apply exactly the
// checks the rewriter applies to literals and fail with a runtime diagnostic
// built from the context captured at rewrite time.

use tracing::trace;

use crate::errors::{BreakAllError, DiagnosticContext};
use crate::rewriter::resolve::{resolve, ExitForm, Magnitude};

/// Destination depth of `breakall: count` executed at `current_loop`.
pub fn destination_from_break_count(
    count: &Magnitude,
    current_loop: usize,
    context: DiagnosticContext,
) -> Result<usize, BreakAllError> {
    destination(ExitForm::Count, count, current_loop, context)
}

/// Destination depth of `breakall @ loop_number` executed at `current_loop`.
pub fn destination_from_loop_number(
    loop_number: &Magnitude,
    current_loop: usize,
    context: DiagnosticContext,
) -> Result<usize, BreakAllError> {
    destination(ExitForm::LoopNumber, loop_number, current_loop, context)
}

pub fn destination(
    form: ExitForm,
    magnitude: &Magnitude,
    current_loop: usize,
    context: DiagnosticContext,
) -> Result<usize, BreakAllError> {
    let resolved = magnitude.coerce(form).and_then(|value| resolve(form, value, current_loop));
    match resolved {
        Ok(destination) => {
            let depth = destination.depth(current_loop);
            trace!(?form, current_loop, depth, "resolved computed exit");
            Ok(depth)
        }
        Err(failure) => Err(BreakAllError::runtime(failure.title(), failure.message(), context)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BreakAllErrorKind;

    #[test]
    fn test_count_matches_static_math() {
        let context = DiagnosticContext::default();
        assert_eq!(destination_from_break_count(&Magnitude::Int(2), 4, context.clone()), Ok(3));
        assert_eq!(destination_from_break_count(&Magnitude::Int(1), 4, context.clone()), Ok(4));
        assert_eq!(destination_from_break_count(&Magnitude::Str("4".into()), 4, context), Ok(1));
    }

    #[test]
    fn test_loop_number_matches_static_math() {
        let context = DiagnosticContext::default();
        assert_eq!(destination_from_loop_number(&Magnitude::Int(2), 3, context.clone()), Ok(2));
        assert_eq!(destination_from_loop_number(&Magnitude::Float(3.7), 3, context), Ok(3));
    }

    #[test]
    fn test_failures_are_runtime_diagnostics() {
        let context = DiagnosticContext { filename: "t.py".into(), line: 7, ..Default::default() };
        let error = destination_from_break_count(&Magnitude::Int(0), 2, context).unwrap_err();
        assert_eq!(error.kind, BreakAllErrorKind::Runtime);
        assert_eq!(error.title, "Invalid break count");
        assert_eq!(error.message, "The break count must be greater than 0");
        assert_eq!(error.context.line, 7);

        let error =
            destination_from_loop_number(&Magnitude::Other("[1]".into()), 2, DiagnosticContext::default()).unwrap_err();
        assert_eq!(error.message, "Cannot parse the loop number `[1]`");
    }
}
