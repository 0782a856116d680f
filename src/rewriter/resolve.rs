// File: src/rewriter/resolve.rs
//
// Destination math for `breakall: N` and `breakall @ K`.
//
// The rewriter calls these with literal magnitudes while walking the tree and
// the runtime resolvers call them with values computed during execution. Both
// paths share the arithmetic and the wording here; only the diagnostic kind
// differs.

use std::fmt;

use crate::unparse::float_repr;

/// Which addressing mode an exit request uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitForm {
    /// `breakall: N`, N levels counted outward from the innermost loop
    Count,
    /// `breakall @ K`, the K-th enclosing loop counted from the outermost
    LoopNumber,
}

impl ExitForm {
    pub fn title(&self) -> &'static str {
        match self {
            ExitForm::Count => "Invalid break count",
            ExitForm::LoopNumber => "Invalid loop number",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            ExitForm::Count => "break count",
            ExitForm::LoopNumber => "loop number",
        }
    }
}

/// Where an exit request lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// The innermost loop; a plain `break` does the job
    Break,
    /// Unwind to the loop at this depth
    Exit(usize),
}

impl Destination {
    /// Target depth, given the depth of the request
    pub fn depth(&self, current: usize) -> usize {
        match self {
            Destination::Break => current,
            Destination::Exit(depth) => *depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveFailure {
    NotPositive(ExitForm),
    OutOfRange { form: ExitForm, depth: usize },
    Unparsable { form: ExitForm, text: String },
}

impl ResolveFailure {
    pub fn title(&self) -> &'static str {
        match self {
            ResolveFailure::NotPositive(form)
            | ResolveFailure::OutOfRange { form, .. }
            | ResolveFailure::Unparsable { form, .. } => form.title(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ResolveFailure::NotPositive(form) => format!("The {} must be greater than 0", form.noun()),
            ResolveFailure::OutOfRange { form, depth } => {
                let (verb, plural) = if *depth == 1 { ("is", "") } else { ("are", "s") };
                match form {
                    ExitForm::Count => format!("There {} only {} loop{} to break.", verb, depth, plural),
                    ExitForm::LoopNumber => format!(
                        "There {} only {} loop{} to break up until this point. \
                         Note that it is impossible to break to a loop defined later.",
                        verb, depth, plural
                    ),
                }
            }
            ResolveFailure::Unparsable { form, text } => {
                format!("Cannot parse the {} `{}`", form.noun(), text)
            }
        }
    }
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.message())
    }
}

/// A raw exit magnitude before integer coercion
#[derive(Debug, Clone, PartialEq)]
pub enum Magnitude {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Anything else, kept as its display text
    Other(String),
}

impl Magnitude {
    /// Integer value the way `int(x)` would produce it; floats truncate toward zero
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Magnitude::Int(v) => Some(*v),
            Magnitude::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            Magnitude::Float(_) => None,
            Magnitude::Bool(b) => Some(i64::from(*b)),
            Magnitude::Str(s) => parse_int_text(s),
            Magnitude::Other(_) => None,
        }
    }

    /// Text used in "Cannot parse" messages
    pub fn display(&self) -> String {
        match self {
            Magnitude::Int(v) => v.to_string(),
            Magnitude::Float(v) => float_repr(*v),
            Magnitude::Bool(true) => "True".to_string(),
            Magnitude::Bool(false) => "False".to_string(),
            Magnitude::Str(s) => s.clone(),
            Magnitude::Other(text) => text.clone(),
        }
    }

    pub fn coerce(&self, form: ExitForm) -> Result<i64, ResolveFailure> {
        self.to_int().ok_or_else(|| ResolveFailure::Unparsable { form, text: self.display() })
    }
}

pub(crate) fn parse_int_text(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c.is_ascii_digit() || c == '_')
    {
        return None;
    }
    // Digits past the i64 range saturate, so huge magnitudes still resolve as out of range
    let value = digits.replace('_', "").parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}

/// `breakall: count` at `depth`: destination = depth - count + 1
pub fn resolve_count(count: i64, depth: usize) -> Result<Destination, ResolveFailure> {
    if count < 1 {
        return Err(ResolveFailure::NotPositive(ExitForm::Count));
    }
    let destination = depth as i64 - count + 1;
    if destination < 1 {
        return Err(ResolveFailure::OutOfRange { form: ExitForm::Count, depth });
    }
    if count == 1 {
        return Ok(Destination::Break);
    }
    Ok(Destination::Exit(destination as usize))
}

/// `breakall @ loop_number` at `depth`: the destination is the loop number itself
pub fn resolve_loop_number(loop_number: i64, depth: usize) -> Result<Destination, ResolveFailure> {
    if loop_number < 1 {
        return Err(ResolveFailure::NotPositive(ExitForm::LoopNumber));
    }
    if loop_number > depth as i64 {
        return Err(ResolveFailure::OutOfRange { form: ExitForm::LoopNumber, depth });
    }
    if loop_number == depth as i64 {
        return Ok(Destination::Break);
    }
    Ok(Destination::Exit(loop_number as usize))
}

pub fn resolve(form: ExitForm, magnitude: i64, depth: usize) -> Result<Destination, ResolveFailure> {
    match form {
        ExitForm::Count => resolve_count(magnitude, depth),
        ExitForm::LoopNumber => resolve_loop_number(magnitude, depth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_destination() {
        assert_eq!(resolve_count(2, 4), Ok(Destination::Exit(3)));
        assert_eq!(resolve_count(4, 4), Ok(Destination::Exit(1)));
        assert_eq!(resolve_count(1, 3), Ok(Destination::Break));
    }

    #[test]
    fn test_count_failures() {
        assert_eq!(resolve_count(0, 2), Err(ResolveFailure::NotPositive(ExitForm::Count)));
        assert_eq!(resolve_count(-3, 2), Err(ResolveFailure::NotPositive(ExitForm::Count)));
        assert_eq!(
            resolve_count(3, 2),
            Err(ResolveFailure::OutOfRange { form: ExitForm::Count, depth: 2 })
        );
        assert!(resolve_count(1, 0).is_err());
    }

    #[test]
    fn test_loop_number_destination() {
        assert_eq!(resolve_loop_number(2, 4), Ok(Destination::Exit(2)));
        assert_eq!(resolve_loop_number(4, 4), Ok(Destination::Break));
        assert_eq!(resolve_loop_number(0, 4), Err(ResolveFailure::NotPositive(ExitForm::LoopNumber)));
        assert_eq!(
            resolve_loop_number(5, 3),
            Err(ResolveFailure::OutOfRange { form: ExitForm::LoopNumber, depth: 3 })
        );
    }

    #[test]
    fn test_messages() {
        let one = ResolveFailure::OutOfRange { form: ExitForm::Count, depth: 1 };
        assert_eq!(one.message(), "There is only 1 loop to break.");
        let three = ResolveFailure::OutOfRange { form: ExitForm::LoopNumber, depth: 3 };
        assert_eq!(
            three.message(),
            "There are only 3 loops to break up until this point. Note that it is impossible to break to a loop defined later."
        );
        assert_eq!(
            ResolveFailure::NotPositive(ExitForm::LoopNumber).message(),
            "The loop number must be greater than 0"
        );
        assert_eq!(three.title(), "Invalid loop number");
    }

    #[test]
    fn test_magnitude_coercion() {
        assert_eq!(Magnitude::Float(2.9).to_int(), Some(2));
        assert_eq!(Magnitude::Float(-2.9).to_int(), Some(-2));
        assert_eq!(Magnitude::Bool(true).to_int(), Some(1));
        assert_eq!(Magnitude::Str(" 3 ".into()).to_int(), Some(3));
        assert_eq!(Magnitude::Str("1_0".into()).to_int(), Some(10));
        assert_eq!(Magnitude::Str("two".into()).to_int(), None);
        assert_eq!(Magnitude::Float(f64::NAN).to_int(), None);

        let failure = Magnitude::Str("two".into()).coerce(ExitForm::Count).unwrap_err();
        assert_eq!(failure.message(), "Cannot parse the break count `two`");
    }
}
