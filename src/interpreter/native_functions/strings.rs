// File: src/interpreter/native_functions/strings.rs
//
// String methods and f-string formatting

use super::expect_args;
use crate::interpreter::{Interpreter, Number, Raised, Value};

pub const STR_METHODS: &[&str] = &["join", "upper", "lower"];

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, Raised>> {
    let Value::Str(text) = receiver else {
        return None;
    };
    let result = match name {
        "upper" => expect_args(interp, name, args, 0, 0).map(|_| Value::str(&text.to_uppercase())),
        "lower" => expect_args(interp, name, args, 0, 0).map(|_| Value::str(&text.to_lowercase())),
        "join" => expect_args(interp, name, args, 1, 1).and_then(|_| join(interp, text, &args[0])),
        _ => return None,
    };
    Some(result)
}

fn join(interp: &Interpreter, separator: &str, iterable: &Value) -> Result<Value, Raised> {
    let mut parts = Vec::new();
    for (index, item) in interp.iterate(iterable)?.into_iter().enumerate() {
        match item {
            Value::Str(s) => parts.push(s.to_string()),
            other => {
                return Err(interp.error(
                    "TypeError",
                    format!("sequence item {}: expected str instance, {} found", index, other.type_name()),
                ))
            }
        }
    }
    Ok(Value::str(&parts.join(separator)))
}

/// Parsed `[[fill]align][sign][0][width][.precision][type]`
#[derive(Debug, Default, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Option<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut parsed = FormatSpec::default();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().map_or(false, is_align) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i).filter(|c| matches!(**c, '+' | '-' | ' ')) {
        parsed.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        parsed.fill.get_or_insert('0');
        parsed.align.get_or_insert('=');
        i += 1;
    }
    let start = i;
    while chars.get(i).map_or(false, char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        parsed.width = chars[start..i].iter().collect::<String>().parse().ok()?;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).map_or(false, char::is_ascii_digit) {
            i += 1;
        }
        parsed.precision = Some(chars[start..i].iter().collect::<String>().parse().ok()?);
    }
    if let Some(&c) = chars.get(i) {
        parsed.kind = Some(c);
        i += 1;
    }
    (i == chars.len()).then_some(parsed)
}

/// `format(value, spec)` for the subset of specs f-strings use in practice
pub fn format_value(value: &Value, spec: &str) -> Result<String, String> {
    if spec.is_empty() {
        return Ok(value.to_display());
    }
    let parsed = parse_spec(spec).ok_or_else(|| format!("Invalid format specifier '{}'", spec))?;

    let number = value.as_number();
    let body = match (parsed.kind, number) {
        (Some('f' | 'F'), Some(n)) => format!("{:.*}", parsed.precision.unwrap_or(6), n.as_f64()),
        (Some('%'), Some(n)) => format!("{:.*}%", parsed.precision.unwrap_or(6), n.as_f64() * 100.0),
        (Some('d'), Some(Number::Int(n))) => n.to_string(),
        (None, Some(Number::Float(f))) if parsed.precision.is_some() => {
            format!("{:.*}", parsed.precision.unwrap_or(6), f)
        }
        (None | Some('s'), _) => {
            let text = value.to_display();
            match parsed.precision {
                Some(p) if matches!(value, Value::Str(_)) => text.chars().take(p).collect(),
                _ => text,
            }
        }
        (Some(kind), _) => {
            return Err(format!("Unknown format code '{}' for object of type '{}'", kind, value.type_name()))
        }
    };

    let body = match (parsed.sign, number) {
        (Some('+'), Some(_)) if !body.starts_with('-') => format!("+{}", body),
        (Some(' '), Some(_)) if !body.starts_with('-') => format!(" {}", body),
        _ => body,
    };

    let length = body.chars().count();
    if length >= parsed.width {
        return Ok(body);
    }
    let padding = parsed.width - length;
    let fill = parsed.fill.unwrap_or(' ').to_string();
    let default_align = if number.is_some() { '>' } else { '<' };
    Ok(match parsed.align.unwrap_or(default_align) {
        '<' => format!("{}{}", body, fill.repeat(padding)),
        '^' => format!("{}{}{}", fill.repeat(padding / 2), body, fill.repeat(padding - padding / 2)),
        '=' if body.starts_with(['-', '+', ' ']) => {
            let (sign, digits) = body.split_at(1);
            format!("{}{}{}", sign, fill.repeat(padding), digits)
        }
        _ => format!("{}{}", fill.repeat(padding), body),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_value(&Value::Int(-7), "04d").unwrap(), "-007");
        assert_eq!(format_value(&Value::str("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::Int(5), "+").unwrap(), "+5");
        assert!(format_value(&Value::str("x"), "d").is_err());
    }

    #[test]
    fn test_join() {
        let mut interp = Interpreter::new();
        let parts = Value::list(vec![Value::str("a"), Value::str("b")]);
        let joined = call_method(&mut interp, &Value::str(", "), "join", &[parts]).unwrap().unwrap();
        assert_eq!(joined, Value::str("a, b"));
    }
}
