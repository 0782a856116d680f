// Integration tests for enabling breakall on live functions
//
// Programs here run without a whole-file rewrite: only the functions passed
// to `enable_breakall` (as a decorator, a call, or the zero-argument blanket
// form) are rewritten from their source lines.

use breakall::errors::BreakAllErrorKind;
use breakall::interpreter::Value;
use breakall::{enable_all, enable_breakall, supports_breakall, Error, Interpreter};
use std::sync::{Arc, Mutex};

fn run_code(code: &str) -> (Interpreter, Result<(), Error>, String) {
    let output = Arc::new(Mutex::new(Vec::new()));
    let mut interp = Interpreter::new();
    interp.set_output(output.clone());
    let result = interp.run_source(code, "test.py");
    let text = String::from_utf8(output.lock().unwrap().clone()).unwrap();
    (interp, result, text)
}

fn output_of(code: &str) -> String {
    let (_, result, output) = run_code(code);
    if let Err(error) = result {
        panic!("program failed:\n{}\noutput so far:\n{}", error, output);
    }
    output
}

fn global(interp: &Interpreter, name: &str) -> Value {
    interp.globals().borrow().get(name).cloned().unwrap()
}

#[test]
fn test_decorator_enables_function() {
    let code = r#"
from breakall import enable_breakall, supports_breakall

@enable_breakall
def find(grid, target):
    for i, row in enumerate(grid):
        for j, cell in enumerate(row):
            if cell == target:
                breakall
    return i, j

def plain():
    pass

print(find([[1, 2], [3, 4]], 2), supports_breakall(find), supports_breakall(plain))
"#;
    assert_eq!(output_of(code), "(0, 1) True False\n");
}

#[test]
fn test_aliases_and_attribute_decorators() {
    let code = r#"
import breakall
from breakall import enable_breakall as eb

@eb
def first(n):
    for i in range(n):
        for j in range(n):
            breakall: 2
    return i

@breakall.enable_breakall
def second(n):
    for i in range(n):
        for j in range(n):
            breakall @ 2
    return i * 10 + j

print(first(3), second(3))
"#;
    assert_eq!(output_of(code), "0 20\n");
}

#[test]
fn test_other_decorators_are_kept() {
    let code = r#"
from breakall import enable_breakall

def twice(f):
    return lambda: f() * 2

@twice
@enable_breakall
def value():
    for i in range(4):
        for j in range(4):
            breakall
    return 21

print(value())
"#;
    assert_eq!(output_of(code), "42\n");
}

#[test]
fn test_rewrite_diagnostic_uses_file_lines() {
    let code = "from breakall import enable_breakall\n\n@enable_breakall\ndef f():\n    for i in range(2):\n        breakall: 3\n";
    let (_, result, _) = run_code(code);
    let Err(Error::BreakAll(error)) = result else {
        panic!("expected a rewrite diagnostic");
    };
    assert_eq!(error.kind, BreakAllErrorKind::Syntax);
    assert_eq!(error.context.line, 6);
    assert_eq!(error.context.filename, "test.py");
    assert_eq!(error.context.function, "f");
    assert_eq!(error.message, "There is only 1 loop to break.");
}

#[test]
fn test_rewrite_diagnostic_is_a_syntax_error() {
    let code = r#"
from breakall import enable_breakall

try:
    @enable_breakall
    def f():
        for i in range(2):
            breakall: 3
except SyntaxError as e:
    print('rejected:', e.title, e.line)
"#;
    assert_eq!(output_of(code), "rejected: Invalid break count 8\n");
}

#[test]
fn test_runtime_diagnostic_uses_file_lines() {
    let code = "from breakall import enable_breakall\n\n@enable_breakall\ndef f(n):\n    for i in range(2):\n        breakall: n\n\nf(5)\n";
    let (_, result, _) = run_code(code);
    let Err(Error::BreakAll(error)) = result else {
        panic!("expected a runtime diagnostic");
    };
    assert_eq!(error.kind, BreakAllErrorKind::Runtime);
    assert_eq!(error.context.line, 6);
}

#[test]
fn test_host_errors_after_enable_keep_positions() {
    let code = "from breakall import enable_breakall\n\n@enable_breakall\ndef f():\n    for i in range(2):\n        x = 1 / 0\n\nf()\n";
    let (_, result, _) = run_code(code);
    let Err(Error::Host(error)) = result else {
        panic!("expected a host error");
    };
    assert_eq!(error.location.line, 6);
    assert_eq!(error.source_line.as_deref(), Some("        x = 1 / 0"));
}

#[test]
fn test_lambdas_and_natives_have_no_source() {
    let code = r#"
from breakall import enable_breakall, BreakAllEnvironmentError

for candidate in [lambda: 1, len]:
    try:
        enable_breakall(candidate)
    except BreakAllEnvironmentError as e:
        print(e.title)
"#;
    assert_eq!(output_of(code), "No source code found\nNo source code found\n");
}

#[test]
fn test_blanket_enable_from_host() {
    let code = r#"
from breakall import enable_breakall, supports_breakall

def a():
    for i in range(3):
        for j in range(3):
            breakall
    return (i, j)

g = lambda: 1

enable_breakall()
print(a(), supports_breakall(a), supports_breakall(g))
"#;
    assert_eq!(output_of(code), "(0, 0) True False\n");
}

#[test]
fn test_enable_from_rust() {
    let code = "def f():\n    for i in range(3):\n        for j in range(3):\n            breakall: 2\n    return i\n";
    let (mut interp, result, _) = run_code(code);
    result.unwrap();

    let f = global(&interp, "f");
    assert!(!supports_breakall(&f));
    let enabled = enable_breakall(&mut interp, &f).unwrap();
    assert!(supports_breakall(&enabled));
    assert_eq!(interp.call(&enabled, Vec::new()).unwrap(), Value::Int(0));
}

#[test]
fn test_enable_all_reports_failures_in_order() {
    let code = "def ok():\n    for i in range(2):\n        breakall\n    return i\n\nz = lambda: 0\nbad = lambda: 1\n";
    let (mut interp, result, _) = run_code(code);
    result.unwrap();

    let globals = interp.globals();
    let failures = enable_all(&mut interp, &globals);
    let names: Vec<&str> = failures.iter().map(|failure| failure.name.as_str()).collect();
    assert_eq!(names, vec!["bad", "z"]);
    let diagnostic = failures[0].error.as_breakall().unwrap();
    assert_eq!(diagnostic.kind, BreakAllErrorKind::Environment);

    let ok = global(&interp, "ok");
    assert!(supports_breakall(&ok));
    assert_eq!(interp.call(&ok, Vec::new()).unwrap(), Value::Int(0));
}
