// Integration tests for rewritten programs
//
// These tests rewrite complete host programs and run them in the interpreter,
// checking what they print. Tests cover:
// - Bare, counted and numbered exits through two and three loops
// - Exits resolved at run time, including their diagnostics
// - Interaction with try/except/finally and loop `else` clauses
// - async functions and `async for`
// - The host language features the rewritten code relies on

use breakall::driver::rewrite_source;
use breakall::errors::{BreakAllErrorKind, ErrorKind};
use breakall::{Error, Interpreter, RewriteOptions};
use std::sync::{Arc, Mutex};

fn run_code(code: &str) -> (Result<(), Error>, String) {
    let output = Arc::new(Mutex::new(Vec::new()));
    let mut interp = Interpreter::new();
    interp.set_output(output.clone());
    let result = rewrite_source(code, &RewriteOptions::new("test.py"))
        .and_then(|module| interp.run_rewritten(&module, code, "test.py"));
    let text = String::from_utf8(output.lock().unwrap().clone()).unwrap();
    (result, text)
}

fn output_of(code: &str) -> String {
    let (result, output) = run_code(code);
    if let Err(error) = result {
        panic!("program failed:\n{}\noutput so far:\n{}", error, output);
    }
    output
}

#[test]
fn test_bare_breakall_leaves_every_loop() {
    let code = r#"
def f():
    for i in range(3):
        for j in range(3):
            print(i, j)
            breakall
    print('done')

f()
"#;
    assert_eq!(output_of(code), "0 0\ndone\n");
}

#[test]
fn test_break_count_two_of_three() {
    let code = r#"
for i in range(2):
    for j in range(2):
        for k in range(2):
            print(i, j, k)
            breakall: 2
        print('after inner', i, j)
    print('after middle', i)
"#;
    assert_eq!(output_of(code), "0 0 0\nafter middle 0\n1 0 0\nafter middle 1\n");
}

#[test]
fn test_break_count_one_is_plain_break() {
    let code = r#"
for i in range(2):
    for j in range(5):
        breakall: 1
    print(i, j)
"#;
    assert_eq!(output_of(code), "0 0\n1 0\n");
}

#[test]
fn test_loop_number_counts_from_outermost() {
    let code = r#"
def f():
    seen = []
    for a in range(3):
        for b in range(3):
            for c in range(3):
                seen.append((a, b, c))
                breakall @ 2
    return seen

print(f())
"#;
    assert_eq!(output_of(code), "[(0, 0, 0), (1, 0, 0), (2, 0, 0)]\n");
}

#[test]
fn test_out_of_range_literal_fails_before_running() {
    let code = r#"
print('start')
def f():
    for i in range(2):
        for j in range(2):
            breakall @ 5
"#;
    let (result, output) = run_code(code);
    assert_eq!(output, "");
    let Err(Error::BreakAll(error)) = result else {
        panic!("expected a rewrite diagnostic");
    };
    assert_eq!(error.kind, BreakAllErrorKind::Syntax);
    assert_eq!(error.title, "Invalid loop number");
    assert_eq!(
        error.message,
        "There are only 2 loops to break up until this point. Note that it is impossible to break to a loop defined later."
    );
    assert_eq!(error.context.line, 6);
    assert_eq!(error.context.function, "f");
}

#[test]
fn test_dynamic_counts() {
    let code = r#"
def first_hits(grid, levels):
    hits = []
    for row in grid:
        for cell in row:
            if cell == 'x':
                hits.append(cell)
                breakall: levels
    return hits

grid = [['.', 'x', 'x'], ['x']]
print(first_hits(grid, 1))
print(first_hits(grid, 2))
print(first_hits(grid, '2'))
print(first_hits(grid, 2.9))
"#;
    assert_eq!(output_of(code), "['x', 'x']\n['x']\n['x']\n['x']\n");
}

#[test]
fn test_dynamic_loop_number() {
    let code = r#"
def f(target):
    for a in range(2):
        for b in range(2):
            for c in range(2):
                print(a, b, c)
                breakall @ target
    print('end')

f(1)
f(3)
"#;
    let expected = "0 0 0\nend\n0 0 0\n0 1 0\n1 0 0\n1 1 0\nend\n";
    assert_eq!(output_of(code), expected);
}

#[test]
fn test_dynamic_failure_is_catchable() {
    let code = r#"
from breakall import BreakAllRuntimeError

def f(n):
    for i in range(2):
        breakall: n

for n in [3, 0, 'many']:
    try:
        f(n)
    except BreakAllRuntimeError as e:
        print(e.title, '|', e.message)
"#;
    let expected = "\
Invalid break count | There is only 1 loop to break.
Invalid break count | The break count must be greater than 0
Invalid break count | Cannot parse the break count `many`
";
    assert_eq!(output_of(code), expected);
}

#[test]
fn test_dynamic_failure_is_also_a_runtime_error() {
    let code = r#"
def f(n):
    for i in range(2):
        breakall: n

try:
    f(7)
except RuntimeError:
    print('caught')
"#;
    assert_eq!(output_of(code), "caught\n");
}

#[test]
fn test_uncaught_dynamic_failure_reports_diagnostic() {
    let code = "def f(n):\n    for i in range(2):\n        for j in range(2):\n            breakall: n\n\nf(9)\n";
    let (result, _) = run_code(code);
    let Err(Error::BreakAll(error)) = result else {
        panic!("expected a runtime diagnostic");
    };
    assert_eq!(error.kind, BreakAllErrorKind::Runtime);
    assert_eq!(
        error.body(),
        "Invalid break count\nFile \"test.py\", line 4, in f\n            breakall: n\n                      ^\nThere are only 2 loops to break."
    );
}

#[test]
fn test_handlers_never_see_exits() {
    let code = r#"
def f():
    log = []
    for i in range(3):
        for j in range(3):
            try:
                breakall
            except Exception:
                log.append('exception')
            except:
                log.append('bare')
            finally:
                log.append('finally')
    return log

print(f())
"#;
    assert_eq!(output_of(code), "['finally']\n");
}

#[test]
fn test_exit_skips_loop_else_clauses() {
    let code = r#"
for i in range(2):
    for j in range(2):
        breakall
    else:
        print('inner else')
else:
    print('outer else')
print('after')

for i in range(1):
    pass
else:
    print('plain else')
"#;
    assert_eq!(output_of(code), "after\nplain else\n");
}

#[test]
fn test_while_loops() {
    let code = r#"
def f():
    n = 0
    while True:
        while True:
            n += 1
            if n == 5:
                breakall
    return n

print(f())
"#;
    assert_eq!(output_of(code), "5\n");
}

#[test]
fn test_async_for_counts_as_a_loop() {
    let code = r#"
import asyncio

async def main():
    found = None
    async for a in [1, 2, 3]:
        for b in [4, 5, 6]:
            await asyncio.sleep(0)
            if a * b == 10:
                found = (a, b)
                breakall
    return found

print(asyncio.run(main()))
"#;
    assert_eq!(output_of(code), "(2, 5)\n");
}

#[test]
fn test_nested_functions_have_their_own_loops() {
    let code = r#"
def outer():
    for i in range(3):
        def inner():
            for j in range(3):
                breakall
            return j
        print(inner(), i)

outer()
"#;
    assert_eq!(output_of(code), "0 0\n0 1\n0 2\n");
}

#[test]
fn test_return_inside_guarded_loop() {
    let code = r#"
def f(stop):
    one = 1
    for i in range(5):
        for j in range(5):
            if i == stop:
                return i * 10 + j
            breakall: one
    return -1

print(f(3), f(9))
"#;
    assert_eq!(output_of(code), "30 -1\n");
}

#[test]
fn test_host_language_basics() {
    let code = r#"
total = 0
for n in range(1, 5):
    total += n
name = 'loops'
scores = {'a': 1, 'b': 2}
scores['c'] = 3
first, *rest = [1, 2, 3]
print(f'{name}: {total:>4} {len(scores)} {rest}')
print(list(scores.keys()), max(3, 9, 4), abs(-2.5))
"#;
    assert_eq!(output_of(code), "loops:   10 3 [2, 3]\n['a', 'b', 'c'] 9 2.5\n");
}

#[test]
fn test_closures_and_globals() {
    let code = r#"
counter = 0

def bump():
    global counter
    counter += 1

def make_adder(n):
    return lambda x: x + n

bump()
bump()
add3 = make_adder(3)
print(counter, add3(4))
"#;
    assert_eq!(output_of(code), "2 7\n");
}

#[test]
fn test_uncaught_exception_is_a_host_error() {
    let (result, output) = run_code("print('before')\nitems = [1]\nitems[3]\n");
    assert_eq!(output, "before\n");
    let Err(Error::Host(error)) = result else {
        panic!("expected a host error");
    };
    assert_eq!(error.kind, ErrorKind::Exception("IndexError".to_string()));
    assert_eq!(error.message, "list index out of range");
    assert_eq!(error.location.line, 3);
}

#[test]
fn test_integer_edge_cases_raise_overflow() {
    let (result, output) = run_code("x = -9223372036854775807 - 1\nprint(x % -1)\nprint(x // -1)\n");
    assert_eq!(output, "0\n");
    let Err(Error::Host(error)) = result else {
        panic!("expected a host error");
    };
    assert_eq!(error.kind, ErrorKind::Exception("OverflowError".to_string()));

    let code = "try:\n    len(range(-9223372036854775807 - 1, 9223372036854775807))\nexcept OverflowError:\n    print('too long')\n";
    assert_eq!(output_of(code), "too long\n");
}

#[test]
fn test_recursion_limit() {
    let (result, _) = run_code("def f(n):\n    return f(n + 1)\n\nf(0)\n");
    let Err(Error::Host(error)) = result else {
        panic!("expected a host error");
    };
    assert_eq!(error.kind, ErrorKind::Exception("RuntimeError".to_string()));
    assert_eq!(error.message, "maximum recursion depth exceeded");
}

#[test]
fn test_unrewritten_loop_number_is_a_type_error() {
    let output = Arc::new(Mutex::new(Vec::new()));
    let mut interp = Interpreter::new();
    interp.set_output(output.clone());
    let code = "from breakall import breakall\ntry:\n    breakall @ 2\nexcept TypeError:\n    print('not rewritten')\n";
    interp.run_source(code, "plain.py").unwrap();
    assert_eq!(String::from_utf8(output.lock().unwrap().clone()).unwrap(), "not rewritten\n");
}

#[test]
fn test_uncaught_unrewritten_loop_number_suggests_enabling() {
    let mut interp = Interpreter::new();
    interp.set_output(Arc::new(Mutex::new(Vec::new())));
    let code = "from breakall import breakall\nfor i in range(2):\n    breakall @ 1\n";
    let Err(Error::Host(error)) = interp.run_source(code, "plain.py") else {
        panic!("expected a host error");
    };
    assert_eq!(error.kind, ErrorKind::Exception("TypeError".to_string()));
    assert!(error.help.as_deref().unwrap_or_default().contains("@enable_breakall"));
    assert!(error.to_string().contains("help:"));
}
