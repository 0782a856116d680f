// Integration tests for running script files and for the command line tool

use breakall::{run_file, Error, Interpreter, RunOptions};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

fn run_script(path: &Path, options: &RunOptions) -> (Result<(), Error>, String) {
    let output = Arc::new(Mutex::new(Vec::new()));
    let mut interp = Interpreter::new();
    interp.set_output(output.clone());
    let result = run_file(&mut interp, path, options);
    let text = String::from_utf8(output.lock().unwrap().clone()).unwrap();
    (result, text)
}

const SCRIPT: &str = r#"
from breakall import supports_breakall

def pairs(limit):
    found = []
    for a in range(limit):
        for b in range(limit):
            if a + b == 3:
                found.append((a, b))
                breakall: 2
    return found

print(pairs(4), supports_breakall(pairs))
"#;

#[test]
fn test_run_file_rewrites_every_function() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.py");
    fs::write(&path, SCRIPT).unwrap();

    let (result, output) = run_script(&path, &RunOptions::default());
    result.unwrap();
    assert_eq!(output, "[(0, 3)] True\n");
}

#[test]
fn test_run_file_writes_rewritten_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.py");
    let rewritten = dir.path().join("rewritten.py");
    fs::write(&path, SCRIPT).unwrap();

    let options = RunOptions { output: Some(rewritten.display().to_string()), ..Default::default() };
    let (result, _) = run_script(&path, &options);
    result.unwrap();

    let text = fs::read_to_string(&rewritten).unwrap();
    assert!(text.contains("1@breakall = ExitMarker(1)"));
    assert!(text.contains("raise 1@breakall"));
    assert!(!text.contains("breakall: 2"));
}

#[test]
fn test_run_file_prints_rewritten_source_to_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.py");
    fs::write(&path, "for i in range(2):\n    for j in range(2):\n        breakall\nprint('ok')\n").unwrap();

    let options = RunOptions { output: Some("-".to_string()), ..Default::default() };
    let (result, output) = run_script(&path, &options);
    result.unwrap();
    assert!(output.starts_with("ok\n1@breakall = ExitMarker(1)\ntry:\n"));
    assert!(output.ends_with("print('ok')\n"));
}

#[test]
fn test_trace_rewrites_imported_modules() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("helpers.py"),
        "def first_even(rows):\n    for row in rows:\n        for n in row:\n            if n % 2 == 0:\n                found = n\n                breakall\n    return found\n",
    )
    .unwrap();
    let path = dir.path().join("main.py");
    fs::write(&path, "from helpers import first_even\nprint(first_even([[1, 4], [6]]))\n").unwrap();

    let (result, _) = run_script(&path, &RunOptions::default());
    let Err(Error::Host(error)) = result else {
        panic!("untraced helper should not understand breakall");
    };
    assert_eq!(error.message, "name 'breakall' is not defined");

    let (result, output) = run_script(&path, &RunOptions { trace: true, ..Default::default() });
    result.unwrap();
    assert_eq!(output, "4\n");
}

#[test]
fn test_search_paths() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib");
    fs::create_dir(&lib).unwrap();
    fs::write(lib.join("greeting.py"), "message = 'hello'\n").unwrap();
    let path = dir.path().join("main.py");
    fs::write(&path, "import greeting\nprint(greeting.message)\n").unwrap();

    let (result, _) = run_script(&path, &RunOptions::default());
    assert!(result.is_err());

    let options = RunOptions { search_paths: vec![lib], ..Default::default() };
    let (result, output) = run_script(&path, &options);
    result.unwrap();
    assert_eq!(output, "hello\n");
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let (result, _) = run_script(&dir.path().join("absent.py"), &RunOptions::default());
    assert!(matches!(result, Err(Error::Io { .. })));
}

#[test]
fn test_cli_check_reports_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.py");
    let bad = dir.path().join("bad.py");
    fs::write(&good, "for i in x:\n    breakall\n").unwrap();
    fs::write(&bad, "for i in x:\n    breakall: 2\n").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_breakall"))
        .args(["check", good.to_str().unwrap()])
        .env("NO_COLOR", "1")
        .output()
        .unwrap();
    assert!(status.status.success());

    let failed = Command::new(env!("CARGO_BIN_EXE_breakall"))
        .args(["check", bad.to_str().unwrap()])
        .env("NO_COLOR", "1")
        .output()
        .unwrap();
    assert!(!failed.status.success());
    let stderr = String::from_utf8(failed.stderr).unwrap();
    assert!(stderr.contains("BreakAllSyntaxError: Invalid break count"));
    assert!(stderr.contains("There is only 1 loop to break."));
}

#[test]
fn test_cli_rewrite_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.py");
    fs::write(&path, "for i in x:\n    breakall\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_breakall"))
        .args(["rewrite", path.to_str().unwrap(), "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let tree: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(tree["body"][1]["type"], "Try");
}
