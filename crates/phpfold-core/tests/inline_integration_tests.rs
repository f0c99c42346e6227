use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use phpfold_core::{CollectingDiagnosticHandler, DiagnosticHandler, OptimizerConfig, Pipeline, TransformError};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn optimize_file(entry: &Path) -> String {
    let mut pipeline = Pipeline::new(
        OptimizerConfig::default(),
        Arc::new(CollectingDiagnosticHandler::new()),
    );
    pipeline.run_file(entry).expect("pipeline succeeds")
}

#[test]
fn test_two_files_with_colliding_function_names() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.php", "<?php function f() { return 'a'; } echo f();");
    write(&dir, "b.php", "<?php function f() { return 'b'; } echo f();");
    let entry = write(&dir, "main.php", "<?php include 'a.php'; include 'b.php';");

    let out = optimize_file(&entry);
    // Both bodies inline into their own call sites; no name collides and
    // no reference dangles.
    assert!(out.contains("echo 'a';") || out.contains("echo 'ab';"), "{out}");
    assert!(!out.contains("function f("), "{out}");
    assert!(!out.contains("include"), "{out}");
}

#[test]
fn test_cross_file_helper_folds_into_entry() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "math.php",
        "<?php function double($n) { return $n * 2; }",
    );
    let entry = write(
        &dir,
        "main.php",
        "<?php require_once __DIR__ . '/math.php'; echo double(21);",
    );

    assert_eq!(optimize_file(&entry), "<?php\n\necho 42;\n");
}

#[test]
fn test_shared_include_once_across_files() {
    let dir = TempDir::new().unwrap();
    write(&dir, "config.php", "<?php const GREETING = 'hi';");
    write(
        &dir,
        "helper.php",
        "<?php require_once __DIR__ . '/config.php'; function greet() { return GREETING; }",
    );
    let entry = write(
        &dir,
        "main.php",
        "<?php require_once 'config.php'; require_once 'helper.php'; echo greet();",
    );

    let out = optimize_file(&entry);
    // config.php was inlined exactly once, and the constant resolved.
    assert_eq!(out.matches("GREETING").count(), 0, "{out}");
    assert!(out.contains("echo 'hi';"), "{out}");
}

#[test]
fn test_unreadable_entry_is_fatal() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.php");
    let mut pipeline = Pipeline::new(
        OptimizerConfig::default(),
        Arc::new(CollectingDiagnosticHandler::new()),
    );
    let err = pipeline.run_file(&missing).unwrap_err();
    assert!(matches!(err, TransformError::EntryUnreadable { .. }));
}

#[test]
fn test_broken_include_degrades_gracefully() {
    let dir = TempDir::new().unwrap();
    write(&dir, "broken.php", "<?php function (((");
    let entry = write(
        &dir,
        "main.php",
        "<?php include 'broken.php'; echo 'still here';",
    );

    let handler = Arc::new(CollectingDiagnosticHandler::new());
    let mut pipeline = Pipeline::new(OptimizerConfig::default(), handler.clone());
    let out = pipeline.run_file(&entry).unwrap();
    assert!(out.contains("echo 'still here';"), "{out}");
    assert!(handler.has_errors());
}
