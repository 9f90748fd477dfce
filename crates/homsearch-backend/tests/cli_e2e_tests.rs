//! End-to-end tests for the homsearch binary
//!
//! These run the compiled CLI. The `run` test substitutes a small shell script
//! for the external tools through the environment.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TWO_QUERIES: &str = ">q1\nMKVLAAGIVG\n//\nMKVLAAG\n";

fn homsearch() -> Command {
    let mut cmd = Command::cargo_bin("homsearch").unwrap();
    cmd.env("NO_COLOR", "1").env_remove("HOMSEARCH_CONFIG");
    cmd
}

fn write_batch(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("batch.fa");
    std::fs::write(&path, contents).unwrap();
    path
}

/// Script that creates the file following every `-o`
#[cfg(unix)]
fn fake_tool(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-tool.sh");
    std::fs::write(
        &path,
        "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then echo done > \"$2\"; fi\n  shift\ndone\n",
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// ============================================================================
// Help
// ============================================================================

#[test]
fn test_no_arguments_prints_help() {
    homsearch()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_run_help() {
    homsearch()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--job-root"))
        .stdout(predicate::str::contains("--method"));
}

// ============================================================================
// Split
// ============================================================================

#[test]
fn test_split_lists_queries() {
    let temp = TempDir::new().unwrap();
    let input = write_batch(temp.path(), TWO_QUERIES);
    let root = temp.path().join("demo");

    homsearch()
        .arg("split")
        .arg("--input")
        .arg(&input)
        .arg("--job-root")
        .arg(&root)
        .args(["--name", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 queries"))
        .stdout(predicate::str::contains("plain_fasta"));

    assert!(root.join("demo__0/demo__0.fa").exists());
    let second = std::fs::read_to_string(root.join("demo__1/demo__1.fa")).unwrap();
    assert!(second.starts_with(">Query_1\n"));
}

#[test]
fn test_split_reports_truncation() {
    let temp = TempDir::new().unwrap();
    let input = write_batch(temp.path(), TWO_QUERIES);

    homsearch()
        .arg("split")
        .arg("-i")
        .arg(&input)
        .arg("-j")
        .arg(temp.path().join("demo"))
        .args(["-n", "demo", "--max-queries", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 queries"))
        .stdout(predicate::str::contains("Warning:"));
}

// ============================================================================
// Run
// ============================================================================

#[test]
fn test_run_missing_input_fails() {
    let temp = TempDir::new().unwrap();

    homsearch()
        .arg("run")
        .arg("-i")
        .arg(temp.path().join("missing.fa"))
        .arg("-j")
        .arg(temp.path().join("demo"))
        .args(["-n", "demo", "--no-progress"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Job demo failed"));
}

#[test]
fn test_run_rejects_zero_cpus() {
    let temp = TempDir::new().unwrap();
    let input = write_batch(temp.path(), TWO_QUERIES);

    homsearch()
        .arg("run")
        .arg("-i")
        .arg(&input)
        .arg("-j")
        .arg(temp.path().join("demo"))
        .args(["-n", "demo", "--cpus", "0", "--no-progress"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[cfg(unix)]
#[test]
fn test_run_produces_archive() {
    let temp = TempDir::new().unwrap();
    let input = write_batch(temp.path(), TWO_QUERIES);
    let root = temp.path().join("demo");
    let tool = fake_tool(temp.path());

    homsearch()
        .env("HOMSEARCH_TOOLS__NEFF", &tool)
        .env("HOMSEARCH_TOOLS__MAKEPRO", &tool)
        .arg("run")
        .arg("-i")
        .arg(&input)
        .arg("-j")
        .arg(&root)
        .args(["-n", "demo", "--cpus", "2", "--no-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Job demo finished"))
        .stdout(predicate::str::contains("2 succeeded, 0 failed"));

    assert!(root.join("demo.tar.gz").exists());
    let manifest = std::fs::read_to_string(root.join("demo.manifest")).unwrap();
    assert_eq!(manifest.lines().count(), 3);
    assert!(root.join("demo__0/demo__0.pro").exists());
}
