//! End-to-end tests of the `isobatch` binary that need no mounting: usage
//! errors, a missing source directory, and dry runs.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn isobatch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_isobatch"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("ISOBATCH_DUMPER")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run isobatch")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}

#[test]
fn missing_arguments_is_a_usage_error() {
    let out = isobatch(&[]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Usage"), "stderr={stderr}");
}

#[test]
fn missing_output_is_a_usage_error() {
    let source = TempDir::new().unwrap();
    let out = isobatch(&[path_arg(source.path())]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn help_lists_flags() {
    let out = isobatch(&["--help"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for flag in ["--dry-run", "--recurse", "--delete", "--attempts", "--dumper"] {
        assert!(stdout.contains(flag), "missing {flag} in help: {stdout}");
    }
}

#[test]
fn missing_source_exits_with_setup_error() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("does-not-exist");
    let output = dir.path().join("out");

    let out = isobatch(&[path_arg(&source), path_arg(&output)]);

    assert_eq!(out.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("does not exist"), "stderr={stderr}");
    assert!(!output.exists());
}

#[test]
fn dry_run_lists_images_without_touching_anything() {
    let source = TempDir::new().unwrap();
    fs::write(source.path().join("disc2.iso"), b"two").unwrap();
    fs::write(source.path().join("disc1.iso"), b"one").unwrap();
    fs::write(source.path().join("readme.txt"), b"ignore me").unwrap();
    let scratch = TempDir::new().unwrap();
    let output = scratch.path().join("dumps");

    let out = isobatch(&[
        path_arg(source.path()),
        path_arg(&output),
        "--dry-run",
        "--delete",
    ]);

    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = stdout
        .lines()
        .filter(|l| l.contains("Would dump"))
        .collect();
    assert_eq!(lines.len(), 2, "stdout={stdout}");
    assert!(lines[0].contains("disc1.iso"));
    assert!(lines[1].contains("disc2.iso"));
    assert!(stdout.contains("Dry run: no discs will be dumped"));

    assert!(source.path().join("disc1.iso").exists());
    assert!(source.path().join("disc2.iso").exists());
    assert!(!output.exists());
}

#[test]
fn dry_run_recurse_finds_nested_images() {
    let source = TempDir::new().unwrap();
    fs::create_dir_all(source.path().join("box/set")).unwrap();
    fs::write(source.path().join("top.iso"), b"").unwrap();
    fs::write(source.path().join("box/set/nested.iso"), b"").unwrap();
    let scratch = TempDir::new().unwrap();

    let flat = isobatch(&[path_arg(source.path()), path_arg(scratch.path()), "-n"]);
    let flat = String::from_utf8_lossy(&flat.stdout).into_owned();
    assert!(flat.contains("top.iso"));
    assert!(!flat.contains("nested.iso"));

    let deep = isobatch(&[path_arg(source.path()), path_arg(scratch.path()), "-n", "-r"]);
    let deep = String::from_utf8_lossy(&deep.stdout).into_owned();
    assert!(deep.contains("top.iso"));
    assert!(deep.contains("nested.iso"));
}

#[test]
fn dry_run_over_empty_directory_succeeds() {
    let source = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let out = isobatch(&[path_arg(source.path()), path_arg(scratch.path()), "-n"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Found 0 image(s)."));
}
