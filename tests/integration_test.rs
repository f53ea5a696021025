use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn dsync_bin() -> String {
    env!("CARGO_BIN_EXE_dsync").to_string()
}

fn setup_test_dirs() -> (TempDir, TempDir) {
    let source = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    (source, dest)
}

fn run(args: &[&str]) -> std::process::Output {
    Command::new(dsync_bin()).args(args).output().unwrap()
}

#[test]
fn test_basic_mirror_sync() {
    let (source, dest) = setup_test_dirs();

    fs::write(source.path().join("file1.txt"), "content1").unwrap();
    fs::create_dir(source.path().join("sub")).unwrap();
    fs::write(source.path().join("sub/file2.txt"), "content2").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert!(dest.path().join("file1.txt").exists());
    assert!(dest.path().join("sub/file2.txt").exists());
    assert_eq!(
        fs::read_to_string(dest.path().join("file1.txt")).unwrap(),
        "content1"
    );
}

#[test]
fn test_dry_run_changes_nothing() {
    let (source, dest) = setup_test_dirs();

    fs::write(source.path().join("file.txt"), "content").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
        "--dry-run",
    ]);

    assert!(output.status.success());
    assert!(!dest.path().join("file.txt").exists());
}

#[test]
fn test_mirror_removes_extra_dest_files() {
    let (source, dest) = setup_test_dirs();

    fs::write(source.path().join("keep.txt"), "keep").unwrap();
    fs::write(dest.path().join("extra.txt"), "extra").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
        "--strategy",
        "mirror",
    ]);

    assert!(output.status.success());
    assert!(dest.path().join("keep.txt").exists());
    assert!(!dest.path().join("extra.txt").exists());
}

#[test]
fn test_incremental_keeps_extra_dest_files() {
    let (source, dest) = setup_test_dirs();

    fs::write(source.path().join("new.txt"), "new").unwrap();
    fs::write(dest.path().join("extra.txt"), "extra").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
        "--strategy",
        "incremental",
    ]);

    assert!(output.status.success());
    assert!(dest.path().join("new.txt").exists());
    assert!(dest.path().join("extra.txt").exists());
}

#[test]
fn test_two_way_merges_both_sides() {
    let (source, dest) = setup_test_dirs();

    fs::write(source.path().join("from-source.txt"), "a").unwrap();
    fs::write(dest.path().join("from-dest.txt"), "b").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
        "--strategy",
        "two-way",
    ]);

    assert!(output.status.success());
    assert!(source.path().join("from-dest.txt").exists());
    assert!(dest.path().join("from-source.txt").exists());
}

#[test]
fn test_conflicting_sizes_mirror_overwrites() {
    let (source, dest) = setup_test_dirs();

    fs::write(source.path().join("clash.txt"), "source wins here").unwrap();
    fs::write(dest.path().join("clash.txt"), "dest").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert_eq!(
        fs::read_to_string(dest.path().join("clash.txt")).unwrap(),
        "source wins here"
    );
}

#[test]
fn test_ignored_folders_are_skipped() {
    let (source, dest) = setup_test_dirs();

    fs::create_dir(source.path().join("target")).unwrap();
    fs::write(source.path().join("target/artifact.bin"), "big").unwrap();
    fs::write(source.path().join("code.rs"), "fn main() {}").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
        "--ignore",
        "target",
    ]);

    assert!(output.status.success());
    assert!(dest.path().join("code.rs").exists());
    assert!(!dest.path().join("target").exists());
}

#[test]
fn test_junk_files_are_skipped() {
    let (source, dest) = setup_test_dirs();

    fs::write(source.path().join(".DS_Store"), "junk").unwrap();
    fs::write(source.path().join("real.txt"), "data").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert!(dest.path().join("real.txt").exists());
    assert!(!dest.path().join(".DS_Store").exists());
}

#[test]
fn test_json_summary_output() {
    let (source, dest) = setup_test_dirs();

    fs::write(source.path().join("file.txt"), "12345").unwrap();

    let output = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
        "--dry-run",
        "--json",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"totalBytes\":5"));
    assert!(stdout.contains("\"totalCount\":1"));
}

#[test]
fn test_sync_is_idempotent() {
    let (source, dest) = setup_test_dirs();

    fs::create_dir(source.path().join("docs")).unwrap();
    fs::write(source.path().join("docs/a.txt"), "aaa").unwrap();
    fs::write(dest.path().join("stale.txt"), "zzz").unwrap();

    let first = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
    ]);
    assert!(first.status.success());

    // Second pass over a mirrored pair reports nothing to do
    let second = run(&[
        source.path().to_str().unwrap(),
        dest.path().to_str().unwrap(),
        "--json",
        "--dry-run",
    ]);
    assert!(second.status.success());
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(stdout.contains("\"totalBytes\":0"));
    assert!(stdout.contains("\"totalCount\":0"));
}

#[test]
fn test_unreachable_source_fails() {
    let dest = TempDir::new().unwrap();

    let output = run(&[
        "/nonexistent/dsync-source",
        dest.path().to_str().unwrap(),
    ]);

    assert!(!output.status.success());
}
