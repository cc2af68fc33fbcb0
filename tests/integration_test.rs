use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to run sos in a directory with an isolated home and config
fn sos(dir: &Path, home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sos"))
        .current_dir(dir)
        .args(args)
        .env("HOME", home)
        .env("SOS_CONFIG", home.join("sos.yaml"))
        .env("SOS_STRICT", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run sos")
}

/// Run sos and fail the test on a non-zero exit
fn sos_ok(dir: &Path, home: &Path, args: &[&str]) -> String {
    let output = sos(dir, home, args);
    assert!(
        output.status.success(),
        "sos {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Working folder and home folder inside one temp dir
fn workspace(temp: &TempDir) -> (PathBuf, PathBuf) {
    let work = temp.path().join("work");
    let home = temp.path().join("home");
    fs::create_dir(&work).unwrap();
    fs::create_dir(&home).unwrap();
    (work, home)
}

fn read_meta(path: PathBuf) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[test]
fn test_offline_and_commit_two_files() {
    let temp = TempDir::new().unwrap();
    let (work, home) = workspace(&temp);

    sos_ok(&work, &home, &["offline"]);
    fs::write(work.join("a.txt"), "hello\n").unwrap();
    fs::write(work.join("b.bin"), "").unwrap();
    let out = sos_ok(&work, &home, &["commit", "first files"]);
    assert!(out.contains("r01"), "unexpected output: {}", out);

    let delta = read_meta(work.join(".sos/b0/r1/.meta"));
    assert!(delta.get("a.txt").is_some());
    assert_eq!(delta["b.bin"]["size"], 0);
    assert_eq!(delta["b.bin"]["hash"], EMPTY_DIGEST);

    let log = sos_ok(&work, &home, &["log", "--changes"]);
    assert!(log.contains("|first files|"));
    assert!(log.contains("(+2/-0/~0)"));
}

#[test]
fn test_changes_reports_deletion() {
    let temp = TempDir::new().unwrap();
    let (work, home) = workspace(&temp);
    fs::write(work.join("a.txt"), "hello\n").unwrap();
    fs::write(work.join("keep.txt"), "keep\n").unwrap();
    sos_ok(&work, &home, &["offline"]);

    fs::remove_file(work.join("a.txt")).unwrap();
    let out = sos_ok(&work, &home, &["changes"]);
    assert_eq!(out.trim(), "DEL a.txt");
}

#[test]
fn test_update_mine_and_theirs() {
    let temp = TempDir::new().unwrap();
    let (work, home) = workspace(&temp);
    let base = "one\ntwo\nthree\nfour\n";
    let theirs = "one\ntwo\nthree as changed on the side branch\nfour\n";
    let mine = "one\ntwo\n3 (trunk)\nfour\n";

    fs::write(work.join("shared.txt"), base).unwrap();
    sos_ok(&work, &home, &["offline", "trunk"]);
    sos_ok(&work, &home, &["branch", "side"]);
    fs::write(work.join("shared.txt"), theirs).unwrap();
    sos_ok(&work, &home, &["commit"]);
    sos_ok(&work, &home, &["switch", "trunk"]);
    assert_eq!(fs::read_to_string(work.join("shared.txt")).unwrap(), base);
    fs::write(work.join("shared.txt"), mine).unwrap();
    sos_ok(&work, &home, &["commit"]);

    sos_ok(&work, &home, &["update", "side", "--mine"]);
    assert_eq!(fs::read_to_string(work.join("shared.txt")).unwrap(), mine);

    sos_ok(&work, &home, &["update", "side", "--theirs"]);
    assert_eq!(fs::read_to_string(work.join("shared.txt")).unwrap(), theirs);

    // pulled changes mark the branch as unsynchronized
    let refused = sos(&work, &home, &["online"]);
    assert_eq!(refused.status.code(), Some(1));
    assert!(work.join(".sos").exists());
    sos_ok(&work, &home, &["online", "--force"]);
    assert!(!work.join(".sos").exists());
}

#[test]
fn test_delete_only_branch_is_rejected() {
    let temp = TempDir::new().unwrap();
    let (work, home) = workspace(&temp);
    fs::write(work.join("a.txt"), "a\n").unwrap();
    sos_ok(&work, &home, &["offline"]);

    let branches_before = fs::read(work.join(".sos/.meta")).unwrap();
    let commits_before = fs::read(work.join(".sos/b0/.meta")).unwrap();
    let output = sos(&work, &home, &["delete", "0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&output.stderr).is_empty());
    assert_eq!(fs::read(work.join(".sos/.meta")).unwrap(), branches_before);
    assert_eq!(fs::read(work.join(".sos/b0/.meta")).unwrap(), commits_before);
    assert!(work.join(".sos/b0/r0").is_dir());
}

#[test]
fn test_empty_file_roundtrip_through_switch() {
    let temp = TempDir::new().unwrap();
    let (work, home) = workspace(&temp);
    fs::write(work.join("a.txt"), "a\n").unwrap();
    sos_ok(&work, &home, &["offline", "--compress"]);
    fs::write(work.join("empty"), "").unwrap();
    sos_ok(&work, &home, &["commit"]);

    let delta = read_meta(work.join(".sos/b0/r1/.meta"));
    assert_eq!(delta["empty"]["hash"], EMPTY_DIGEST);

    fs::remove_file(work.join("empty")).unwrap();
    sos_ok(&work, &home, &["switch", "/1", "--force"]);
    assert_eq!(fs::metadata(work.join("empty")).unwrap().len(), 0);
    assert_eq!(sos_ok(&work, &home, &["changes"]).trim(), "No changes");
}

#[test]
fn test_usage_errors_exit_with_one() {
    let temp = TempDir::new().unwrap();
    let (work, home) = workspace(&temp);
    fs::write(work.join("a.txt"), "a\n").unwrap();
    sos_ok(&work, &home, &["offline"]);

    let nothing = sos(&work, &home, &["commit"]);
    assert_eq!(nothing.status.code(), Some(1));
    assert_eq!(String::from_utf8_lossy(&nothing.stderr).trim(), "Nothing to commit");

    let again = sos(&work, &home, &["offline"]);
    assert_eq!(again.status.code(), Some(1));

    let unknown = sos(&work, &home, &["changes", "nope/3"]);
    assert_eq!(unknown.status.code(), Some(1));

    let conflicting = sos(&work, &home, &["update", "--mine", "--theirs"]);
    assert_eq!(conflicting.status.code(), Some(1));

    let missing = sos(&work, &home, &["delete"]);
    assert_eq!(missing.status.code(), Some(1));

    let help = sos(&work, &home, &["--help"]);
    assert_eq!(help.status.code(), Some(0));
}
