//! CLI surface tests: verbs, exit codes, and payload shapes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn cp_core() -> Command {
    Command::cargo_bin("cp-core").expect("binary built")
}

fn line_event(session: &str, seq: usize) -> String {
    format!(
        r#"{{"eventid":"cowrie.session.connect","timestamp":"2026-07-30T12:00:{seq:02}Z","session":"{session}","src_ip":"203.0.113.9"}}"#
    )
}

fn write_log(dir: &tempfile::TempDir, name: &str, events: usize) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for i in 0..events {
        writeln!(file, "{}", line_event("cli01", i)).unwrap();
    }
    path
}

#[test]
fn migrate_then_health_check_passes() {
    let dir = tempfile::tempdir().unwrap();

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"to_version\": 16"));

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("check-health")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"healthy\": true"));
}

#[test]
fn health_check_fails_before_migrate() {
    let dir = tempfile::tempdir().unwrap();
    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("check-health")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"healthy\": false"));
}

#[test]
fn bulk_ingest_requires_migrated_schema() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_log(&dir, "cowrie.json", 3);

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("bulk-ingest")
        .arg(&log)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("migrate"));
}

#[test]
fn bulk_ingest_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_log(&dir, "cowrie.json", 12);

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("migrate")
        .assert()
        .success();

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("bulk-ingest")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"events_inserted\": 12"));

    // Second run: everything is a duplicate.
    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("bulk-ingest")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"events_inserted\": 0"))
        .stdout(predicate::str::contains("\"duplicates\": 12"));

    // The status document landed.
    assert!(dir.path().join("status").join("bulk_ingest.json").exists());
    assert!(dir.path().join("status").join("status.json").exists());
}

#[test]
fn missing_input_file_is_user_error() {
    let dir = tempfile::tempdir().unwrap();
    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("migrate")
        .assert()
        .success();

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("bulk-ingest")
        .arg(dir.path().join("missing.json"))
        .assert()
        .code(1);
}

#[test]
fn sanitize_dry_run_reports_zero_on_clean_store() {
    let dir = tempfile::tempdir().unwrap();
    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("migrate")
        .assert()
        .success();

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .args(["sanitize", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"affected_rows\": 0"));
}

#[test]
fn backfill_snapshots_runs_clean() {
    let dir = tempfile::tempdir().unwrap();
    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("migrate")
        .assert()
        .success();

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("backfill-snapshots")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sealed\": 0"));
}

#[test]
fn dead_letter_replay_promotes_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cowrie.json");
    std::fs::write(
        &path,
        format!("{}\n{{torn\n", line_event("cli02", 0)),
    )
    .unwrap();

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("migrate")
        .assert()
        .success();
    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("bulk-ingest")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dead_letters\": 1"));

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("dead-letter-replay")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"examined\": 1"));
}

#[test]
fn multiline_flag_controls_pretty_input() {
    let dir = tempfile::tempdir().unwrap();
    let pretty = serde_json::to_string_pretty(&serde_json::json!({
        "eventid": "cowrie.session.connect",
        "timestamp": "2026-07-30T12:00:00Z",
        "session": "cli03",
        "src_ip": "203.0.113.9"
    }))
    .unwrap();
    let path = dir.path().join("pretty.json");
    std::fs::write(&path, format!("{pretty}\n")).unwrap();

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("migrate")
        .assert()
        .success();

    // Default refuses multiline: every line dead-letters.
    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .arg("bulk-ingest")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"events_inserted\": 0"));

    cp_core()
        .args(["--data-dir"])
        .arg(dir.path())
        .args(["bulk-ingest", "--multiline-json"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"events_inserted\": 1"));
}

#[test]
fn unknown_subcommand_is_usage_error() {
    cp_core().arg("frobnicate").assert().failure();
}
