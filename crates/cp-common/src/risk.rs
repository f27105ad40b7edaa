//! Per-event risk scoring.
//!
//! Scores are heuristic and bounded to 0..=100. Events at or above
//! [`QUARANTINE_THRESHOLD`] are persisted with `quarantined = true` but
//! never dropped; quarantine is a flag, not a filter.

use crate::event::{CowrieEvent, EventKind};

/// Events scoring at or above this are quarantined on write.
pub const QUARANTINE_THRESHOLD: u8 = 80;

/// Score a single event.
///
/// The honeypot never grants real access, so a successful login or a
/// completed download is attacker progress and scores high. Command
/// input is graded by a few strings that almost never appear in benign
/// scanner traffic.
pub fn score_event(event: &CowrieEvent) -> u8 {
    let base: u8 = match event.kind() {
        EventKind::LoginSuccess => 70,
        EventKind::FileDownload => 85,
        EventKind::ClientFingerprint => 60,
        EventKind::CommandInput => 40,
        EventKind::LoginFailed => 20,
        EventKind::SessionConnect | EventKind::SessionClosed => 5,
        EventKind::ClientVersion => 10,
        EventKind::Unknown => 10,
    };

    let mut score = base;

    if event.kind() == EventKind::CommandInput {
        if let Some(input) = event.str_field("input") {
            score = score.saturating_add(command_bonus(input));
        }
    }

    // Download URLs pointing at raw IPs are dropper-style delivery.
    if event.kind() == EventKind::FileDownload {
        if let Some(url) = event.str_field("url") {
            if url_host_is_ip(url) {
                score = score.saturating_add(10);
            }
        }
    }

    score.min(100)
}

fn command_bonus(input: &str) -> u8 {
    const HIGH: [&str; 6] = [
        "authorized_keys",
        "chmod +x",
        "wget http",
        "curl http",
        "/dev/shm",
        "base64 -d",
    ];
    const MEDIUM: [&str; 4] = ["uname -a", "nproc", "/etc/passwd", "crontab"];

    let lower = input.to_lowercase();
    if HIGH.iter().any(|m| lower.contains(m)) {
        45
    } else if MEDIUM.iter().any(|m| lower.contains(m)) {
        20
    } else {
        0
    }
}

fn url_host_is_ip(url: &str) -> bool {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .or_else(|| url.strip_prefix("ftp://"))
        .unwrap_or(url);
    let host = rest
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    host.parse::<std::net::IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(payload: serde_json::Value) -> CowrieEvent {
        CowrieEvent::from_value(payload).unwrap()
    }

    #[test]
    fn test_login_success_scores_high() {
        let e = event(json!({
            "eventid": "cowrie.login.success",
            "timestamp": "2026-07-30T12:00:00Z",
            "session": "s1",
            "username": "root",
            "password": "123456"
        }));
        assert!(score_event(&e) >= 70);
    }

    #[test]
    fn test_key_injection_command_quarantines() {
        let e = event(json!({
            "eventid": "cowrie.command.input",
            "timestamp": "2026-07-30T12:00:00Z",
            "session": "s1",
            "input": "echo ssh-rsa AAAA... >> ~/.ssh/authorized_keys"
        }));
        assert!(score_event(&e) >= QUARANTINE_THRESHOLD);
    }

    #[test]
    fn test_connect_scores_low() {
        let e = event(json!({
            "eventid": "cowrie.session.connect",
            "timestamp": "2026-07-30T12:00:00Z",
            "session": "s1",
            "src_ip": "198.51.100.4"
        }));
        assert!(score_event(&e) < 20);
    }

    #[test]
    fn test_ip_hosted_download_bonus() {
        let by_ip = event(json!({
            "eventid": "cowrie.session.file_download",
            "timestamp": "2026-07-30T12:00:00Z",
            "session": "s1",
            "url": "http://203.0.113.9/bot.sh",
            "shasum": "ab".repeat(32)
        }));
        let by_name = event(json!({
            "eventid": "cowrie.session.file_download",
            "timestamp": "2026-07-30T12:00:00Z",
            "session": "s1",
            "url": "http://cdn.example.com/bot.sh",
            "shasum": "ab".repeat(32)
        }));
        assert!(score_event(&by_ip) > score_event(&by_name));
    }

    #[test]
    fn test_score_bounded() {
        let e = event(json!({
            "eventid": "cowrie.session.file_download",
            "timestamp": "2026-07-30T12:00:00Z",
            "session": "s1",
            "url": "http://203.0.113.9/x",
            "shasum": "ab".repeat(32)
        }));
        assert!(score_event(&e) <= 100);
    }
}
