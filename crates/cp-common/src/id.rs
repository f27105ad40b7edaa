//! Ingest-run and session identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for one ingest run.
///
/// Format: `ing-YYYYMMDD-HHMMSS-XXXX`
/// Example: `ing-20260801-093045-k3tq`
///
/// Every RawEvent row records the ingest run that wrote it, so a bad run
/// can be traced (and, under explicit retention, excised) as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngestId(pub String);

impl IngestId {
    /// Generate a new ingest id.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        let suffix = generate_base32_suffix();
        IngestId(format!(
            "ing-{}-{}-{}",
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            suffix
        ))
    }

    /// Parse an existing ingest id string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 24 {
            return None;
        }
        let bytes = s.as_bytes();
        if !s.starts_with("ing-")
            || bytes.get(12) != Some(&b'-')
            || bytes.get(19) != Some(&b'-')
        {
            return None;
        }
        let date = &s[4..12];
        let time = &s[13..19];
        let suffix = &s[20..24];
        if !date.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if !time.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if !suffix.chars().all(|c| matches!(c, 'a'..='z' | '2'..='7')) {
            return None;
        }
        Some(IngestId(s.to_string()))
    }
}

impl Default for IngestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IngestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Honeypot session identifier as emitted by Cowrie.
///
/// Opaque; the store only enforces a length bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    /// Accept a session id from the wire, rejecting over-long values.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > crate::MAX_SESSION_ID_LEN {
            return None;
        }
        Some(SessionKey(s.to_string()))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn generate_base32_suffix() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    let mut value = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32);
    value &= 0x000F_FFFF;
    let alphabet = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut out = String::with_capacity(4);
    for shift in [15_u32, 10, 5, 0] {
        let idx = ((value >> shift) & 0x1F) as usize;
        out.push(alphabet[idx] as char);
    }
    out
}
