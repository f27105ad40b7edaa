//! Cowrie event model and validator.
//!
//! Events arrive as free-form JSON objects. Known event kinds get
//! per-type required-field checks; unknown `cowrie.*` ids are accepted
//! for forward compatibility and tagged so consumers can count them.
//! Unknown keys are always preserved in the payload.

use crate::id::SessionKey;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Vocabulary prefix every valid event id must carry.
pub const COWRIE_EVENT_PREFIX: &str = "cowrie.";

/// Known Cowrie event kinds the core inspects.
///
/// The wire carries many more ids; anything else parses to `Unknown`
/// and is stored untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionConnect,
    SessionClosed,
    CommandInput,
    LoginSuccess,
    LoginFailed,
    FileDownload,
    ClientFingerprint,
    ClientVersion,
    Unknown,
}

impl EventKind {
    /// Map an event id string to a kind.
    pub fn from_eventid(eventid: &str) -> Self {
        match eventid {
            "cowrie.session.connect" => EventKind::SessionConnect,
            "cowrie.session.closed" => EventKind::SessionClosed,
            "cowrie.command.input" => EventKind::CommandInput,
            "cowrie.login.success" => EventKind::LoginSuccess,
            "cowrie.login.failed" => EventKind::LoginFailed,
            "cowrie.session.file_download" => EventKind::FileDownload,
            "cowrie.client.fingerprint" => EventKind::ClientFingerprint,
            "cowrie.client.version" => EventKind::ClientVersion,
            _ => EventKind::Unknown,
        }
    }

    /// Fields that must be present (as strings) for this kind.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            EventKind::SessionConnect => &["src_ip"],
            EventKind::CommandInput => &["input"],
            EventKind::LoginSuccess | EventKind::LoginFailed => &["username", "password"],
            EventKind::FileDownload => &["url", "shasum"],
            EventKind::ClientFingerprint => &["fingerprint"],
            _ => &[],
        }
    }
}

/// Result of validating a parsed object against the Cowrie event shape.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Whether the object is acceptable as a Cowrie event.
    pub valid: bool,

    /// Human-readable reasons when invalid.
    pub errors: Vec<String>,

    /// False for `cowrie.*` ids the core has no field table for.
    pub known_event: bool,
}

impl ValidationOutcome {
    fn fail(errors: Vec<String>) -> Self {
        ValidationOutcome {
            valid: false,
            errors,
            known_event: false,
        }
    }
}

/// A validated Cowrie event with typed accessors over the raw payload.
#[derive(Debug, Clone)]
pub struct CowrieEvent {
    payload: Value,
    kind: EventKind,
    timestamp: DateTime<Utc>,
}

impl CowrieEvent {
    /// Validate a parsed object without consuming it.
    ///
    /// An object is valid iff it is a mapping, carries a string
    /// `eventid` starting with `cowrie.`, and has a parseable UTC
    /// timestamp. Known kinds additionally require their field table.
    pub fn validate(value: &Value) -> ValidationOutcome {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return ValidationOutcome::fail(vec!["event is not a JSON object".into()]),
        };

        let mut errors = Vec::new();

        let eventid = match obj.get("eventid").and_then(Value::as_str) {
            Some(id) => id,
            None => {
                return ValidationOutcome::fail(vec!["missing string field 'eventid'".into()]);
            }
        };
        if !eventid.starts_with(COWRIE_EVENT_PREFIX) {
            errors.push(format!("eventid '{eventid}' lacks the 'cowrie.' prefix"));
        }

        match obj.get("timestamp").and_then(Value::as_str) {
            Some(ts) => {
                if parse_timestamp(ts).is_none() {
                    errors.push(format!("unparseable timestamp '{ts}'"));
                }
            }
            None => errors.push("missing string field 'timestamp'".into()),
        }

        let kind = EventKind::from_eventid(eventid);
        for field in kind.required_fields() {
            if obj.get(*field).and_then(Value::as_str).is_none() {
                errors.push(format!("eventid '{eventid}' requires string field '{field}'"));
            }
        }

        ValidationOutcome {
            valid: errors.is_empty(),
            errors,
            known_event: kind != EventKind::Unknown,
        }
    }

    /// Wrap a payload that already passed [`CowrieEvent::validate`].
    ///
    /// Returns `None` if the payload fails validation after all, so the
    /// invariant "a `CowrieEvent` has a timestamp" cannot be broken.
    pub fn from_value(payload: Value) -> Option<Self> {
        let outcome = Self::validate(&payload);
        if !outcome.valid {
            return None;
        }
        let obj = payload.as_object()?;
        let kind = EventKind::from_eventid(obj.get("eventid")?.as_str()?);
        let timestamp = parse_timestamp(obj.get("timestamp")?.as_str()?)?;
        Some(CowrieEvent {
            payload,
            kind,
            timestamp,
        })
    }

    /// The event kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The event timestamp in UTC.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The raw event id string.
    pub fn eventid(&self) -> &str {
        self.str_field("eventid").unwrap_or_default()
    }

    /// The session id, if present and acceptable to the store.
    pub fn session(&self) -> Option<&str> {
        self.str_field("session")
            .filter(|s| SessionKey::parse(s).is_some())
    }

    /// The source IP, if present.
    pub fn src_ip(&self) -> Option<&str> {
        self.str_field("src_ip")
    }

    /// A string field from the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Borrow the full payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Take the payload, consuming the event.
    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// Parse a Cowrie timestamp.
///
/// Accepts RFC 3339 with or without fractional seconds; a bare trailing
/// `Z` and explicit offsets both normalize to UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connect_event() -> Value {
        json!({
            "eventid": "cowrie.session.connect",
            "timestamp": "2026-07-30T12:00:00.123456Z",
            "session": "a1b2c3d4",
            "src_ip": "203.0.113.9",
            "src_port": 52431,
            "protocol": "ssh"
        })
    }

    #[test]
    fn test_valid_connect_event() {
        let outcome = CowrieEvent::validate(&connect_event());
        assert!(outcome.valid, "{:?}", outcome.errors);
        assert!(outcome.known_event);
    }

    #[test]
    fn test_non_object_rejected() {
        let outcome = CowrieEvent::validate(&json!([1, 2, 3]));
        assert!(!outcome.valid);
    }

    #[test]
    fn test_missing_eventid_rejected() {
        let outcome = CowrieEvent::validate(&json!({"timestamp": "2026-07-30T12:00:00Z"}));
        assert!(!outcome.valid);
        assert!(outcome.errors[0].contains("eventid"));
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let outcome = CowrieEvent::validate(&json!({
            "eventid": "kippo.session.connect",
            "timestamp": "2026-07-30T12:00:00Z"
        }));
        assert!(!outcome.valid);
    }

    #[test]
    fn test_unknown_cowrie_event_accepted_but_tagged() {
        let outcome = CowrieEvent::validate(&json!({
            "eventid": "cowrie.direct-tcpip.request",
            "timestamp": "2026-07-30T12:00:00Z",
            "session": "a1b2c3d4"
        }));
        assert!(outcome.valid);
        assert!(!outcome.known_event);
    }

    #[test]
    fn test_required_fields_per_kind() {
        let outcome = CowrieEvent::validate(&json!({
            "eventid": "cowrie.login.failed",
            "timestamp": "2026-07-30T12:00:00Z",
            "username": "root"
        }));
        assert!(!outcome.valid);
        assert!(outcome.errors.iter().any(|e| e.contains("password")));
    }

    #[test]
    fn test_timestamp_without_fraction() {
        assert!(parse_timestamp("2026-07-30T12:00:00Z").is_some());
        assert!(parse_timestamp("2026-07-30T12:00:00+02:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_accessors() {
        let event = CowrieEvent::from_value(connect_event()).unwrap();
        assert_eq!(event.kind(), EventKind::SessionConnect);
        assert_eq!(event.session(), Some("a1b2c3d4"));
        assert_eq!(event.src_ip(), Some("203.0.113.9"));
        assert_eq!(event.timestamp().timezone(), Utc);
    }

    #[test]
    fn test_overlong_session_id_dropped() {
        let mut value = connect_event();
        value["session"] = json!("s".repeat(65));
        let event = CowrieEvent::from_value(value).unwrap();
        assert_eq!(event.session(), None);
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let event = CowrieEvent::from_value(connect_event()).unwrap();
        assert_eq!(event.payload().get("src_port"), Some(&json!(52431)));
    }
}
