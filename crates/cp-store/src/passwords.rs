//! Password tracking.
//!
//! Passwords are keyed by SHA-256; cleartext retention is a site
//! policy decision made by the caller, so the repository takes an
//! `Option<&str>` and never decides on its own. Breach-check results
//! are attached later by the enrichment cascade.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// One captured credential use.
#[derive(Debug, Clone)]
pub struct PasswordObservation {
    /// Hex SHA-256 of the password bytes.
    pub password_hash: String,
    /// Cleartext, only when site policy allows retention.
    pub password_text: Option<String>,
    pub username: String,
    pub session_id: String,
    pub seen_at: DateTime<Utc>,
}

/// Repository for password tracking.
pub struct PasswordRepo;

impl PasswordRepo {
    /// Record one credential use and link it to the session.
    pub fn record(tx: &Transaction<'_>, obs: &PasswordObservation) -> Result<()> {
        tx.execute(
            "INSERT INTO password_tracking
             (password_hash, password_text, first_seen, last_seen, times_seen)
             VALUES (?1, ?2, ?3, ?3, 1)
             ON CONFLICT (password_hash) DO UPDATE SET
                 last_seen     = MAX(password_tracking.last_seen, excluded.last_seen),
                 first_seen    = MIN(password_tracking.first_seen, excluded.first_seen),
                 times_seen    = password_tracking.times_seen + 1,
                 password_text = COALESCE(password_tracking.password_text, excluded.password_text)",
            params![obs.password_hash, obs.password_text, obs.seen_at],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO session_passwords (session_id, password_hash, username, seen_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![obs.session_id, obs.password_hash, obs.username, obs.seen_at],
        )?;
        tx.execute(
            "UPDATE password_tracking SET unique_sessions =
                 (SELECT COUNT(DISTINCT session_id) FROM session_passwords
                  WHERE password_hash = ?1)
             WHERE password_hash = ?1",
            params![obs.password_hash],
        )?;
        Ok(())
    }

    /// Attach a breach-check result.
    pub fn set_breach_result(
        tx: &Transaction<'_>,
        password_hash: &str,
        breached: bool,
        prevalence: Option<i64>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        tx.execute(
            "UPDATE password_tracking SET
                 breached = ?2,
                 breach_prevalence = ?3,
                 last_breach_check_at = ?4
             WHERE password_hash = ?1",
            params![password_hash, breached, prevalence, checked_at],
        )?;
        Ok(())
    }

    /// Hashes that have never been breach-checked, or were checked
    /// before `stale_before`.
    pub fn unchecked_hashes(
        conn: &Connection,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT password_hash FROM password_tracking
             WHERE last_breach_check_at IS NULL OR last_breach_check_at < ?1
             ORDER BY times_seen DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![stale_before, limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Times one password hash was seen, with its breach state.
    pub fn stats(
        conn: &Connection,
        password_hash: &str,
    ) -> Result<Option<(i64, i64, Option<bool>)>> {
        let row = conn
            .query_row(
                "SELECT times_seen, unique_sessions, breached
                 FROM password_tracking WHERE password_hash = ?1",
                params![password_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Whether the cleartext column is populated (policy verification).
    pub fn has_cleartext(conn: &Connection, password_hash: &str) -> Result<bool> {
        let present: bool = conn.query_row(
            "SELECT password_text IS NOT NULL FROM password_tracking WHERE password_hash = ?1",
            params![password_hash],
            |row| row.get(0),
        )?;
        Ok(present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::migrate::migrate;

    fn obs(session: &str, text: Option<&str>) -> PasswordObservation {
        PasswordObservation {
            password_hash: "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92"
                .into(),
            password_text: text.map(String::from),
            username: "root".into(),
            session_id: session.into(),
            seen_at: Utc::now(),
        }
    }

    #[test]
    fn test_counts_and_sessions() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        store
            .with_tx(|tx| {
                PasswordRepo::record(tx, &obs("s1", None))?;
                PasswordRepo::record(tx, &obs("s1", None))?;
                PasswordRepo::record(tx, &obs("s2", None))
            })
            .unwrap();

        let (times, sessions, breached) = PasswordRepo::stats(
            store.conn(),
            "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92",
        )
        .unwrap()
        .unwrap();
        assert_eq!(times, 3);
        assert_eq!(sessions, 2);
        assert_eq!(breached, None);
    }

    #[test]
    fn test_cleartext_follows_caller_policy() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();

        store
            .with_tx(|tx| PasswordRepo::record(tx, &obs("s1", None)))
            .unwrap();
        assert!(!PasswordRepo::has_cleartext(
            store.conn(),
            "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92"
        )
        .unwrap());
    }

    #[test]
    fn test_breach_result_attached() {
        let mut store = Store::open_in_memory().unwrap();
        migrate(&mut store, "test").unwrap();
        let hash = "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92";

        store
            .with_tx(|tx| {
                PasswordRepo::record(tx, &obs("s1", None))?;
                PasswordRepo::set_breach_result(tx, hash, true, Some(24_000_000), Utc::now())
            })
            .unwrap();
        let (_, _, breached) = PasswordRepo::stats(store.conn(), hash).unwrap().unwrap();
        assert_eq!(breached, Some(true));
        assert!(PasswordRepo::unchecked_hashes(store.conn(), Utc::now() - chrono::Duration::days(60), 10)
            .unwrap()
            .is_empty());
    }
}
