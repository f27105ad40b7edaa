//! The L2 (database) enrichment cache.
//!
//! Shared across every process pointed at the same database, unlike
//! the per-process L1 and the per-host L3. Rows are unique on
//! `(service, cache_key_hash)`; expired rows read as misses and are
//! purged opportunistically.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

/// Outcome class of the upstream call that produced a cache entry.
///
/// Negative results are cached too, usually with a shorter TTL, so a
/// missing record does not trigger a quota-burning retry storm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    NotFound,
    Error,
    RateLimited,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::NotFound => "not_found",
            ResponseStatus::Error => "error",
            ResponseStatus::RateLimited => "rate_limited",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ResponseStatus::Success),
            "not_found" => Some(ResponseStatus::NotFound),
            "error" => Some(ResponseStatus::Error),
            "rate_limited" => Some(ResponseStatus::RateLimited),
            _ => None,
        }
    }
}

/// One cache entry, independent of which tier stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub service: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub status: ResponseStatus,
    pub fetched_at: DateTime<Utc>,
    /// `None` means the entry never expires (offline sources).
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_latency_ms: Option<i64>,
}

impl CacheEntry {
    /// Whether the entry is still usable at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now < expires,
            None => true,
        }
    }
}

/// Repository over the `enrichment_cache` table.
pub struct CacheRepo;

impl CacheRepo {
    /// Read an entry; expired rows are treated as misses.
    pub fn get(
        conn: &Connection,
        service: &str,
        key_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let row = conn
            .query_row(
                "SELECT cache_key, payload, response_status, created_at, expires_at, api_latency_ms
                 FROM enrichment_cache
                 WHERE service = ?1 AND cache_key_hash = ?2",
                params![service, key_hash],
                |row| {
                    let payload: Option<String> = row.get(1)?;
                    let status: String = row.get(2)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        payload,
                        status,
                        row.get::<_, DateTime<Utc>>(3)?,
                        row.get::<_, Option<DateTime<Utc>>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((key, payload, status, fetched_at, expires_at, latency)) = row else {
            return Ok(None);
        };
        let entry = CacheEntry {
            service: service.to_string(),
            key,
            payload: match payload {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::Value::Null,
            },
            status: ResponseStatus::parse(&status).unwrap_or(ResponseStatus::Error),
            fetched_at,
            expires_at,
            api_latency_ms: latency,
        };
        if !entry.is_fresh(now) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Bump hit accounting for an entry that was served.
    pub fn touch(tx: &Transaction<'_>, service: &str, key_hash: &str) -> Result<()> {
        tx.execute(
            "UPDATE enrichment_cache
             SET hit_count = hit_count + 1, accessed_at = ?3
             WHERE service = ?1 AND cache_key_hash = ?2",
            params![service, key_hash, Utc::now()],
        )?;
        Ok(())
    }

    /// Upsert an entry from a fresh upstream response.
    pub fn put(tx: &Transaction<'_>, key_hash: &str, entry: &CacheEntry) -> Result<()> {
        tx.execute(
            "INSERT INTO enrichment_cache
             (service, cache_key, cache_key_hash, payload, response_status,
              created_at, accessed_at, expires_at, api_latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8)
             ON CONFLICT (service, cache_key_hash) DO UPDATE SET
                 payload         = excluded.payload,
                 response_status = excluded.response_status,
                 created_at      = excluded.created_at,
                 accessed_at     = excluded.accessed_at,
                 expires_at      = excluded.expires_at,
                 api_latency_ms  = excluded.api_latency_ms",
            params![
                entry.service,
                entry.key,
                key_hash,
                serde_json::to_string(&entry.payload)?,
                entry.status.as_str(),
                entry.fetched_at,
                entry.expires_at,
                entry.api_latency_ms,
            ],
        )?;
        Ok(())
    }

    /// Delete rows expired at `now`. Returns rows removed.
    pub fn purge_expired(tx: &Transaction<'_>, now: DateTime<Utc>) -> Result<usize> {
        let purged = tx.execute(
            "DELETE FROM enrichment_cache WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
        )?;
        Ok(purged)
    }
}
