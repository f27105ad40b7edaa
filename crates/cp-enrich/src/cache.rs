//! Three-tier read-through cache.
//!
//! | Tier | Medium                      | Scope       |
//! |------|-----------------------------|-------------|
//! | L1   | in-process LRU              | per-process |
//! | L2   | `enrichment_cache` table    | cluster     |
//! | L3   | sharded JSON files on disk  | per-host    |
//!
//! Reads go L1 → L2 → L3; a hit backfills the higher tiers. Writes go
//! through to every available tier. If the database tier fails the
//! cache degrades to L1/L3 without surfacing an error (logged once),
//! so enrichment keeps working while the store is down.

use chrono::{DateTime, Utc};
use cp_common::sha256_hex;
use cp_store::{CacheEntry, CacheRepo, Store};
use lru::LruCache;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// The tiered cache.
pub struct TieredCache {
    l1: Mutex<LruCache<(String, String), CacheEntry>>,
    l3_root: PathBuf,
    l2_degraded: AtomicBool,
}

impl TieredCache {
    pub fn new(l1_capacity: usize, l3_root: PathBuf) -> Self {
        let capacity = NonZeroUsize::new(l1_capacity.max(1)).expect("nonzero capacity");
        TieredCache {
            l1: Mutex::new(LruCache::new(capacity)),
            l3_root,
            l2_degraded: AtomicBool::new(false),
        }
    }

    /// Hash a cache key into its shard name.
    pub fn key_hash(key: &str) -> String {
        sha256_hex(key.as_bytes())
    }

    /// Read through the tiers. Expired entries are misses everywhere.
    pub fn get(
        &self,
        store: Option<&mut Store>,
        service: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        let key_hash = Self::key_hash(key);
        let l1_key = (service.to_string(), key_hash.clone());

        {
            let mut l1 = self.l1.lock().expect("l1 lock");
            if let Some(entry) = l1.get(&l1_key) {
                if entry.is_fresh(now) {
                    debug!(service, key, "L1 hit");
                    return Some(entry.clone());
                }
                l1.pop(&l1_key);
            }
        }

        if let Some(store) = store {
            if let Some(entry) = self.l2_get(store, service, &key_hash, now) {
                self.l1_put(&l1_key, &entry);
                debug!(service, key, "L2 hit");
                return Some(entry);
            }
            // Fall through to L3; on an L3 hit, backfill L2 too.
            if let Some(entry) = self.l3_get(service, &key_hash, now) {
                self.l1_put(&l1_key, &entry);
                self.l2_put(store, &key_hash, &entry);
                debug!(service, key, "L3 hit");
                return Some(entry);
            }
            return None;
        }

        // Degraded: no database available.
        if let Some(entry) = self.l3_get(service, &key_hash, now) {
            self.l1_put(&l1_key, &entry);
            debug!(service, key, "L3 hit (degraded)");
            return Some(entry);
        }
        None
    }

    /// Write through to every available tier.
    pub fn put(&self, store: Option<&mut Store>, entry: &CacheEntry) {
        let key_hash = Self::key_hash(&entry.key);
        self.l1_put(&(entry.service.clone(), key_hash.clone()), entry);
        if let Some(store) = store {
            self.l2_put(store, &key_hash, entry);
        }
        self.l3_put(&key_hash, entry);
    }

    /// Whether the database tier has been marked unavailable.
    pub fn l2_degraded(&self) -> bool {
        self.l2_degraded.load(Ordering::Relaxed)
    }

    fn l1_put(&self, key: &(String, String), entry: &CacheEntry) {
        let mut l1 = self.l1.lock().expect("l1 lock");
        l1.put(key.clone(), entry.clone());
    }

    fn l2_get(
        &self,
        store: &mut Store,
        service: &str,
        key_hash: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        match CacheRepo::get(store.conn(), service, key_hash, now) {
            Ok(Some(entry)) => {
                let _ = store.with_tx(|tx| CacheRepo::touch(tx, service, key_hash));
                Some(entry)
            }
            Ok(None) => None,
            Err(err) => {
                self.mark_degraded(&err);
                None
            }
        }
    }

    fn l2_put(&self, store: &mut Store, key_hash: &str, entry: &CacheEntry) {
        let result = store.with_tx(|tx| CacheRepo::put(tx, key_hash, entry));
        if let Err(err) = result {
            self.mark_degraded(&err);
        }
    }

    fn mark_degraded(&self, err: &cp_store::StoreError) {
        if !self.l2_degraded.swap(true, Ordering::Relaxed) {
            warn!(error = %err, "L2 cache unavailable; degrading to L1/L3");
        }
    }

    fn l3_path(&self, service: &str, key_hash: &str) -> PathBuf {
        self.l3_root
            .join(service)
            .join(&key_hash[..2])
            .join(format!("{key_hash}.json"))
    }

    fn l3_get(&self, service: &str, key_hash: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let path = self.l3_path(service, key_hash);
        let raw = fs::read_to_string(path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        entry.is_fresh(now).then_some(entry)
    }

    fn l3_put(&self, key_hash: &str, entry: &CacheEntry) {
        if let Err(err) = self.l3_put_inner(key_hash, entry) {
            warn!(service = entry.service, error = %err, "L3 write failed");
        }
    }

    fn l3_put_inner(&self, key_hash: &str, entry: &CacheEntry) -> std::io::Result<()> {
        let path = self.l3_path(&entry.service, key_hash);
        let dir = path.parent().expect("shard path has parent");
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec(entry).map_err(std::io::Error::other)?;
        // Atomic publish: a reader sees the old entry or the new one,
        // never a torn file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cp_store::{migrate, ResponseStatus};

    fn entry(service: &str, key: &str, ttl_days: Option<i64>) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            service: service.into(),
            key: key.into(),
            payload: serde_json::json!({"fields": {"country_code": "NL"}}),
            status: ResponseStatus::Success,
            fetched_at: now,
            expires_at: ttl_days.map(|d| now + Duration::days(d)),
            api_latency_ms: None,
        }
    }

    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        migrate::migrate(&mut store, "test").unwrap();
        store
    }

    #[test]
    fn test_write_through_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(16, dir.path().to_path_buf());
        let mut db = store();
        let e = entry("whois", "203.0.113.9", Some(90));

        cache.put(Some(&mut db), &e);

        // L1 serves it.
        let hit = cache.get(Some(&mut db), "whois", "203.0.113.9", Utc::now());
        assert!(hit.is_some());

        // L2 has it independently.
        let key_hash = TieredCache::key_hash("203.0.113.9");
        assert!(CacheRepo::get(db.conn(), "whois", &key_hash, Utc::now())
            .unwrap()
            .is_some());

        // L3 shard file exists at the documented layout.
        let shard = dir
            .path()
            .join("whois")
            .join(&key_hash[..2])
            .join(format!("{key_hash}.json"));
        assert!(shard.exists());
    }

    #[test]
    fn test_l3_backfills_upper_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let writer_cache = TieredCache::new(16, dir.path().to_path_buf());
        let e = entry("scanner_intel", "203.0.113.9", Some(7));
        // Written by another process: only L3 is shared.
        writer_cache.put(None, &e);

        let reader_cache = TieredCache::new(16, dir.path().to_path_buf());
        let mut db = store();
        let hit = reader_cache.get(Some(&mut db), "scanner_intel", "203.0.113.9", Utc::now());
        assert!(hit.is_some());

        // The read-through populated L2.
        let key_hash = TieredCache::key_hash("203.0.113.9");
        assert!(
            CacheRepo::get(db.conn(), "scanner_intel", &key_hash, Utc::now())
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_expired_is_miss_in_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(16, dir.path().to_path_buf());
        let mut db = store();
        let mut e = entry("whois", "203.0.113.9", None);
        e.expires_at = Some(Utc::now() - Duration::minutes(1));

        cache.put(Some(&mut db), &e);
        assert!(cache
            .get(Some(&mut db), "whois", "203.0.113.9", Utc::now())
            .is_none());
    }

    #[test]
    fn test_degrades_without_store() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(16, dir.path().to_path_buf());
        let e = entry("whois", "203.0.113.9", Some(90));

        cache.put(None, &e);
        let hit = cache.get(None, "whois", "203.0.113.9", Utc::now());
        assert!(hit.is_some());
    }

    #[test]
    fn test_l1_and_l3_agree_with_l2() {
        // Coherence: after a put, every tier returns an equivalent
        // payload (modulo timestamps).
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(16, dir.path().to_path_buf());
        let mut db = store();
        let e = entry("breach_check", "prefix", Some(60));
        cache.put(Some(&mut db), &e);

        let l1 = cache
            .get(Some(&mut db), "breach_check", "prefix", Utc::now())
            .unwrap();
        let key_hash = TieredCache::key_hash("prefix");
        let l2 = CacheRepo::get(db.conn(), "breach_check", &key_hash, Utc::now())
            .unwrap()
            .unwrap();
        let l3_raw = fs::read_to_string(
            dir.path()
                .join("breach_check")
                .join(&key_hash[..2])
                .join(format!("{key_hash}.json")),
        )
        .unwrap();
        let l3: CacheEntry = serde_json::from_str(&l3_raw).unwrap();

        assert_eq!(l1.payload, e.payload);
        assert_eq!(l2.payload, e.payload);
        assert_eq!(l3.payload, e.payload);
    }
}
