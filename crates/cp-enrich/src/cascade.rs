//! The enrichment cascade.
//!
//! Per IP: check the inventory row's per-source freshness, then walk
//! the sources in order, consulting cache tiers before the wire and
//! the rate limiter before any call. Results merge under the priority
//! rules in [`crate::source::Aggregate`] and persist in one
//! transaction: ASN row first (so the FK holds), IP row second. A
//! failing source is logged and skipped; only a total failure with no
//! prior state yields the never-enriched sentinel.

use crate::cache::TieredCache;
use crate::error::{EnrichError, Result};
use crate::rate_limit::{Admission, RateLimiterSet};
use crate::source::{fields_from_cache_payload, Aggregate, EnrichmentSource};
use crate::sources::names;
use crate::sources::{
    BreachCheckSource, FileReputationSource, OfflineGeoSource, ScannerIntelSource, WhoisSource,
};
use chrono::{DateTime, Duration, Utc};
use cp_config::CoreConfig;
use cp_store::{
    CacheEntry, FileArtifactRepo, InventoryRepo, IpRow, IpType, PasswordRepo, ResponseStatus,
    SessionRepo, Store,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of enriching one key.
#[derive(Debug)]
pub enum EnrichOutcome {
    /// The inventory row was fresh; nothing was consulted.
    Fresh(IpRow),
    /// The cascade ran and the row was written.
    Enriched(IpRow),
    /// No source answered and no prior row exists.
    NeverEnriched,
}

/// Shared, thread-safe parts of the enricher: sources, cache tiers,
/// and rate limiters. One per process; workers clone the `Arc`s.
pub struct EnrichContext {
    pub cache: Arc<TieredCache>,
    pub limiters: Arc<RateLimiterSet>,
    pub ip_sources: Vec<Arc<dyn EnrichmentSource>>,
    pub file_source: Option<Arc<dyn EnrichmentSource>>,
    pub breach_source: Option<Arc<dyn EnrichmentSource>>,
    pub max_wait: std::time::Duration,
}

impl EnrichContext {
    /// Build every configured source from the injected config.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let timeout = std::time::Duration::from_secs(config.enrich.call_timeout_secs);
        let mut ip_sources: Vec<Arc<dyn EnrichmentSource>> = Vec::new();

        if let Some(path) = &config.enrich.offline_db_path {
            let offline = OfflineGeoSource::load(path)?;
            if let Some(age) = offline.age() {
                if age > std::time::Duration::from_secs(7 * 24 * 3600) {
                    warn!(
                        path = %path.display(),
                        age_days = age.as_secs() / 86_400,
                        "offline geo/ASN database is older than a week"
                    );
                }
            }
            ip_sources.push(Arc::new(offline));
        }
        ip_sources.push(Arc::new(WhoisSource::new(
            config.enrich.whois_host.clone(),
            43,
            timeout,
        )));
        if let Some(base_url) = &config.enrich.scanner_intel_url {
            ip_sources.push(Arc::new(ScannerIntelSource::new(
                base_url.clone(),
                config.service_secret(names::SCANNER_INTEL),
                timeout,
            )?));
        }

        let file_source: Option<Arc<dyn EnrichmentSource>> =
            match &config.enrich.file_reputation_url {
                Some(base_url) => Some(Arc::new(FileReputationSource::new(
                    base_url.clone(),
                    config.service_secret(names::FILE_REPUTATION),
                    timeout,
                )?)),
                None => None,
            };
        let breach_source: Option<Arc<dyn EnrichmentSource>> =
            match &config.enrich.breach_check_url {
                Some(base_url) => Some(Arc::new(BreachCheckSource::new(base_url.clone(), timeout)?)),
                None => None,
            };

        Ok(EnrichContext {
            cache: Arc::new(TieredCache::new(
                config.cache.l1_capacity,
                config.cache.l3_root.clone(),
            )),
            limiters: Arc::new(RateLimiterSet::new(&config.enrich.service_limits)),
            ip_sources,
            file_source,
            breach_source,
            max_wait: std::time::Duration::from_secs(config.enrich.rate_limit_max_wait_secs),
        })
    }
}

/// Per-source call accounting for status documents.
#[derive(Debug, Default, Clone)]
pub struct SourceCounters {
    pub calls: BTreeMap<String, u64>,
    pub failures: BTreeMap<String, u64>,
    pub skips: BTreeMap<String, u64>,
}

impl SourceCounters {
    fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
        *map.entry(key.to_string()).or_insert(0) += 1;
    }
}

/// One enrichment worker: a database connection plus the shared
/// context.
pub struct Enricher {
    store: Store,
    cache: Arc<TieredCache>,
    limiters: Arc<RateLimiterSet>,
    ip_sources: Vec<Arc<dyn EnrichmentSource>>,
    file_source: Option<Arc<dyn EnrichmentSource>>,
    breach_source: Option<Arc<dyn EnrichmentSource>>,
    max_wait: std::time::Duration,
    pub counters: SourceCounters,
}

impl Enricher {
    pub fn new(store: Store, ctx: &EnrichContext) -> Self {
        Enricher {
            store,
            cache: Arc::clone(&ctx.cache),
            limiters: Arc::clone(&ctx.limiters),
            ip_sources: ctx.ip_sources.clone(),
            file_source: ctx.file_source.clone(),
            breach_source: ctx.breach_source.clone(),
            max_wait: ctx.max_wait,
            counters: SourceCounters::default(),
        }
    }

    /// Enrich one IP.
    pub fn enrich_ip(&mut self, ip: &str, now: DateTime<Utc>) -> Result<EnrichOutcome> {
        let ip = ip.trim();
        if ip.parse::<std::net::IpAddr>().is_err() {
            return Err(EnrichError::Source {
                source_name: "cascade",
                detail: format!("not an IP address: {ip}"),
            });
        }

        let existing = InventoryRepo::get_ip(self.store.conn(), ip)?;
        if let Some(row) = &existing {
            if row_is_fresh(row, now) {
                debug!(ip, "inventory row fresh; cascade skipped");
                return Ok(EnrichOutcome::Fresh(row.clone()));
            }
        }

        let mut aggregate = existing
            .as_ref()
            .map(Aggregate::from_row)
            .unwrap_or_default();
        let mut any_answer = false;

        let sources = self.ip_sources.clone();
        for source in &sources {
            let name = source.name();

            // The whois fallback exists only to fill a missing ASN.
            if name == names::WHOIS && aggregate.asn_number.is_some() {
                continue;
            }

            if let Some(entry) = self.cache.get(Some(&mut self.store), name, ip, now) {
                if entry.status == ResponseStatus::Success {
                    let fields = fields_from_cache_payload(&entry.payload);
                    aggregate.merge(name, &fields, entry.fetched_at);
                    any_answer = true;
                }
                continue;
            }

            match self.limiters.admit(name, now, self.max_wait) {
                Admission::Admitted => {}
                Admission::QuotaExhausted => {
                    debug!(ip, source = name, "daily quota exhausted; source skipped");
                    SourceCounters::bump(&mut self.counters.skips, name);
                    continue;
                }
                Admission::DeadlineExceeded => {
                    debug!(ip, source = name, "rate-limit deadline exceeded; source skipped");
                    SourceCounters::bump(&mut self.counters.skips, name);
                    continue;
                }
            }

            SourceCounters::bump(&mut self.counters.calls, name);
            match source.lookup(ip) {
                Ok(result) => {
                    if result.status == ResponseStatus::Success {
                        aggregate.merge(name, &result.fields, now);
                        any_answer = true;
                    }
                    let entry = CacheEntry {
                        service: name.to_string(),
                        key: ip.to_string(),
                        payload: result.payload,
                        status: result.status,
                        fetched_at: now,
                        expires_at: source.ttl(result.status).map(|ttl| now + ttl),
                        api_latency_ms: result.latency_ms,
                    };
                    self.cache.put(Some(&mut self.store), &entry);
                }
                Err(err) => {
                    // One source failing never fails the cascade.
                    warn!(ip, source = name, error = %err, "enrichment source failed");
                    SourceCounters::bump(&mut self.counters.failures, name);
                }
            }
        }

        if !any_answer && existing.is_none() {
            return Ok(EnrichOutcome::NeverEnriched);
        }

        let row = self.persist_ip(ip, &aggregate, existing, now)?;
        Ok(EnrichOutcome::Enriched(row))
    }

    fn persist_ip(
        &mut self,
        ip: &str,
        aggregate: &Aggregate,
        existing: Option<IpRow>,
        now: DateTime<Utc>,
    ) -> Result<IpRow> {
        let first_seen = existing.as_ref().map(|row| row.first_seen).unwrap_or(now);
        let last_seen = existing
            .as_ref()
            .map(|row| row.last_seen.max(now))
            .unwrap_or(now);
        let row = IpRow {
            ip_address: ip.to_string(),
            country_code: aggregate.country_code.clone(),
            asn_number: aggregate.asn_number,
            asn_org: aggregate.asn_org.clone(),
            ip_type: aggregate.ip_type,
            first_seen,
            last_seen,
            enrichment_ts: Some(now),
            geo_source: aggregate.geo_source.clone(),
            geo_ts: aggregate.geo_ts,
            asn_source: aggregate.asn_source.clone(),
            asn_ts: aggregate.asn_ts,
            type_source: aggregate.type_source.clone(),
            type_ts: aggregate.type_ts,
        };

        let flagged = aggregate.flagged;
        let row_for_tx = row.clone();
        self.store.with_tx(move |tx| {
            // ASN row first, same transaction: the FK must hold and a
            // concurrent creator must not race us into a duplicate.
            if let Some(asn) = row_for_tx.asn_number {
                InventoryRepo::ensure_asn(
                    tx,
                    asn,
                    row_for_tx.asn_org.as_deref(),
                    row_for_tx.country_code.as_deref(),
                    now,
                )?;
            }
            InventoryRepo::upsert_ip(tx, &row_for_tx)?;
            if flagged {
                SessionRepo::set_dshield_flagged_by_ip(tx, &row_for_tx.ip_address)?;
            }
            Ok(())
        })?;
        Ok(row)
    }

    /// Enrich one file hash; returns the flag verdict, or `None` when
    /// the source is unavailable or was skipped.
    pub fn enrich_file(&mut self, sha256: &str, now: DateTime<Utc>) -> Result<Option<bool>> {
        let Some(source) = self.file_source.clone() else {
            return Ok(None);
        };
        let name = source.name();

        let cached = self.cache.get(Some(&mut self.store), name, sha256, now);
        let (status, payload) = match cached {
            Some(entry) => (entry.status, entry.payload),
            None => {
                match self.limiters.admit(name, now, self.max_wait) {
                    Admission::Admitted => {}
                    _ => {
                        SourceCounters::bump(&mut self.counters.skips, name);
                        return Ok(None);
                    }
                }
                SourceCounters::bump(&mut self.counters.calls, name);
                match source.lookup(sha256) {
                    Ok(result) => {
                        let entry = CacheEntry {
                            service: name.to_string(),
                            key: sha256.to_string(),
                            payload: result.payload.clone(),
                            status: result.status,
                            fetched_at: now,
                            expires_at: source.ttl(result.status).map(|ttl| now + ttl),
                            api_latency_ms: result.latency_ms,
                        };
                        self.cache.put(Some(&mut self.store), &entry);
                        (result.status, result.payload)
                    }
                    Err(err) => {
                        warn!(sha256, error = %err, "file reputation lookup failed");
                        SourceCounters::bump(&mut self.counters.failures, name);
                        return Ok(None);
                    }
                }
            }
        };

        if status != ResponseStatus::Success {
            return Ok(Some(false));
        }
        let fields = fields_from_cache_payload(&payload);
        let flagged = fields.flagged;
        let analysis = payload.get("raw").cloned().unwrap_or(serde_json::Value::Null);
        let sha = sha256.to_string();
        let sessions = FileArtifactRepo::sessions_for(self.store.conn(), &sha)?;
        self.store.with_tx(move |tx| {
            FileArtifactRepo::set_reputation(tx, &sha, &analysis, flagged)?;
            if flagged {
                for session in &sessions {
                    SessionRepo::set_vt_flagged(tx, session)?;
                }
            }
            Ok(())
        })?;
        Ok(Some(flagged))
    }

    /// Breach-check one password hash.
    pub fn check_breach(&mut self, password_hash: &str, now: DateTime<Utc>) -> Result<Option<bool>> {
        let Some(source) = self.breach_source.clone() else {
            return Ok(None);
        };
        let name = source.name();

        let cached = self.cache.get(Some(&mut self.store), name, password_hash, now);
        let (status, payload) = match cached {
            Some(entry) => (entry.status, entry.payload),
            None => {
                match self.limiters.admit(name, now, self.max_wait) {
                    Admission::Admitted => {}
                    _ => {
                        SourceCounters::bump(&mut self.counters.skips, name);
                        return Ok(None);
                    }
                }
                SourceCounters::bump(&mut self.counters.calls, name);
                match source.lookup(password_hash) {
                    Ok(result) => {
                        let entry = CacheEntry {
                            service: name.to_string(),
                            key: password_hash.to_string(),
                            payload: result.payload.clone(),
                            status: result.status,
                            fetched_at: now,
                            expires_at: source.ttl(result.status).map(|ttl| now + ttl),
                            api_latency_ms: result.latency_ms,
                        };
                        self.cache.put(Some(&mut self.store), &entry);
                        (result.status, result.payload)
                    }
                    Err(err) => {
                        warn!(error = %err, "breach check failed");
                        SourceCounters::bump(&mut self.counters.failures, name);
                        return Ok(None);
                    }
                }
            }
        };

        let breached = status == ResponseStatus::Success;
        let prevalence = fields_from_cache_payload(&payload).breach_count;
        let hash = password_hash.to_string();
        self.store.with_tx(move |tx| {
            PasswordRepo::set_breach_result(tx, &hash, breached, prevalence, now)
        })?;
        Ok(Some(breached))
    }

    /// Borrow the worker's store (health checks, listings).
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Refresh inventory rows, oldest first.
    pub fn refresh(&mut self, stale_only: bool, limit: usize) -> Result<RefreshReport> {
        let now = Utc::now();

        // Expired L2 rows are dead weight; drop them before the pass.
        let purged = self
            .store
            .with_tx(|tx| cp_store::CacheRepo::purge_expired(tx, now))?;
        if purged > 0 {
            debug!(purged, "expired cache rows purged");
        }

        let ips = if stale_only {
            // A week bounds the most volatile source TTL.
            InventoryRepo::stale_ips(self.store.conn(), now - Duration::days(7), limit)?
        } else {
            InventoryRepo::all_ips(self.store.conn(), limit)?
        };

        let mut report = RefreshReport::default();
        for ip in &ips {
            match self.enrich_ip(ip, Utc::now()) {
                Ok(EnrichOutcome::Fresh(_)) => report.fresh += 1,
                Ok(EnrichOutcome::Enriched(_)) => report.enriched += 1,
                Ok(EnrichOutcome::NeverEnriched) => report.unanswered += 1,
                Err(err) => {
                    warn!(ip, error = %err, "enrichment failed");
                    report.errored += 1;
                }
            }
        }

        // Pending file hashes and breach checks ride along.
        if self.file_source.is_some() {
            for sha256 in FileArtifactRepo::unchecked_hashes(self.store.conn(), limit)? {
                if self.enrich_file(&sha256, Utc::now())?.is_some() {
                    report.files_checked += 1;
                }
            }
        }
        if self.breach_source.is_some() {
            let stale_before = Utc::now() - Duration::days(60);
            for hash in PasswordRepo::unchecked_hashes(self.store.conn(), stale_before, limit)? {
                if self.check_breach(&hash, Utc::now())?.is_some() {
                    report.passwords_checked += 1;
                }
            }
        }

        info!(
            enriched = report.enriched,
            fresh = report.fresh,
            unanswered = report.unanswered,
            errored = report.errored,
            "enrichment refresh finished"
        );
        Ok(report)
    }
}

/// Counters from a refresh run.
#[derive(Debug, Default, Clone)]
pub struct RefreshReport {
    pub enriched: u64,
    pub fresh: u64,
    pub unanswered: u64,
    pub errored: u64,
    pub files_checked: u64,
    pub passwords_checked: u64,
}

/// Static per-service TTLs for freshness checks against provenance
/// timestamps. Mirrors each source's `ttl()` for successful results.
fn service_ttl(service: &str) -> Option<Duration> {
    match service {
        names::OFFLINE_GEO => None,
        names::WHOIS => Some(Duration::days(90)),
        names::SCANNER_INTEL => Some(Duration::days(7)),
        names::FILE_REPUTATION => Some(Duration::days(30)),
        names::BREACH_CHECK => Some(Duration::days(60)),
        _ => Some(Duration::days(7)),
    }
}

fn field_fresh(
    ts: Option<DateTime<Utc>>,
    source: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    let Some(ts) = ts else {
        return false;
    };
    match source.map(service_ttl) {
        Some(None) => true,
        Some(Some(ttl)) => now - ts < ttl,
        None => false,
    }
}

/// All required fields fresh per their source's TTL.
fn row_is_fresh(row: &IpRow, now: DateTime<Utc>) -> bool {
    row.country_code.is_some()
        && field_fresh(row.geo_ts, row.geo_source.as_deref(), now)
        && row.asn_number.is_some()
        && field_fresh(row.asn_ts, row.asn_source.as_deref(), now)
        && row.ip_type != IpType::Unknown
        && field_fresh(row.type_ts, row.type_source.as_deref(), now)
}
