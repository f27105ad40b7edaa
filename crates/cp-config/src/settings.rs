//! Typed configuration values with production defaults.

use crate::policy::SitePolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Resolves a secret reference (e.g. `"env:VT_API_KEY"`) to its value.
///
/// Injected by the caller; the core never inspects the reference
/// format. Returning `None` means the secret is unavailable and the
/// consuming source must be skipped.
pub type SecretResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Tuning for the bulk and delta loaders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Events buffered before a batch flush.
    pub batch_size: usize,

    /// Seconds after which a non-empty batch flushes regardless of size.
    pub batch_flush_secs: u64,

    /// Read buffer for streaming file readers, in bytes.
    pub read_buffer_bytes: usize,

    /// Accept pretty-printed JSON spanning multiple lines.
    ///
    /// Off by default: multiline mode must be an explicit caller choice.
    pub multiline_json: bool,

    /// Line bound for one accumulated multiline object.
    pub multiline_max_lines: usize,

    /// Parser worker threads.
    pub parser_workers: usize,

    /// Bound for inter-stage channels.
    pub channel_capacity: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            batch_size: 500,
            batch_flush_secs: 5,
            read_buffer_bytes: 1024 * 1024,
            multiline_json: false,
            multiline_max_lines: 100,
            parser_workers: 4,
            channel_capacity: 64,
        }
    }
}

/// Tuning for the cache tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// L1 in-process LRU capacity (entries).
    pub l1_capacity: usize,

    /// Root directory for the L3 disk cache shards.
    pub l3_root: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            l1_capacity: 4096,
            l3_root: PathBuf::from("cache"),
        }
    }
}

/// Per-service rate and quota limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServiceLimit {
    /// Token-bucket refill rate, tokens per second.
    pub rate_per_sec: f64,

    /// Token-bucket burst capacity.
    pub burst: u32,

    /// Hard daily call cap; `None` means unlimited.
    pub daily_quota: Option<u32>,
}

/// Tuning for the enrichment cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    /// Path to the offline geo/ASN range database file.
    pub offline_db_path: Option<PathBuf>,

    /// Whois server for ASN fallback lookups.
    pub whois_host: String,

    /// Base URL for the scanner-intel API; `None` disables the source.
    pub scanner_intel_url: Option<String>,

    /// Base URL for the file-reputation API; `None` disables it.
    pub file_reputation_url: Option<String>,

    /// Base URL for the breach-directory API; `None` disables it.
    pub breach_check_url: Option<String>,

    /// Deadline for any single external call, seconds.
    pub call_timeout_secs: u64,

    /// Maximum wait for a rate-limiter token, seconds.
    pub rate_limit_max_wait_secs: u64,

    /// Worker threads for the enrichment pool.
    pub workers: usize,

    /// Per-service rate limits keyed by service name.
    pub service_limits: HashMap<String, ServiceLimit>,

    /// Secret references for services that need credentials, keyed by
    /// service name. Resolved through the injected [`SecretResolver`].
    pub secret_refs: HashMap<String, String>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        let mut service_limits = HashMap::new();
        service_limits.insert(
            "whois".to_string(),
            ServiceLimit {
                rate_per_sec: 2.0,
                burst: 4,
                daily_quota: None,
            },
        );
        service_limits.insert(
            "scanner_intel".to_string(),
            ServiceLimit {
                rate_per_sec: 1.0,
                burst: 2,
                daily_quota: Some(2000),
            },
        );
        service_limits.insert(
            "file_reputation".to_string(),
            ServiceLimit {
                rate_per_sec: 0.25,
                burst: 4,
                daily_quota: Some(500),
            },
        );
        service_limits.insert(
            "breach_check".to_string(),
            ServiceLimit {
                rate_per_sec: 1.5,
                burst: 3,
                daily_quota: None,
            },
        );

        EnrichmentSettings {
            offline_db_path: None,
            whois_host: "whois.cymru.com".to_string(),
            scanner_intel_url: None,
            file_reputation_url: None,
            breach_check_url: None,
            call_timeout_secs: 15,
            rate_limit_max_wait_secs: 30,
            workers: 4,
            service_limits,
            secret_refs: HashMap::new(),
        }
    }
}

/// The complete injected configuration for one core instance.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path of the SQLite database file.
    pub database_path: PathBuf,

    /// Directory for status documents.
    pub status_dir: PathBuf,

    /// Loader tuning.
    pub ingest: IngestSettings,

    /// Cache tuning.
    pub cache: CacheSettings,

    /// Enrichment tuning.
    pub enrich: EnrichmentSettings,

    /// Site policy toggles.
    pub policy: SitePolicy,

    /// Secret resolver injected by the caller.
    pub secret_resolver: SecretResolver,
}

impl CoreConfig {
    /// Build a config with defaults rooted at a data directory.
    ///
    /// The default secret resolver reads process environment variables
    /// for references of the form `env:NAME`; embedding callers replace
    /// it with their own.
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        CoreConfig {
            database_path: data_dir.join("cowrie.db"),
            status_dir: data_dir.join("status"),
            cache: CacheSettings {
                l3_root: data_dir.join("cache"),
                ..CacheSettings::default()
            },
            ingest: IngestSettings::default(),
            enrich: EnrichmentSettings::default(),
            policy: SitePolicy::default(),
            secret_resolver: Arc::new(|reference: &str| {
                reference
                    .strip_prefix("env:")
                    .and_then(|name| std::env::var(name).ok())
            }),
        }
    }

    /// Resolve a service's secret, if one is configured and resolvable.
    pub fn service_secret(&self, service: &str) -> Option<String> {
        let reference = self.enrich.secret_refs.get(service)?;
        (self.secret_resolver)(reference)
    }
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("status_dir", &self.status_dir)
            .field("ingest", &self.ingest)
            .field("cache", &self.cache)
            .field("enrich", &self.enrich)
            .field("policy", &self.policy)
            .field("secret_resolver", &"<injected>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let ingest = IngestSettings::default();
        assert_eq!(ingest.batch_size, 500);
        assert_eq!(ingest.batch_flush_secs, 5);
        assert!(ingest.read_buffer_bytes >= 1024 * 1024);
        assert!(!ingest.multiline_json);
        assert_eq!(ingest.multiline_max_lines, 100);
    }

    #[test]
    fn test_rooted_at_layout() {
        let config = CoreConfig::rooted_at("/var/lib/cowrie");
        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/cowrie/cowrie.db")
        );
        assert_eq!(config.cache.l3_root, PathBuf::from("/var/lib/cowrie/cache"));
    }

    #[test]
    fn test_service_secret_resolution() {
        let mut config = CoreConfig::rooted_at("/tmp/x");
        config
            .enrich
            .secret_refs
            .insert("file_reputation".into(), "vault:vt".into());
        config.secret_resolver = Arc::new(|reference: &str| {
            (reference == "vault:vt").then(|| "key-material".to_string())
        });
        assert_eq!(
            config.service_secret("file_reputation").as_deref(),
            Some("key-material")
        );
        assert_eq!(config.service_secret("whois"), None);
    }

    #[test]
    fn test_debug_never_prints_secrets() {
        let config = CoreConfig::rooted_at("/tmp/x");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("<injected>"));
    }
}
