//! HTTP enrichment sources: scanner intel, breach directory, file
//! reputation.
//!
//! Response parsing is split into pure functions so the wire handling
//! stays thin and the parsers stay testable without a network. Every
//! client carries a per-call timeout; callers go through the rate
//! limiter before any of these run.

use crate::error::{EnrichError, Result};
use crate::source::{cache_payload, EnrichmentSource, SourceFields, SourceResult};
use chrono::Duration;
use cp_store::{IpType, ResponseStatus};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Instant;

fn build_client(timeout: std::time::Duration, source: &'static str) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent("cowrie-processor/0.1")
        .build()
        .map_err(|err| EnrichError::Source {
            source_name: source,
            detail: err.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Scanner intel
// ---------------------------------------------------------------------------

/// Scanner-intelligence classification source.
///
/// Fills `ip_type` refinements and the malicious flag; never
/// contributes geo, so it can never override the offline database.
pub struct ScannerIntelSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ScannerIntelSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        Ok(ScannerIntelSource {
            client: build_client(timeout, super::names::SCANNER_INTEL)?,
            base_url: base_url.into(),
            api_key,
        })
    }
}

/// Map a scanner-intel document to fields.
pub fn parse_scanner_intel(doc: &Value) -> SourceFields {
    let classification = doc
        .get("classification")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let category = doc
        .get("metadata")
        .and_then(|m| m.get("category"))
        .or_else(|| doc.get("category"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let ip_type = match category {
        "tor" => Some((IpType::Tor, 0.95)),
        "vpn" => Some((IpType::Vpn, 0.9)),
        "proxy" => Some((IpType::Proxy, 0.85)),
        "cloud" | "hosting" => Some((IpType::Cloud, 0.8)),
        "business" | "datacenter" => Some((IpType::Datacenter, 0.7)),
        "isp" | "mobile" => Some((IpType::Residential, 0.6)),
        _ => None,
    };

    SourceFields {
        ip_type,
        flagged: classification == "malicious",
        ..SourceFields::default()
    }
}

impl EnrichmentSource for ScannerIntelSource {
    fn name(&self) -> &'static str {
        super::names::SCANNER_INTEL
    }

    fn ttl(&self, _status: ResponseStatus) -> Option<Duration> {
        Some(Duration::days(7))
    }

    fn lookup(&self, key: &str) -> Result<SourceResult> {
        let url = format!("{}/api/ip/{key}", self.base_url.trim_end_matches('/'));
        let started = Instant::now();
        let mut request = self.client.get(&url);
        if let Some(api_key) = &self.api_key {
            request = request.header("key", api_key);
        }
        let response = request.send().map_err(|err| EnrichError::Source {
            source_name: self.name(),
            detail: err.to_string(),
        })?;
        let latency_ms = started.elapsed().as_millis() as i64;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(SourceResult::not_found());
        }
        if !response.status().is_success() {
            return Err(EnrichError::Source {
                source_name: self.name(),
                detail: format!("HTTP {}", response.status()),
            });
        }
        let doc: Value = response.json().map_err(|err| EnrichError::Source {
            source_name: self.name(),
            detail: err.to_string(),
        })?;
        let fields = parse_scanner_intel(&doc);
        Ok(SourceResult {
            status: ResponseStatus::Success,
            payload: cache_payload(&doc, &fields),
            fields,
            latency_ms: Some(latency_ms),
        })
    }
}

// ---------------------------------------------------------------------------
// Breach directory (k-anonymity range queries)
// ---------------------------------------------------------------------------

/// Breach-directory source for password hashes.
///
/// Only the first five hex characters of the hash ever leave the
/// process; the response is the suffix list for that prefix.
pub struct BreachCheckSource {
    client: Client,
    base_url: String,
}

impl BreachCheckSource {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        Ok(BreachCheckSource {
            client: build_client(timeout, super::names::BREACH_CHECK)?,
            base_url: base_url.into(),
        })
    }
}

/// Find a hash suffix in a range response (`SUFFIX:COUNT` per line).
pub fn parse_range_response(body: &str, suffix: &str) -> Option<i64> {
    let suffix = suffix.to_ascii_uppercase();
    for line in body.lines() {
        let mut parts = line.trim().splitn(2, ':');
        let line_suffix = parts.next()?.trim();
        if line_suffix.eq_ignore_ascii_case(&suffix) {
            return parts.next().and_then(|count| count.trim().parse().ok());
        }
    }
    None
}

impl EnrichmentSource for BreachCheckSource {
    fn name(&self) -> &'static str {
        super::names::BREACH_CHECK
    }

    fn ttl(&self, _status: ResponseStatus) -> Option<Duration> {
        Some(Duration::days(60))
    }

    fn lookup(&self, key: &str) -> Result<SourceResult> {
        if key.len() < 6 {
            return Err(EnrichError::Source {
                source_name: self.name(),
                detail: "hash too short for a range query".into(),
            });
        }
        let (prefix, suffix) = key.split_at(5);
        let url = format!(
            "{}/range/{}",
            self.base_url.trim_end_matches('/'),
            prefix.to_ascii_uppercase()
        );
        let started = Instant::now();
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| EnrichError::Source {
                source_name: self.name(),
                detail: err.to_string(),
            })?;
        let latency_ms = started.elapsed().as_millis() as i64;

        if !response.status().is_success() {
            return Err(EnrichError::Source {
                source_name: self.name(),
                detail: format!("HTTP {}", response.status()),
            });
        }
        let body = response.text().map_err(|err| EnrichError::Source {
            source_name: self.name(),
            detail: err.to_string(),
        })?;

        match parse_range_response(&body, suffix) {
            Some(count) => {
                let fields = SourceFields {
                    breach_count: Some(count),
                    flagged: true,
                    ..SourceFields::default()
                };
                Ok(SourceResult {
                    status: ResponseStatus::Success,
                    payload: cache_payload(&serde_json::json!({"count": count}), &fields),
                    fields,
                    latency_ms: Some(latency_ms),
                })
            }
            None => Ok(SourceResult::not_found()),
        }
    }
}

// ---------------------------------------------------------------------------
// File reputation
// ---------------------------------------------------------------------------

/// File-hash reputation source.
pub struct FileReputationSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl FileReputationSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        Ok(FileReputationSource {
            client: build_client(timeout, super::names::FILE_REPUTATION)?,
            base_url: base_url.into(),
            api_key,
        })
    }
}

/// Detections at or above this count flag the artifact.
const FLAG_THRESHOLD: i64 = 3;

/// Map an analysis document to fields.
pub fn parse_file_reputation(doc: &Value) -> (SourceFields, i64) {
    let stats = doc
        .pointer("/data/attributes/last_analysis_stats")
        .or_else(|| doc.get("last_analysis_stats"))
        .cloned()
        .unwrap_or(Value::Null);
    let malicious = stats.get("malicious").and_then(Value::as_i64).unwrap_or(0);
    (
        SourceFields {
            flagged: malicious >= FLAG_THRESHOLD,
            ..SourceFields::default()
        },
        malicious,
    )
}

impl EnrichmentSource for FileReputationSource {
    fn name(&self) -> &'static str {
        super::names::FILE_REPUTATION
    }

    fn ttl(&self, status: ResponseStatus) -> Option<Duration> {
        match status {
            // Unknown hashes get re-checked soon: the sample may simply
            // not have been analyzed yet.
            ResponseStatus::NotFound => Some(Duration::hours(12)),
            _ => Some(Duration::days(30)),
        }
    }

    fn lookup(&self, key: &str) -> Result<SourceResult> {
        let url = format!("{}/api/v3/files/{key}", self.base_url.trim_end_matches('/'));
        let started = Instant::now();
        let mut request = self.client.get(&url);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-apikey", api_key);
        }
        let response = request.send().map_err(|err| EnrichError::Source {
            source_name: self.name(),
            detail: err.to_string(),
        })?;
        let latency_ms = started.elapsed().as_millis() as i64;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(SourceResult::not_found());
        }
        if !response.status().is_success() {
            return Err(EnrichError::Source {
                source_name: self.name(),
                detail: format!("HTTP {}", response.status()),
            });
        }
        let doc: Value = response.json().map_err(|err| EnrichError::Source {
            source_name: self.name(),
            detail: err.to_string(),
        })?;
        let (fields, malicious) = parse_file_reputation(&doc);
        let payload = cache_payload(
            &serde_json::json!({"malicious": malicious, "doc": doc}),
            &fields,
        );
        Ok(SourceResult {
            status: ResponseStatus::Success,
            payload,
            fields,
            latency_ms: Some(latency_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scanner_malicious_tor() {
        let doc = serde_json::json!({
            "classification": "malicious",
            "metadata": {"category": "tor"}
        });
        let fields = parse_scanner_intel(&doc);
        assert!(fields.flagged);
        assert_eq!(fields.ip_type, Some((IpType::Tor, 0.95)));
    }

    #[test]
    fn test_parse_scanner_benign_cloud() {
        let doc = serde_json::json!({
            "classification": "benign",
            "metadata": {"category": "hosting"}
        });
        let fields = parse_scanner_intel(&doc);
        assert!(!fields.flagged);
        assert_eq!(fields.ip_type, Some((IpType::Cloud, 0.8)));
    }

    #[test]
    fn test_parse_scanner_unknown_category() {
        let doc = serde_json::json!({"classification": "unknown"});
        let fields = parse_scanner_intel(&doc);
        assert_eq!(fields.ip_type, None);
        assert!(!fields.flagged);
    }

    #[test]
    fn test_parse_range_hit_case_insensitive() {
        let body = "0018A45C4D1DEF81644B54AB7F969B88D65:3\n\
                    00D4F6E8FA6EECAD2A3AA415EEC418D38EC:24230\n";
        assert_eq!(
            parse_range_response(body, "00d4f6e8fa6eecad2a3aa415eec418d38ec"),
            Some(24230)
        );
    }

    #[test]
    fn test_parse_range_miss() {
        let body = "0018A45C4D1DEF81644B54AB7F969B88D65:3\n";
        assert_eq!(parse_range_response(body, "FFFF0"), None);
    }

    #[test]
    fn test_parse_file_reputation_flags_at_threshold() {
        let doc = serde_json::json!({
            "data": {"attributes": {"last_analysis_stats": {"malicious": 3, "harmless": 60}}}
        });
        let (fields, malicious) = parse_file_reputation(&doc);
        assert!(fields.flagged);
        assert_eq!(malicious, 3);
    }

    #[test]
    fn test_parse_file_reputation_below_threshold() {
        let doc = serde_json::json!({
            "data": {"attributes": {"last_analysis_stats": {"malicious": 1}}}
        });
        let (fields, _) = parse_file_reputation(&doc);
        assert!(!fields.flagged);
    }

    #[test]
    fn test_not_found_ttl_is_short() {
        let source = FileReputationSource::new(
            "https://reputation.invalid",
            None,
            std::time::Duration::from_secs(15),
        )
        .unwrap();
        assert_eq!(
            source.ttl(ResponseStatus::NotFound),
            Some(Duration::hours(12))
        );
        assert_eq!(
            source.ttl(ResponseStatus::Success),
            Some(Duration::days(30))
        );
    }
}
