//! The enrichment-source seam.
//!
//! Each external source is a value with a small capability set; the
//! cascade composes them as an ordered list. Sources never write to
//! the store themselves: they return fields, and the cascade merges
//! and persists.

use chrono::{DateTime, Duration, Utc};
use cp_store::{IpType, ResponseStatus};
use serde_json::Value;

/// Typed fields a source can contribute.
#[derive(Debug, Clone, Default)]
pub struct SourceFields {
    pub country_code: Option<String>,
    pub asn_number: Option<i64>,
    pub asn_org: Option<String>,
    /// Classification with the source's confidence (0.0..=1.0).
    pub ip_type: Option<(IpType, f64)>,
    /// The source considers this key actively malicious.
    pub flagged: bool,
    /// Breach-check prevalence, for password hashes.
    pub breach_count: Option<i64>,
}

/// One source's answer for one key.
#[derive(Debug, Clone)]
pub struct SourceResult {
    pub status: ResponseStatus,
    /// Raw-ish payload, cached verbatim across tiers.
    pub payload: Value,
    pub fields: SourceFields,
    pub latency_ms: Option<i64>,
}

impl SourceResult {
    /// A definitive "this key is not in the source's data".
    pub fn not_found() -> Self {
        SourceResult {
            status: ResponseStatus::NotFound,
            payload: Value::Null,
            fields: SourceFields::default(),
            latency_ms: None,
        }
    }
}

/// A single external enrichment source.
pub trait EnrichmentSource: Send + Sync {
    /// Service name; also the cache namespace and rate-limiter key.
    fn name(&self) -> &'static str;

    /// TTL for a cached result with the given status. `None` is
    /// infinite (offline databases, refreshed out of band).
    fn ttl(&self, status: ResponseStatus) -> Option<Duration>;

    /// Look one key up. Network errors are returned, not retried here;
    /// the cascade decides whether to skip or surface.
    fn lookup(&self, key: &str) -> crate::error::Result<SourceResult>;
}

/// Reconstruct typed fields from a cached payload.
///
/// Cache rows store the payload plus the parsed fields so tiers can be
/// rehydrated without re-running source-specific parsing.
pub fn fields_from_cache_payload(payload: &Value) -> SourceFields {
    let fields = payload.get("fields").unwrap_or(&Value::Null);
    SourceFields {
        country_code: fields
            .get("country_code")
            .and_then(Value::as_str)
            .map(String::from),
        asn_number: fields.get("asn_number").and_then(Value::as_i64),
        asn_org: fields
            .get("asn_org")
            .and_then(Value::as_str)
            .map(String::from),
        ip_type: fields.get("ip_type").and_then(Value::as_str).map(|t| {
            let confidence = fields
                .get("ip_type_confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.5);
            (IpType::parse(t), confidence)
        }),
        flagged: fields
            .get("flagged")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        breach_count: fields.get("breach_count").and_then(Value::as_i64),
    }
}

/// Build the cacheable payload for a result: the source's raw document
/// plus the parsed fields.
pub fn cache_payload(raw: &Value, fields: &SourceFields) -> Value {
    let mut fields_doc = serde_json::Map::new();
    if let Some(country) = &fields.country_code {
        fields_doc.insert("country_code".into(), Value::String(country.clone()));
    }
    if let Some(asn) = fields.asn_number {
        fields_doc.insert("asn_number".into(), serde_json::json!(asn));
    }
    if let Some(org) = &fields.asn_org {
        fields_doc.insert("asn_org".into(), Value::String(org.clone()));
    }
    if let Some((ip_type, confidence)) = &fields.ip_type {
        fields_doc.insert("ip_type".into(), Value::String(ip_type.as_str().into()));
        fields_doc.insert("ip_type_confidence".into(), serde_json::json!(confidence));
    }
    if fields.flagged {
        fields_doc.insert("flagged".into(), Value::Bool(true));
    }
    if let Some(count) = fields.breach_count {
        fields_doc.insert("breach_count".into(), serde_json::json!(count));
    }
    serde_json::json!({ "raw": raw, "fields": fields_doc })
}

/// Merged per-field aggregate with provenance, built up source by
/// source in cascade order.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub country_code: Option<String>,
    pub geo_source: Option<String>,
    pub geo_ts: Option<DateTime<Utc>>,
    pub asn_number: Option<i64>,
    pub asn_org: Option<String>,
    pub asn_source: Option<String>,
    pub asn_ts: Option<DateTime<Utc>>,
    pub ip_type: IpType,
    pub type_confidence: f64,
    pub type_source: Option<String>,
    pub type_ts: Option<DateTime<Utc>>,
    pub flagged: bool,
}

impl Aggregate {
    /// Seed from an existing inventory row so partial refreshes keep
    /// earlier facts.
    pub fn from_row(row: &cp_store::IpRow) -> Self {
        Aggregate {
            country_code: row.country_code.clone(),
            geo_source: row.geo_source.clone(),
            geo_ts: row.geo_ts,
            asn_number: row.asn_number,
            asn_org: row.asn_org.clone(),
            asn_source: row.asn_source.clone(),
            asn_ts: row.asn_ts,
            ip_type: row.ip_type,
            // Stored classifications were believed once; refreshes must
            // beat them on confidence or ranking, not by default.
            type_confidence: if row.ip_type == IpType::Unknown { 0.0 } else { 0.5 },
            type_source: row.type_source.clone(),
            type_ts: row.type_ts,
            flagged: false,
        }
    }

    /// Merge one source's fields under the cascade's priority rules.
    ///
    /// Sources are consulted in priority order, so first-wins gives
    /// geo to the offline database and ASN to offline-then-whois. The
    /// classification is the only contested field: higher confidence
    /// wins, ties break on the type ranking.
    pub fn merge(&mut self, source: &str, fields: &SourceFields, now: DateTime<Utc>) {
        if self.country_code.is_none() {
            if let Some(country) = &fields.country_code {
                self.country_code = Some(country.clone());
                self.geo_source = Some(source.to_string());
                self.geo_ts = Some(now);
            }
        }
        if self.asn_number.is_none() {
            if let Some(asn) = fields.asn_number {
                self.asn_number = Some(asn);
                self.asn_org = fields.asn_org.clone();
                self.asn_source = Some(source.to_string());
                self.asn_ts = Some(now);
            }
        }
        if let Some((ip_type, confidence)) = &fields.ip_type {
            let wins = *confidence > self.type_confidence
                || ((*confidence - self.type_confidence).abs() < f64::EPSILON
                    && *ip_type > self.ip_type);
            if wins {
                self.ip_type = *ip_type;
                self.type_confidence = *confidence;
                self.type_source = Some(source.to_string());
                self.type_ts = Some(now);
            }
        }
        if fields.flagged {
            self.flagged = true;
        }
    }

    /// Whether the fields a caller needs are all present.
    pub fn is_sufficient(&self) -> bool {
        self.country_code.is_some() && self.asn_number.is_some()
    }
}
