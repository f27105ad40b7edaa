//! Concrete enrichment sources.
//!
//! Order of consultation for IPs: the offline geo/ASN database (free,
//! authoritative for geo), whois (only when the ASN is still unknown),
//! then scanner intel (classification refinements, quota permitting).
//! File hashes consult the reputation source; password hashes the
//! breach directory.

pub mod http;
pub mod offline_geo;
pub mod whois;

pub use http::{BreachCheckSource, FileReputationSource, ScannerIntelSource};
pub use offline_geo::OfflineGeoSource;
pub use whois::WhoisSource;

/// Service name constants shared with config and cache namespaces.
pub mod names {
    pub const OFFLINE_GEO: &str = "offline_geo";
    pub const WHOIS: &str = "whois";
    pub const SCANNER_INTEL: &str = "scanner_intel";
    pub const FILE_REPUTATION: &str = "file_reputation";
    pub const BREACH_CHECK: &str = "breach_check";
}
