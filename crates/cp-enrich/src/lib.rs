//! Enrichment for the Cowrie Processor core.
//!
//! A single IP (or file hash) is enriched by a cascade of sources
//! consulted in a fixed order, with per-field merge priorities and
//! early termination once the inventory row is fresh. Results flow
//! through three cache tiers and every outbound call passes a
//! per-service token bucket and daily quota.
//!
//! - [`cache`] - L1 (in-process LRU), L2 (database), L3 (sharded disk)
//! - [`rate_limit`] - token buckets and UTC-midnight daily quotas
//! - [`source`] - the `EnrichmentSource` trait and field merging
//! - [`sources`] - offline geo/ASN ranges, whois fallback, HTTP intel
//! - [`cascade`] - the enricher itself
//! - [`snapshot`] - the snapshot-column backfill builder

pub mod cache;
pub mod cascade;
pub mod error;
pub mod rate_limit;
pub mod snapshot;
pub mod source;
pub mod sources;

pub use cache::TieredCache;
pub use cascade::{EnrichContext, EnrichOutcome, Enricher, RefreshReport};
pub use error::{EnrichError, Result};
pub use rate_limit::{RateLimiterSet, ServiceLimiter};
pub use snapshot::{SnapshotBuilder, SnapshotReport};
pub use source::{EnrichmentSource, SourceFields, SourceResult};
