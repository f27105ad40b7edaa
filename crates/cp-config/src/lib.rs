//! Configuration values for the Cowrie Processor core.
//!
//! The core never reads configuration files itself: callers (the CLI
//! wrapper or an embedding service) construct these values and inject
//! them. This crate provides:
//! - Typed tuning structs with production defaults
//! - Semantic validation
//! - The secret-resolver seam (a reference is resolved to a string by
//!   the caller's closure; secrets never appear in config values)

pub mod policy;
pub mod settings;
pub mod validate;

pub use policy::SitePolicy;
pub use settings::{
    CacheSettings, CoreConfig, EnrichmentSettings, IngestSettings, SecretResolver, ServiceLimit,
};
pub use validate::{validate, ValidationError};
