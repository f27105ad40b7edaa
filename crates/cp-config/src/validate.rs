//! Semantic validation of injected configuration.

use crate::settings::CoreConfig;
use thiserror::Error;

/// A configuration value the core cannot operate with.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ingest.batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("ingest.parser_workers must be at least 1")]
    ZeroParserWorkers,

    #[error("ingest.multiline_max_lines must be at least 2")]
    MultilineBoundTooSmall,

    #[error("cache.l1_capacity must be at least 1")]
    ZeroL1Capacity,

    #[error("enrich.workers must be at least 1")]
    ZeroEnrichWorkers,

    #[error("service '{service}' has a non-positive rate")]
    NonPositiveRate { service: String },

    #[error("service '{service}' has zero burst capacity")]
    ZeroBurst { service: String },
}

/// Validate a config, returning every violation rather than the first.
pub fn validate(config: &CoreConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.ingest.batch_size == 0 {
        errors.push(ValidationError::ZeroBatchSize);
    }
    if config.ingest.parser_workers == 0 {
        errors.push(ValidationError::ZeroParserWorkers);
    }
    if config.ingest.multiline_max_lines < 2 {
        errors.push(ValidationError::MultilineBoundTooSmall);
    }
    if config.cache.l1_capacity == 0 {
        errors.push(ValidationError::ZeroL1Capacity);
    }
    if config.enrich.workers == 0 {
        errors.push(ValidationError::ZeroEnrichWorkers);
    }
    for (service, limit) in &config.enrich.service_limits {
        if limit.rate_per_sec <= 0.0 {
            errors.push(ValidationError::NonPositiveRate {
                service: service.clone(),
            });
        }
        if limit.burst == 0 {
            errors.push(ValidationError::ZeroBurst {
                service: service.clone(),
            });
        }
    }

    errors
}
