//! Site policy toggles.

use serde::{Deserialize, Serialize};

/// Policy decisions that vary per deployment site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitePolicy {
    /// Store captured attacker passwords in cleartext alongside their
    /// hashes. Off by default; when off, only the SHA-256 is kept and
    /// the cleartext column stays NULL.
    pub retain_password_text: bool,

    /// Days to keep dead-letter rows that exhausted their repair
    /// attempts. `None` keeps them forever.
    pub dead_letter_retention_days: Option<u32>,

    /// Maximum repair attempts per dead-letter row before it is left
    /// for manual review.
    pub dead_letter_max_retries: u32,
}

impl Default for SitePolicy {
    fn default() -> Self {
        SitePolicy {
            retain_password_text: false,
            dead_letter_retention_days: Some(90),
            dead_letter_max_retries: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleartext_off_by_default() {
        assert!(!SitePolicy::default().retain_password_text);
    }
}
