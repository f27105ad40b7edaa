//! Unicode sanitization engine for Cowrie event payloads.
//!
//! The relational store rejects text containing C0/C1 control code
//! points, and historical data can additionally contain the *escape
//! text* form (a literal backslash, `u`, and four hex digits) left
//! behind by persist-then-recast round trips. This crate is the single
//! place both forms are defined, so the ingest path, the enrichment
//! path, and the backfill sweeper cannot drift from each other.
//!
//! # Rules
//!
//! - Remove actual code points in C0 (U+0000..=U+001F) and C1
//!   (U+007F..=U+009F), keeping horizontal tab, line feed, and carriage
//!   return.
//! - Detect (and, for stored text, remove) the JSON escape forms
//!   `\u0000`..`\u001F` and `\u007F` appearing as literal characters.
//! - Sanitization runs only on parsed values, never on partially
//!   accumulated JSON text.
//! - Field-specific variants exist for file names (also strips `..`
//!   path segments) and URLs (also strips whitespace).
//!
//! Sanitizing already-clean input returns it unchanged, and sanitizing
//! twice equals sanitizing once.

mod control;
mod fields;
mod value;

pub use control::{
    contains_forbidden, sanitize_stored_text, sanitize_text, SWEEP_CONFIRM_REGEX,
    SWEEP_LIKE_PATTERN,
};
pub use fields::{sanitize_filename, sanitize_url};
pub use value::{sanitize_value, SanitizeStats};
