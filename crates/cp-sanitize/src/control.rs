//! Control-character stripping and escape-form detection.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// SQL `LIKE` pre-filter fragment for the backfill sweeper.
///
/// Every forbidden escape form (`\u0000`..`\u001F`, `\u007F`) starts
/// with the four literal characters backslash-u-0-0, so one pattern
/// covers them all. The match is then confirmed with
/// [`SWEEP_CONFIRM_REGEX`] before a row is touched.
pub const SWEEP_LIKE_PATTERN: &str = "%\\u00%";

/// Confirming regex for sweep candidates: matches the literal escape
/// text forms only (raw code points cannot survive a JSON column read,
/// but the six-character text can).
pub static SWEEP_CONFIRM_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\\u00(?:[01][0-9a-f]|7f)").expect("static regex"));

// Raw code points plus escape text, for the combined detector.
static FORBIDDEN_ANY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\x00-\x08\x0b\x0c\x0e-\x1f\x7f-\x9f]|\\u00(?:[01][0-9a-f]|7f)")
        .expect("static regex")
});

/// True when the character must not reach the store.
#[inline]
fn is_forbidden_char(c: char) -> bool {
    let n = c as u32;
    (n < 0x20 && !matches!(c, '\t' | '\n' | '\r')) || (0x7f..=0x9f).contains(&n)
}

/// Detect raw forbidden code points or literal escape-text forms.
///
/// Matches both because persisted-then-re-cast text carries the escape
/// sequence as ordinary characters rather than as a code point.
pub fn contains_forbidden(text: &str) -> bool {
    FORBIDDEN_ANY.is_match(text)
}

/// Remove forbidden raw code points from parsed text.
///
/// Returns the input unchanged (borrowed) when it is already clean.
/// Escape-text forms are left alone here: inside a parsed value they
/// are legitimate content (an attacker typing `\u0000` at a shell
/// prompt is data, not corruption).
pub fn sanitize_text(text: &str) -> Cow<'_, str> {
    if !text.chars().any(is_forbidden_char) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.chars().filter(|c| !is_forbidden_char(*c)).collect())
}

/// Remove forbidden content from *stored* text: raw code points and
/// literal escape-text forms both.
///
/// This is the sweeper's rewrite primitive. Returns `None` when the
/// text is already clean so callers can skip the UPDATE.
pub fn sanitize_stored_text(text: &str) -> Option<String> {
    if !contains_forbidden(text) {
        return None;
    }
    let without_escapes = SWEEP_CONFIRM_REGEX.replace_all(text, "");
    let cleaned: String = without_escapes
        .chars()
        .filter(|c| !is_forbidden_char(*c))
        .collect();
    Some(cleaned)
}
