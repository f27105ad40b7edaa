//! Field-specific sanitization variants.
//!
//! File names and URLs captured from attacker traffic need more than
//! control-byte stripping: file names are later used to build paths
//! under an artifact directory, and URLs end up in shell-adjacent
//! tooling. Both variants stay idempotent.

use crate::control::sanitize_text;

/// Sanitize an attacker-supplied file name.
///
/// Strips forbidden control characters, path separators, and `..`
/// segments so the result can never escape an artifact directory.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = sanitize_text(name);
    let mut parts: Vec<&str> = cleaned
        .split(['/', '\\'])
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .collect();
    // Windows drive prefixes ("C:") survive the separator split.
    if let Some(first) = parts.first() {
        if first.len() == 2 && first.ends_with(':') {
            parts.remove(0);
        }
    }
    parts.join("_")
}

/// Sanitize a captured URL.
///
/// Strips forbidden control characters and all whitespace; whitespace
/// inside a URL is always injection residue, never content.
pub fn sanitize_url(url: &str) -> String {
    sanitize_text(url)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_traversal_stripped() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("a/../b"), "a_b");
    }

    #[test]
    fn test_filename_plain_unchanged() {
        assert_eq!(sanitize_filename("bot.sh"), "bot.sh");
    }

    #[test]
    fn test_filename_backslash_separators() {
        assert_eq!(sanitize_filename("C:\\temp\\..\\x.exe"), "temp_x.exe");
    }

    #[test]
    fn test_filename_controls_removed() {
        let name = format!("mal{}ware.bin", '\u{0000}');
        assert_eq!(sanitize_filename(&name), "malware.bin");
    }

    #[test]
    fn test_url_whitespace_stripped() {
        assert_eq!(
            sanitize_url("http://203.0.113.9/a b\tc\n"),
            "http://203.0.113.9/abc"
        );
    }

    #[test]
    fn test_url_idempotent() {
        let once = sanitize_url("http://h/ x");
        assert_eq!(sanitize_url(&once), once);
    }
}
