//! Property tests for sanitizer invariants.
//!
//! Two properties the rest of the pipeline leans on:
//! - sanitizing already-safe input is a no-op
//! - sanitizing twice equals sanitizing once

use cp_sanitize::{contains_forbidden, sanitize_filename, sanitize_text, sanitize_url};
use proptest::prelude::*;

proptest! {
    #[test]
    fn sanitize_is_idempotent(input in "\\PC*") {
        let once = sanitize_text(&input).into_owned();
        let twice = sanitize_text(&once).into_owned();
        prop_assert_eq!(&once, &twice);
    }

    #[test]
    fn sanitized_output_has_no_raw_controls(input in prop::collection::vec(any::<char>(), 0..64)) {
        let input: String = input.into_iter().collect();
        let cleaned = sanitize_text(&input).into_owned();
        let has_raw_control = cleaned.chars().any(|c| {
            let n = c as u32;
            (n < 0x20 && c != '\t' && c != '\n' && c != '\r') || (0x7f..=0x9f).contains(&n)
        });
        prop_assert!(!has_raw_control);
    }

    #[test]
    fn safe_input_is_untouched(input in "[a-zA-Z0-9 ./:_-]*") {
        prop_assert!(!contains_forbidden(&input));
        let cleaned = sanitize_text(&input);
        prop_assert_eq!(cleaned.as_ref(), input.as_str());
    }

    #[test]
    fn filenames_keep_no_separators(input in "\\PC*") {
        let cleaned = sanitize_filename(&input);
        prop_assert!(!cleaned.contains('/'));
        prop_assert!(!cleaned.contains('\\'));
    }

    #[test]
    fn urls_never_keep_whitespace(input in "\\PC*") {
        let cleaned = sanitize_url(&input);
        prop_assert!(!cleaned.chars().any(char::is_whitespace));
    }
}
