//! Accumulating parser for pretty-printed JSON.
//!
//! Lines are buffered untouched (sanitizing partial tokens would
//! corrupt them) and a parse is attempted after each append. A buffer
//! that parses as an object and validates as a Cowrie event is
//! yielded; a parseable object that fails validation can never become
//! valid by adding lines, so it is rejected immediately. A buffer
//! exceeding the line bound is rejected wholesale and the accumulator
//! resets.

use cp_common::CowrieEvent;
use serde_json::Value;
use std::io::BufRead;

/// One outcome from the accumulator.
#[derive(Debug)]
pub enum MultilineItem {
    /// A validated event, with the byte offset its first line started
    /// at (in the decompressed stream).
    Event { start_offset: u64, value: Value },
    /// A block that cannot become a valid event: over the line bound,
    /// or parseable but invalid.
    Rejected {
        start_offset: u64,
        raw: String,
        reason: RejectReason,
    },
}

/// Why a block was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Line bound exceeded without a successful parse.
    Unparseable,
    /// Parsed fine but failed event validation.
    Invalid,
}

/// Accumulating multiline parser over any buffered reader.
pub struct MultilineParser<R: BufRead> {
    reader: R,
    max_lines: usize,
    /// Byte offset of the next line to be read.
    offset: u64,
    /// Offset where the current accumulation started.
    block_start: u64,
    buffer: String,
    buffered_lines: usize,
    eof: bool,
}

impl<R: BufRead> MultilineParser<R> {
    pub fn new(reader: R, max_lines: usize) -> Self {
        MultilineParser {
            reader,
            max_lines: max_lines.max(2),
            offset: 0,
            block_start: 0,
            buffer: String::new(),
            buffered_lines: 0,
            eof: false,
        }
    }

    /// Byte offset of the next unread line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn take_block(&mut self, reason: RejectReason) -> MultilineItem {
        let raw = std::mem::take(&mut self.buffer);
        let start_offset = self.block_start;
        self.buffered_lines = 0;
        MultilineItem::Rejected {
            start_offset,
            raw,
            reason,
        }
    }
}

impl<R: BufRead> Iterator for MultilineParser<R> {
    type Item = std::io::Result<MultilineItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.eof {
                if self.buffer.trim().is_empty() {
                    return None;
                }
                return Some(Ok(self.take_block(RejectReason::Unparseable)));
            }

            let mut line = String::new();
            let n = match self.reader.read_line(&mut line) {
                Ok(n) => n,
                Err(err) => return Some(Err(err)),
            };
            if n == 0 {
                self.eof = true;
                continue;
            }
            let line_offset = self.offset;
            self.offset += n as u64;

            if line.trim().is_empty() {
                continue;
            }
            if self.buffer.is_empty() {
                self.block_start = line_offset;
            }
            self.buffer.push_str(&line);
            self.buffered_lines += 1;

            if let Ok(value) = serde_json::from_str::<Value>(&self.buffer) {
                let outcome = CowrieEvent::validate(&value);
                self.buffer.clear();
                self.buffered_lines = 0;
                if outcome.valid {
                    return Some(Ok(MultilineItem::Event {
                        start_offset: self.block_start,
                        value,
                    }));
                }
                return Some(Ok(MultilineItem::Rejected {
                    start_offset: self.block_start,
                    raw: value.to_string(),
                    reason: RejectReason::Invalid,
                }));
            }

            if self.buffered_lines >= self.max_lines {
                return Some(Ok(self.take_block(RejectReason::Unparseable)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pretty(session: &str) -> String {
        serde_json::to_string_pretty(&serde_json::json!({
            "eventid": "cowrie.session.connect",
            "timestamp": "2026-07-30T12:00:00Z",
            "session": session,
            "src_ip": "203.0.113.9"
        }))
        .unwrap()
    }

    fn collect(input: String, max_lines: usize) -> Vec<MultilineItem> {
        MultilineParser::new(Cursor::new(input), max_lines)
            .map(|item| item.unwrap())
            .collect()
    }

    #[test]
    fn test_two_pretty_events() {
        let input = format!("{}\n{}\n", pretty("a1"), pretty("a1"));
        let items = collect(input, 100);
        assert_eq!(items.len(), 2);
        for item in &items {
            assert!(matches!(item, MultilineItem::Event { .. }));
        }
        // Offsets are distinct and ordered.
        let offsets: Vec<u64> = items
            .iter()
            .map(|item| match item {
                MultilineItem::Event { start_offset, .. } => *start_offset,
                MultilineItem::Rejected { start_offset, .. } => *start_offset,
            })
            .collect();
        assert!(offsets[0] < offsets[1]);
    }

    #[test]
    fn test_single_line_events_pass_through() {
        let input = concat!(
            r#"{"eventid":"cowrie.session.connect","timestamp":"2026-07-30T12:00:00Z","session":"s1","src_ip":"203.0.113.9"}"#,
            "\n",
            r#"{"eventid":"cowrie.session.closed","timestamp":"2026-07-30T12:01:00Z","session":"s1"}"#,
            "\n"
        )
        .to_string();
        let items = collect(input, 100);
        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .all(|item| matches!(item, MultilineItem::Event { .. })));
    }

    #[test]
    fn test_line_bound_flushes_block() {
        let mut input = String::from("{\n");
        for i in 0..150 {
            input.push_str(&format!("  \"k{i}\": \"v\",\n"));
        }
        // Never closed; bound must trip first.
        let items = collect(input, 100);
        assert_eq!(items.len(), 1);
        match &items[0] {
            MultilineItem::Rejected { reason, raw, .. } => {
                assert_eq!(*reason, RejectReason::Unparseable);
                assert!(raw.lines().count() >= 100);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_parseable_but_invalid_rejected_immediately() {
        let input = "{\"eventid\": \"not-cowrie\", \"timestamp\": \"2026-07-30T12:00:00Z\"}\n"
            .to_string();
        let items = collect(input, 100);
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            MultilineItem::Rejected {
                reason: RejectReason::Invalid,
                ..
            }
        ));
    }

    #[test]
    fn test_trailing_garbage_flushed_at_eof() {
        let input = format!("{}\n{{ \"unclosed\": 1\n", pretty("a1"));
        let items = collect(input, 100);
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], MultilineItem::Event { .. }));
        assert!(matches!(
            items[1],
            MultilineItem::Rejected {
                reason: RejectReason::Unparseable,
                ..
            }
        ));
    }

    #[test]
    fn test_blank_lines_between_events_skipped() {
        let input = format!("{}\n\n\n{}\n", pretty("a1"), pretty("a2"));
        let items = collect(input, 100);
        assert_eq!(items.len(), 2);
    }
}
