//! Threat feed parser
//!
//! The feed is line-oriented text with one entry per line:
//!
//! ```text
//! # full-line comment
//! 8.8.8.8            # address with trailing comment
//! 1.2.3.0-1.2.3.255  # inclusive range
//! ```
//!
//! Malformed lines are expected in real feeds and are dropped silently.
//! Parsing never fails; a failed download is the fetcher's problem.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::model::AddressSet;

/// Largest `end - start` distance a range may span before it is rejected
pub const MAX_RANGE_SPAN: u32 = 1000;

/// One meaningful entry of a feed line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEntry {
    Address(Ipv4Addr),
    Range { start: Ipv4Addr, end: Ipv4Addr },
}

/// Counters collected while parsing, for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: usize,
    pub entries: usize,
    pub malformed: usize,
    pub oversized_ranges: usize,
}

/// Extract the entry of one line, or `None` for blanks, comments and junk
pub fn parse_line(line: &str) -> Option<FeedEntry> {
    parse_token(strip_comment(line))
}

/// Line content before any `#` comment, trimmed
fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("").trim()
}

fn parse_token(token: &str) -> Option<FeedEntry> {
    if token.is_empty() {
        return None;
    }

    if token.contains('-') {
        let mut ends = token.split('-');
        let (Some(start), Some(end), None) = (ends.next(), ends.next(), ends.next()) else {
            return None;
        };
        let start = Ipv4Addr::from_str(start.trim()).ok()?;
        let end = Ipv4Addr::from_str(end.trim()).ok()?;
        return Some(FeedEntry::Range { start, end });
    }

    Ipv4Addr::from_str(token).ok().map(FeedEntry::Address)
}

/// Expand an inclusive range into its addresses
///
/// Returns `None` when the range is reversed or spans more than
/// [`MAX_RANGE_SPAN`].
pub fn expand_range(start: Ipv4Addr, end: Ipv4Addr) -> Option<Vec<Ipv4Addr>> {
    let (start, end) = (u32::from(start), u32::from(end));
    if end < start || end - start > MAX_RANGE_SPAN {
        return None;
    }
    Some((start..=end).map(Ipv4Addr::from).collect())
}

/// Parse a whole feed into a deduplicated address set
pub fn parse_feed(text: &str) -> AddressSet {
    parse_feed_with_stats(text).0
}

/// Parse a whole feed, also returning parse counters
pub fn parse_feed_with_stats(text: &str) -> (AddressSet, ParseStats) {
    let mut set = AddressSet::new();
    let mut stats = ParseStats::default();

    for line in text.lines() {
        stats.lines += 1;

        let token = strip_comment(line);
        if token.is_empty() {
            continue;
        }

        match parse_token(token) {
            Some(FeedEntry::Address(addr)) => {
                stats.entries += 1;
                set.insert(addr);
            }
            Some(FeedEntry::Range { start, end }) => match expand_range(start, end) {
                Some(addrs) => {
                    stats.entries += 1;
                    for addr in addrs {
                        set.insert(addr);
                    }
                }
                None if u32::from(end) >= u32::from(start) => {
                    stats.oversized_ranges += 1;
                    tracing::warn!("IP range too large, not expanded: {} - {}", start, end);
                }
                None => stats.malformed += 1,
            },
            None => stats.malformed += 1,
        }
    }

    tracing::debug!(
        "Parsed feed: {} lines, {} entries, {} unique addresses, {} malformed, {} oversized ranges",
        stats.lines,
        stats.entries,
        set.len(),
        stats.malformed,
        stats.oversized_ranges
    );

    (set, stats)
}
