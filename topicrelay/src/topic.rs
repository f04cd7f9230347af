//! Topic pattern matching.
//!
//! Topics and patterns are `/`-separated segments. In a pattern:
//!
//! - `+` matches exactly one segment,
//! - `#` matches the rest of the topic, zero or more segments, and may only
//!   appear as the last segment,
//! - any other segment must equal the topic segment.

use crate::error::{Error, Result};
use crate::protocol::MAX_TOPIC_LEN;

/// Single-level wildcard.
pub const SINGLE_LEVEL: &str = "+";

/// Multi-level wildcard.
pub const MULTI_LEVEL: &str = "#";

/// Check if a subscription pattern matches a topic.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            // # swallows whatever is left, including nothing ("a/#" matches "a")
            (Some(MULTI_LEVEL), _) => return true,
            (Some(SINGLE_LEVEL), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate a subscription pattern.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let invalid = |reason| {
        Err(Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })
    };

    if pattern.is_empty() {
        return invalid("empty");
    }
    if pattern.len() > MAX_TOPIC_LEN {
        return invalid("longer than the topic field");
    }

    // Only whole segments are wildcards; "temp+1" is a literal.
    let mut segments = pattern.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segment == MULTI_LEVEL && segments.peek().is_some() {
            return invalid("'#' must be the last segment");
        }
    }
    Ok(())
}
