//! Topic name and filter validation, and the topic matcher
//!
//! Key rules:
//! - Topic names MUST NOT contain wildcards (+ or #)
//! - Topic filters MAY contain wildcards
//! - Multi-level wildcard (#) must occupy the last level
//! - Single-level wildcard (+) must occupy an entire level
//! - Topics starting with $ are system topics and have special matching rules

/// Maximum encoded length of a topic name or filter
const MAX_TOPIC_LEN: usize = 65535;

/// Validate a topic name (used in PUBLISH)
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    validate_topic_name_with_max_levels(topic, 0)
}

/// Validate a topic name with configurable max levels
///
/// Topic names:
/// - Must be at least 1 character
/// - Must not exceed 65535 bytes
/// - Must not contain null character
/// - Must not contain wildcards (+ or #)
/// - Must not exceed max_topic_levels if set (0 = unlimited)
pub fn validate_topic_name_with_max_levels(
    topic: &str,
    max_topic_levels: usize,
) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Err("topic name exceeds maximum length");
    }

    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }

    if topic.contains(['+', '#']) {
        return Err("topic name cannot contain wildcards");
    }

    if max_topic_levels > 0 && topic.split('/').count() > max_topic_levels {
        return Err("topic exceeds maximum allowed levels");
    }

    Ok(())
}

/// Validate a topic filter (used in SUBSCRIBE/UNSUBSCRIBE)
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    validate_topic_filter_with_max_levels(filter, 0)
}

/// Validate a topic filter with configurable max levels
///
/// Topic filters:
/// - Must be at least 1 character
/// - Must not exceed 65535 bytes
/// - Must not contain null character
/// - Multi-level wildcard (#) must be the entire last level
/// - Single-level wildcard (+) must occupy an entire level
/// - Must not exceed max_topic_levels if set (0 = unlimited)
pub fn validate_topic_filter_with_max_levels(
    filter: &str,
    max_topic_levels: usize,
) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }

    if filter.len() > MAX_TOPIC_LEN {
        return Err("topic filter exceeds maximum length");
    }

    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let mut levels = filter.split('/').peekable();
    let mut count = 0;

    while let Some(level) = levels.next() {
        count += 1;

        if level.contains('#') {
            if level != "#" {
                return Err("multi-level wildcard must occupy entire level");
            }
            if levels.peek().is_some() {
                return Err("multi-level wildcard must be last level");
            }
        }

        if level.contains('+') && level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    if max_topic_levels > 0 && count > max_topic_levels {
        return Err("topic filter exceeds maximum allowed levels");
    }

    Ok(())
}

/// Check if a topic filter matches a topic name
///
/// Matching rules:
/// - / is the level separator
/// - + matches exactly one level (including an empty one)
/// - # matches zero or more levels (must be last), including the parent level
/// - $-topics don't match filters starting with + or #
///
/// Pure and allocation-free.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // # matches everything remaining, including nothing
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            // Both exhausted together
            (None, None) => return true,
            _ => return false,
        }
    }
}
