/// Single-segment wildcard, valid in subscription patterns only.
pub const WILDCARD_SEGMENT: char = '*';

/// Multi-segment wildcard. Only the broker's own topic exchange evaluates
/// it; in-process matching never sees it on the pattern side of a handler
/// that expects to be invoked.
pub const WILDCARD_MULTI: char = '#';

/// Compare a subscription pattern against a concrete routing key,
/// segment by segment.
///
/// Both strings are split on `.`. Two segments match when they are equal
/// or when either side is `*`. Patterns and topics with differing segment
/// counts never match: in-process matching only disambiguates among
/// patterns that already passed the broker's routing, and a prefix match
/// across different depths would invoke handlers for unrelated topics.
///
/// `#` is not evaluated here.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('.');
    let mut topic_parts = topic.split('.');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some(p), Some(t)) => {
                if p != t && p != "*" && t != "*" {
                    return false;
                }
            }
            (None, None) => return true,
            // Ragged lengths: hard mismatch.
            _ => return false,
        }
    }
}

/// True when the topic contains no wildcard characters and can be used
/// as a routing key for publishing.
pub fn topic_is_concrete(topic: &str) -> bool {
    !topic.contains(WILDCARD_SEGMENT) && !topic.contains(WILDCARD_MULTI)
}

/// Namespace of a topic: its first dot-delimited segment.
pub fn topic_namespace(topic: &str) -> &str {
    topic.split('.').next().unwrap_or(topic)
}
