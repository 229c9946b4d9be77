//! Subject naming.

/// Prefix shared by every activity queue.
pub const ACTIVITY_SUBJECT_PREFIX: &str = "activities";

/// Where completion and failure responses are published.
pub const RESPONSE_SUBJECT: &str = "orchestration.responses";

/// Replace characters that are not allowed in a subject token with `_`.
///
/// Letters, digits, `-` and `_` are kept; separators (`.`), wildcards
/// (`*`, `>`), whitespace and path characters are not.
pub fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Subject of the queue that carries messages for `activity_type`.
pub fn activity_subject(activity_type: &str) -> String {
    format!("{ACTIVITY_SUBJECT_PREFIX}.{}", normalize(activity_type))
}
