//! Shared utilities for `issue_search`.
//!
//! - Time parsing and epoch-millisecond conversion
//! - `LIKE` pattern escaping for substring filters

pub mod time;

/// Build a `%...%` containment pattern with `LIKE` metacharacters escaped.
///
/// Use with `LIKE ? ESCAPE '\'`.
#[must_use]
pub fn like_contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
