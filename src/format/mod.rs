//! Output formatting for `isearch`.
//!
//! Text output is one line per issue followed by a paging footer. JSON output
//! is the serialized [`Page`] itself, so `next`/`prev` cursors can be fed
//! straight back into `--cursor`.

use crate::error::Result;
use crate::model::{Issue, IssueStatus};
use crate::search::paginator::Page;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Formatting options for text output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatOptions {
    pub max_width: Option<usize>,
}

/// Determine terminal width from environment (falls back to 80).
#[must_use]
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|columns| columns.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(80)
}

/// Truncate `text` to fit within `max_len` visible columns.
///
/// Handles wide characters (emojis, CJK) correctly using `unicode-width`.
#[must_use]
pub fn truncate_message(text: &str, max_len: usize) -> String {
    if UnicodeWidthStr::width(text) <= max_len {
        return text.to_string();
    }
    if max_len <= 3 {
        return take_columns(text, max_len);
    }
    let mut out = take_columns(text, max_len - 3);
    out.push_str("...");
    out
}

fn take_columns(text: &str, columns: usize) -> String {
    let mut width = 0;
    let mut out = String::new();
    for c in text.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw > columns {
            break;
        }
        width += cw;
        out.push(c);
    }
    out
}

/// Short status badge.
#[must_use]
pub const fn format_status_badge(status: IssueStatus) -> &'static str {
    match status {
        IssueStatus::Unresolved => "[open]",
        IssueStatus::Resolved => "[resolved]",
        IssueStatus::Ignored => "[ignored]",
        IssueStatus::PendingDeletion | IssueStatus::DeletionInProgress => "[deleting]",
        IssueStatus::PendingMerge => "[merging]",
    }
}

/// Format a single-line issue summary.
///
/// Format: `{id} {status} {times_seen}x {last_seen} {message}`
#[must_use]
pub fn format_issue_line(issue: &Issue, options: TextFormatOptions) -> String {
    let prefix = format!(
        "{:>6} {:<10} {:>6}x {} ",
        issue.id,
        format_status_badge(issue.status),
        issue.times_seen,
        issue.last_seen.format("%Y-%m-%d %H:%M"),
    );

    let mut message = issue.message.clone();
    if let Some(culprit) = issue.culprit.as_deref().filter(|c| !c.is_empty()) {
        message.push_str(" (");
        message.push_str(culprit);
        message.push(')');
    }
    let message = options.max_width.map_or_else(
        || message.clone(),
        |width| truncate_message(&message, width.saturating_sub(UnicodeWidthStr::width(prefix.as_str()))),
    );

    format!("{prefix}{message}")
}

/// Paging footer: result count, hits, and cursors for the adjacent pages.
#[must_use]
pub fn format_page_footer<T>(page: &Page<T>) -> String {
    let mut footer = format!("{} issue(s)", page.results.len());
    if let Some(hits) = page.hits {
        footer.push_str(&format!(" of {hits}"));
    }
    if let Some(next) = page.next {
        footer.push_str(&format!("\nnext: --cursor {next}"));
    }
    if let Some(prev) = page.prev {
        footer.push_str(&format!("\nprev: --cursor {prev}"));
    }
    footer
}

/// Render a page as text.
#[must_use]
pub fn format_page_text(page: &Page<Issue>, options: TextFormatOptions) -> String {
    if page.results.is_empty() {
        if page.hits.is_none() && page.next.is_none() && page.prev.is_none() {
            return "No issues found.".to_string();
        }
        return format!("No issues found.\n{}", format_page_footer(page));
    }
    let mut out: Vec<String> = page
        .results
        .iter()
        .map(|issue| format_issue_line(issue, options))
        .collect();
    out.push(format_page_footer(page));
    out.join("\n")
}

/// Render a page as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn format_page_json(page: &Page<Issue>) -> Result<String> {
    Ok(serde_json::to_string_pretty(page)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::paginator::{Cursor, Hits};
    use chrono::{TimeZone, Utc};

    fn make_issue(message: &str) -> Issue {
        let seen = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        Issue {
            id: 42,
            project_id: 1,
            status: IssueStatus::Unresolved,
            message: message.to_string(),
            culprit: Some("app.views.index".to_string()),
            first_seen: seen,
            last_seen: seen,
            active_at: None,
            times_seen: 12,
            first_release_id: None,
        }
    }

    #[test]
    fn test_truncate_message_ascii() {
        assert_eq!(truncate_message("hello world", 20), "hello world");
        assert_eq!(truncate_message("hello world", 8), "hello...");
        assert_eq!(truncate_message("hello", 2), "he");
    }

    #[test]
    fn test_truncate_message_wide_chars() {
        // Each CJK character is two columns wide.
        let truncated = truncate_message("错误错误错误", 7);
        assert_eq!(truncated, "错误...");
        assert!(UnicodeWidthStr::width(truncated.as_str()) <= 7);
    }

    #[test]
    fn test_issue_line_contains_fields() {
        let line = format_issue_line(&make_issue("KeyError: 'user'"), TextFormatOptions::default());
        assert!(line.contains("42"));
        assert!(line.contains("[open]"));
        assert!(line.contains("12x"));
        assert!(line.contains("2025-03-01 12:30"));
        assert!(line.ends_with("KeyError: 'user' (app.views.index)"));
    }

    #[test]
    fn test_issue_line_respects_width() {
        let options = TextFormatOptions {
            max_width: Some(50),
        };
        let line = format_issue_line(&make_issue(&"x".repeat(200)), options);
        assert!(UnicodeWidthStr::width(line.as_str()) <= 50);
        assert!(line.ends_with("..."));
    }

    #[test]
    fn test_footer_lists_cursors_and_hits() {
        let page = Page {
            results: vec![make_issue("a")],
            next: Some(Cursor::new(100, 42, false)),
            prev: Some(Cursor::new(200, 43, true)),
            hits: Some(Hits::AtLeast(1000)),
        };
        let footer = format_page_footer(&page);
        assert!(footer.starts_with("1 issue(s) of 1000+"));
        assert!(footer.contains("next: --cursor 100:42:0"));
        assert!(footer.contains("prev: --cursor 200:43:1"));
    }

    #[test]
    fn test_empty_page_text() {
        let page: Page<Issue> = Page::empty(None);
        assert_eq!(format_page_text(&page, TextFormatOptions::default()), "No issues found.");
    }

    #[test]
    fn test_empty_page_text_keeps_footer() {
        let page: Page<Issue> = Page {
            results: Vec::new(),
            next: None,
            prev: Some(Cursor::new(7, 3, true)),
            hits: Some(Hits::Exact(12)),
        };
        let text = format_page_text(&page, TextFormatOptions::default());
        assert!(text.starts_with("No issues found.\n0 issue(s) of 12"));
        assert!(text.contains("prev: --cursor 7:3:1"));
    }

    #[test]
    fn test_page_json_has_cursor_strings() {
        let page = Page {
            results: vec![make_issue("a")],
            next: Some(Cursor::new(5, 42, false)),
            prev: None,
            hits: None,
        };
        let json: serde_json::Value = serde_json::from_str(&format_page_json(&page).unwrap()).unwrap();
        assert_eq!(json["next"], "5:42:0");
        assert!(json["prev"].is_null());
        assert_eq!(json["results"][0]["id"], 42);
        assert!(json.get("hits").is_none());
    }
}
