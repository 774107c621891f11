//! Search command implementation.
//!
//! Translates flags into a [`SearchRequest`], runs it against the configured
//! database and prints one page.

use crate::cli::{RangeArgs, SearchArgs};
use crate::config::{self, CliOverrides};
use crate::error::{Result, SearchError};
use crate::format::{TextFormatOptions, format_page_json, format_page_text, terminal_width};
use crate::model::IssueStatus;
use crate::search::filters::{Bound, ReleaseFilter, SearchFilters, TagFilters, parse_tag_filter};
use crate::search::paginator::Cursor;
use crate::search::rank::SortBy;
use crate::search::{SearchBackend, SearchOptions, SearchRequest};
use crate::storage::SqliteStorage;
use crate::util::time::parse_search_timestamp;
use chrono::{DateTime, Utc};
use std::io::IsTerminal;
use tracing::debug;

/// Execute the search command.
///
/// # Errors
///
/// Returns an error if a flag is malformed, the database or project does not
/// exist, or the search fails.
pub fn execute(args: &SearchArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let request = build_request(args)?;

    let config = config::load_search_config(cli)?;
    let storage = SqliteStorage::open_existing(&config.db_path, config.lock_timeout_ms)?;
    let project = storage.require_project(args.project)?;

    let backend = SearchBackend::new(&storage, SearchOptions::from(&config));
    let page = backend.search(&project, &request)?;
    debug!(
        results = page.results.len(),
        next = ?page.next.map(|c| c.to_string()),
        prev = ?page.prev.map(|c| c.to_string()),
        "page"
    );

    if json {
        println!("{}", format_page_json(&page)?);
    } else {
        let options = TextFormatOptions {
            max_width: std::io::stdout().is_terminal().then(terminal_width),
        };
        println!("{}", format_page_text(&page, options));
    }
    Ok(())
}

/// Build the library request from command-line flags.
///
/// # Errors
///
/// Returns `InvalidParameter` for malformed tags, timestamps, booleans or
/// cursors, and `InvalidStatus` for unknown statuses.
pub fn build_request(args: &SearchArgs) -> Result<SearchRequest> {
    let mut tags = TagFilters::new();
    for expr in &args.tags {
        let (key, value) = parse_tag_filter(expr)?;
        tags.insert(key, value);
    }

    let unassigned = args
        .unassigned
        .as_deref()
        .map(|raw| {
            config::parse_bool(raw).ok_or_else(|| {
                SearchError::invalid_parameter("unassigned", format!("expected a boolean, got '{raw}'"))
            })
        })
        .transpose()?;

    let ranges = &args.ranges;
    let filters = SearchFilters {
        query: args.query.clone(),
        status: args
            .status
            .as_deref()
            .map(str::parse::<IssueStatus>)
            .transpose()?,
        tags,
        bookmarked_by: args.bookmarked_by,
        assigned_to: args.assigned_to,
        unassigned,
        subscribed_by: args.subscribed_by,
        first_release: args
            .first_release
            .as_deref()
            .map(str::parse::<ReleaseFilter>)
            .transpose()?,
        environment_id: args.environment_id,
        age_from: timestamp_bound(ranges.age_from.as_deref(), ranges.age_from_exclusive, "age_from")?,
        age_to: timestamp_bound(ranges.age_to.as_deref(), ranges.age_to_exclusive, "age_to")?,
        last_seen_from: timestamp_bound(
            ranges.last_seen_from.as_deref(),
            ranges.last_seen_from_exclusive,
            "last_seen_from",
        )?,
        last_seen_to: timestamp_bound(
            ranges.last_seen_to.as_deref(),
            ranges.last_seen_to_exclusive,
            "last_seen_to",
        )?,
        date_from: timestamp_bound(ranges.date_from.as_deref(), ranges.date_from_exclusive, "date_from")?,
        date_to: timestamp_bound(ranges.date_to.as_deref(), ranges.date_to_exclusive, "date_to")?,
        active_at_from: timestamp_bound(
            ranges.active_at_from.as_deref(),
            ranges.active_at_from_exclusive,
            "active_at_from",
        )?,
        active_at_to: timestamp_bound(
            ranges.active_at_to.as_deref(),
            ranges.active_at_to_exclusive,
            "active_at_to",
        )?,
        times_seen: ranges.times_seen,
        times_seen_lower: count_bound(ranges.times_seen_lower, ranges.times_seen_lower_exclusive),
        times_seen_upper: count_bound(ranges.times_seen_upper, ranges.times_seen_upper_exclusive),
    };

    Ok(SearchRequest {
        filters,
        sort_by: args.sort.parse::<SortBy>().unwrap_or_default(),
        cursor: args.cursor.as_deref().map(str::parse::<Cursor>).transpose()?,
        limit: args.limit,
        count_hits: args.count_hits,
    })
}

fn timestamp_bound(
    raw: Option<&str>,
    exclusive: bool,
    field: &str,
) -> Result<Option<Bound<DateTime<Utc>>>> {
    raw.map(|raw| {
        parse_search_timestamp(raw, field).map(|value| Bound {
            value,
            inclusive: !exclusive,
        })
    })
    .transpose()
}

const fn count_bound(value: Option<i64>, exclusive: bool) -> Option<Bound<i64>> {
    match value {
        Some(value) => Some(Bound {
            value,
            inclusive: !exclusive,
        }),
        None => None,
    }
}
