//! Event storage operations.
//!
//! Events are only kept for event-level date narrowing: insertion when
//! seeding data and the capped window query.

use rusqlite::{Connection, params};

use crate::error::Result;
use crate::model::Event;
use crate::search::query::EventWindow;
use crate::util::time::to_millis;

/// Insert an event.
///
/// Re-inserting an `event_id` already recorded for the project is a no-op.
///
/// # Errors
///
/// Returns an error if the database insert fails.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<bool> {
    let inserted = conn.execute(
        r"
        INSERT OR IGNORE INTO events (event_id, project_id, issue_id, message, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            event.event_id,
            event.project_id,
            event.issue_id,
            event.message,
            to_millis(event.timestamp),
        ],
    )?;
    Ok(inserted > 0)
}

/// Distinct ids of issues with an event inside `window`, at most `cap`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn issue_ids_in_window(
    conn: &Connection,
    project_id: i64,
    window: &EventWindow,
    cap: usize,
) -> Result<Vec<i64>> {
    let (sql, binds) = window.to_sql(project_id, cap);
    tracing::trace!(sql = %sql, "event window query");

    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}
