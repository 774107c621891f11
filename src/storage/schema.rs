//! Database schema definitions and migration logic.

use rusqlite::{Connection, Result};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the search database.
///
/// Timestamps are INTEGER epoch milliseconds.
pub const SCHEMA_SQL: &str = r"
    -- Projects
    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY,
        organization_id INTEGER NOT NULL,
        slug TEXT NOT NULL
    );

    -- Releases (organization scoped)
    CREATE TABLE IF NOT EXISTS releases (
        id INTEGER PRIMARY KEY,
        organization_id INTEGER NOT NULL,
        version TEXT NOT NULL,
        UNIQUE (organization_id, version)
    );

    -- Environments (project scoped)
    CREATE TABLE IF NOT EXISTS environments (
        id INTEGER PRIMARY KEY,
        project_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        UNIQUE (project_id, name),
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
    );

    -- Issues
    CREATE TABLE IF NOT EXISTS issues (
        id INTEGER PRIMARY KEY,
        project_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        message TEXT NOT NULL DEFAULT '',
        culprit TEXT,
        first_seen INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        active_at INTEGER,
        times_seen INTEGER NOT NULL DEFAULT 1,
        first_release_id INTEGER,
        CHECK (times_seen >= 0),
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
        FOREIGN KEY (first_release_id) REFERENCES releases(id) ON DELETE SET NULL
    );

    CREATE INDEX IF NOT EXISTS idx_issues_project_status ON issues(project_id, status);
    CREATE INDEX IF NOT EXISTS idx_issues_project_last_seen ON issues(project_id, last_seen);
    CREATE INDEX IF NOT EXISTS idx_issues_project_first_seen ON issues(project_id, first_seen);
    CREATE INDEX IF NOT EXISTS idx_issues_project_times_seen ON issues(project_id, times_seen);
    CREATE INDEX IF NOT EXISTS idx_issues_active_at ON issues(active_at);
    CREATE INDEX IF NOT EXISTS idx_issues_first_release ON issues(first_release_id);

    -- Per-environment issue records
    CREATE TABLE IF NOT EXISTS issue_environments (
        issue_id INTEGER NOT NULL,
        environment_id INTEGER NOT NULL,
        first_release_id INTEGER,
        PRIMARY KEY (issue_id, environment_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE,
        FOREIGN KEY (environment_id) REFERENCES environments(id) ON DELETE CASCADE,
        FOREIGN KEY (first_release_id) REFERENCES releases(id) ON DELETE SET NULL
    );
    CREATE INDEX IF NOT EXISTS idx_issue_environments_environment ON issue_environments(environment_id);

    -- Events (only what event-level narrowing needs)
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL,
        project_id INTEGER NOT NULL,
        issue_id INTEGER NOT NULL,
        message TEXT NOT NULL DEFAULT '',
        timestamp INTEGER NOT NULL,
        UNIQUE (project_id, event_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_events_project_timestamp ON events(project_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_events_issue_id ON events(issue_id);

    -- Membership records
    CREATE TABLE IF NOT EXISTS bookmarks (
        issue_id INTEGER NOT NULL,
        project_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        PRIMARY KEY (issue_id, user_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_bookmarks_project_user ON bookmarks(project_id, user_id);

    CREATE TABLE IF NOT EXISTS assignments (
        issue_id INTEGER PRIMARY KEY,
        project_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_assignments_project_user ON assignments(project_id, user_id);

    CREATE TABLE IF NOT EXISTS subscriptions (
        issue_id INTEGER NOT NULL,
        project_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (issue_id, user_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_subscriptions_project_user ON subscriptions(project_id, user_id);

    -- Tag store: per-issue tag values and keys
    CREATE TABLE IF NOT EXISTS tag_values (
        project_id INTEGER NOT NULL,
        issue_id INTEGER NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        times_seen INTEGER NOT NULL DEFAULT 0,
        first_seen INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        PRIMARY KEY (project_id, issue_id, key, value)
    );
    CREATE INDEX IF NOT EXISTS idx_tag_values_lookup ON tag_values(project_id, key, value);

    CREATE TABLE IF NOT EXISTS tag_keys (
        project_id INTEGER NOT NULL,
        issue_id INTEGER NOT NULL,
        key TEXT NOT NULL,
        values_seen INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (project_id, issue_id, key)
    );
    CREATE INDEX IF NOT EXISTS idx_tag_keys_lookup ON tag_keys(project_id, key);
";

/// Apply the schema to the database.
///
/// Idempotent: every statement uses `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    run_migrations(conn)?;

    // Set journal mode to WAL for concurrency
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // Enable foreign keys
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}

/// Record the schema version on fresh databases.
fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < CURRENT_SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "issues",
            "events",
            "issue_environments",
            "subscriptions",
            "tag_values",
            "tag_keys",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }

        let foreign_keys: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
    }
}
