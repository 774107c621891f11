//! `SQLite` storage implementation.

use crate::error::{Result, SearchError};
use crate::model::{Environment, Event, Issue, IssueStatus, Project, Release};
use crate::search::query::{EventWindow, IssueQuery, SqlParam};
use crate::search::rank::{Dialect, register_functions};
use crate::storage::events;
use crate::storage::schema::apply_schema;
use crate::util::time::{from_millis, to_millis};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Issue columns in [`SqliteStorage::issue_from_row`] order, over alias `i`.
pub const ISSUE_COLUMNS: &str = "i.id AS id, i.project_id AS project_id, i.status AS status, \
     i.message AS message, i.culprit AS culprit, i.first_seen AS first_seen, \
     i.last_seen AS last_seen, i.active_at AS active_at, i.times_seen AS times_seen, \
     i.first_release_id AS first_release_id";

/// Index of the column following [`ISSUE_COLUMNS`].
const ISSUE_COLUMN_COUNT: usize = 10;

/// `SQLite` default host parameter limit is 999; stay under it.
pub(crate) const SQLITE_VAR_LIMIT: usize = 900;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open a new connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a new connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        Self::prepare(conn)
    }

    /// Open an existing database, failing if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` if `path` does not exist.
    pub fn open_existing(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        if !path.exists() {
            return Err(SearchError::DatabaseNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::open_with_timeout(path, lock_timeout_ms)
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        apply_schema(&conn)?;
        register_functions(&conn)?;
        Ok(Self { conn })
    }

    /// Dialect of the ranking expressions this connection executes.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    pub(crate) const fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) const fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    // === Projects, releases, environments ===

    /// Create a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. ID collision).
    pub fn create_project(&mut self, project: &Project) -> Result<()> {
        self.conn.execute(
            "INSERT INTO projects (id, organization_id, slug) VALUES (?1, ?2, ?3)",
            params![project.id, project.organization_id, project.slug],
        )?;
        Ok(())
    }

    /// Get a project by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, organization_id, slug FROM projects WHERE id = ?1",
                [id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        organization_id: row.get(1)?,
                        slug: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    /// Get a project by ID, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ProjectNotFound` if no project has this ID.
    pub fn require_project(&self, id: i64) -> Result<Project> {
        self.get_project(id)?
            .ok_or(SearchError::ProjectNotFound { id })
    }

    /// Create a release, or return the existing one with this version.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn create_release(&mut self, organization_id: i64, version: &str) -> Result<Release> {
        self.conn.execute(
            "INSERT OR IGNORE INTO releases (organization_id, version) VALUES (?1, ?2)",
            params![organization_id, version],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM releases WHERE organization_id = ?1 AND version = ?2",
            params![organization_id, version],
            |row| row.get(0),
        )?;
        Ok(Release {
            id,
            organization_id,
            version: version.to_string(),
        })
    }

    /// Create an environment, or return the existing one with this name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn create_environment(&mut self, project_id: i64, name: &str) -> Result<Environment> {
        self.conn.execute(
            "INSERT OR IGNORE INTO environments (project_id, name) VALUES (?1, ?2)",
            params![project_id, name],
        )?;
        self.find_environment_by_name(project_id, name)?
            .ok_or_else(|| SearchError::EnvironmentNotFound {
                project_id,
                environment: name.to_string(),
            })
    }

    /// Get an environment by ID within a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_environment(&self, project_id: i64, id: i64) -> Result<Option<Environment>> {
        self.environment_where("project_id = ?1 AND id = ?2", params![project_id, id])
    }

    /// Get an environment by name within a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_environment_by_name(&self, project_id: i64, name: &str) -> Result<Option<Environment>> {
        self.environment_where("project_id = ?1 AND name = ?2", params![project_id, name])
    }

    fn environment_where(
        &self,
        predicate: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<Environment>> {
        let sql = format!("SELECT id, project_id, name FROM environments WHERE {predicate}");
        let environment = self
            .conn
            .query_row(&sql, params, |row| {
                Ok(Environment {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })
            .optional()?;
        Ok(environment)
    }

    // === Issues ===

    /// Create an issue with its given ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue cannot be inserted (e.g. ID collision).
    pub fn create_issue(&mut self, issue: &Issue) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO issues (
                id, project_id, status, message, culprit,
                first_seen, last_seen, active_at, times_seen, first_release_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                issue.id,
                issue.project_id,
                issue.status.as_str(),
                issue.message,
                issue.culprit,
                to_millis(issue.first_seen),
                to_millis(issue.last_seen),
                issue.active_at.map(to_millis),
                issue.times_seen,
                issue.first_release_id,
            ],
        )?;
        tracing::debug!(issue_id = issue.id, project_id = issue.project_id, "created issue");
        Ok(())
    }

    /// Change an issue's status. Returns whether the issue exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_issue_status(&mut self, id: i64, status: IssueStatus) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE issues SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(updated > 0)
    }

    /// Delete an issue and everything it owns. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database delete fails.
    pub fn delete_issue(&mut self, id: i64) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM tag_values WHERE issue_id = ?1", [id])?;
        tx.execute("DELETE FROM tag_keys WHERE issue_id = ?1", [id])?;
        let deleted = tx.execute("DELETE FROM issues WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Get an issue by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues i WHERE i.id = ?1");
        let issue = self
            .conn
            .query_row(&sql, [id], Self::issue_from_row)
            .optional()?;
        Ok(issue)
    }

    /// Load issues by ID. IDs that no longer exist are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issues_in_bulk(&self, ids: &[i64]) -> Result<HashMap<i64, Issue>> {
        let mut map = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(SQLITE_VAR_LIMIT) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues i WHERE i.id IN ({placeholders})");
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), Self::issue_from_row)?;
            for row in rows {
                let issue = row?;
                map.insert(issue.id, issue);
            }
        }

        Ok(map)
    }

    // === Membership ===

    /// Record an event for an issue.
    ///
    /// Issue counters are not touched; `times_seen` and `last_seen` are
    /// owned by whoever creates the issue row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database insert fails.
    pub fn record_event(&mut self, event: &Event) -> Result<bool> {
        events::insert_event(&self.conn, event)
    }

    /// Attach an issue to an environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn add_issue_environment(
        &mut self,
        issue_id: i64,
        environment_id: i64,
        first_release_id: Option<i64>,
    ) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO issue_environments (issue_id, environment_id, first_release_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (issue_id, environment_id) DO UPDATE SET first_release_id = excluded.first_release_id
            ",
            params![issue_id, environment_id, first_release_id],
        )?;
        Ok(())
    }

    /// Bookmark an issue for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn bookmark(&mut self, issue_id: i64, user_id: i64) -> Result<()> {
        self.conn.execute(
            r"
            INSERT OR IGNORE INTO bookmarks (issue_id, project_id, user_id)
            SELECT id, project_id, ?2 FROM issues WHERE id = ?1
            ",
            params![issue_id, user_id],
        )?;
        Ok(())
    }

    /// Assign an issue to a user, replacing any previous assignee.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn assign(&mut self, issue_id: i64, user_id: i64) -> Result<()> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO assignments (issue_id, project_id, user_id)
            SELECT id, project_id, ?2 FROM issues WHERE id = ?1
            ",
            params![issue_id, user_id],
        )?;
        Ok(())
    }

    /// Remove an issue's assignee. Returns whether one was set.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn unassign(&mut self, issue_id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM assignments WHERE issue_id = ?1", [issue_id])?;
        Ok(removed > 0)
    }

    /// Subscribe a user to an issue, or update the subscription's state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn subscribe(&mut self, issue_id: i64, user_id: i64, is_active: bool) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO subscriptions (issue_id, project_id, user_id, is_active)
            SELECT id, project_id, ?2, ?3 FROM issues WHERE id = ?1
            ON CONFLICT (issue_id, user_id) DO UPDATE SET is_active = excluded.is_active
            ",
            params![issue_id, user_id, is_active],
        )?;
        Ok(())
    }

    // === Query execution ===

    /// Materialize the ids matched by a query plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn select_issue_ids(&self, query: &IssueQuery) -> Result<Vec<i64>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let (sql, params) = query.to_sql("i.id");
        tracing::trace!(sql = %sql, "issue id query");

        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Run a ranked page query: [`ISSUE_COLUMNS`] followed by the score.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn select_ranked_issues(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<(i64, Issue)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let issue = Self::issue_from_row(row)?;
                let score: i64 = row.get(ISSUE_COLUMN_COUNT)?;
                Ok((score, issue))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Run a `SELECT COUNT(*)` query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_rows(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Distinct ids of issues with an event in `window`, at most `cap`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn issue_ids_for_events(
        &self,
        project_id: i64,
        window: &EventWindow,
        cap: usize,
    ) -> Result<Vec<i64>> {
        events::issue_ids_in_window(&self.conn, project_id, window, cap)
    }

    fn issue_from_row(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
        Ok(Issue {
            id: row.get(0)?,
            project_id: row.get(1)?,
            status: parse_status(row, 2)?,
            message: row.get(3)?,
            culprit: row.get(4)?,
            first_seen: from_millis(row.get(5)?),
            last_seen: from_millis(row.get(6)?),
            active_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
            times_seen: row.get(8)?,
            first_release_id: row.get(9)?,
        })
    }
}

fn parse_status(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<IssueStatus> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

#[cfg(test)]
impl SqliteStorage {
    /// Execute raw SQL for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL execution fails.
    pub fn execute_test_sql(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, hour, 0, 0).unwrap()
    }

    fn make_issue(id: i64, message: &str) -> Issue {
        Issue {
            id,
            project_id: 1,
            status: IssueStatus::Unresolved,
            message: message.to_string(),
            culprit: Some("app.handlers".to_string()),
            first_seen: ts(1),
            last_seen: ts(2),
            active_at: None,
            times_seen: 3,
            first_release_id: None,
        }
    }

    fn storage() -> SqliteStorage {
        crate::logging::init_test_logging();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .create_project(&Project {
                id: 1,
                organization_id: 9,
                slug: "web".to_string(),
            })
            .unwrap();
        storage
    }

    #[test]
    fn test_create_and_get_issue() {
        let mut storage = storage();
        let issue = make_issue(5, "boom");
        storage.create_issue(&issue).unwrap();
        assert_eq!(storage.get_issue(5).unwrap(), Some(issue));
        assert_eq!(storage.get_issue(6).unwrap(), None);
    }

    #[test]
    fn test_require_project() {
        let storage = storage();
        assert_eq!(storage.require_project(1).unwrap().slug, "web");
        assert!(matches!(
            storage.require_project(2),
            Err(SearchError::ProjectNotFound { id: 2 })
        ));
    }

    #[test]
    fn test_get_issues_in_bulk_drops_missing() {
        let mut storage = storage();
        storage.create_issue(&make_issue(1, "a")).unwrap();
        storage.create_issue(&make_issue(2, "b")).unwrap();
        let map = storage.get_issues_in_bulk(&[1, 2, 3]).unwrap();
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key(&3));
    }

    #[test]
    fn test_get_issues_in_bulk_chunks_large_inputs() {
        let mut storage = storage();
        for id in 1..=1000 {
            storage.create_issue(&make_issue(id, "bulk")).unwrap();
        }
        let ids: Vec<i64> = (1..=1000).collect();
        assert_eq!(storage.get_issues_in_bulk(&ids).unwrap().len(), 1000);
    }

    #[test]
    fn test_release_and_environment_are_idempotent() {
        let mut storage = storage();
        let first = storage.create_release(9, "1.0.0").unwrap();
        let again = storage.create_release(9, "1.0.0").unwrap();
        assert_eq!(first, again);

        let prod = storage.create_environment(1, "production").unwrap();
        assert_eq!(storage.create_environment(1, "production").unwrap(), prod);
        assert_eq!(storage.get_environment(1, prod.id).unwrap(), Some(prod.clone()));
        assert_eq!(storage.get_environment(2, prod.id).unwrap(), None);
        assert_eq!(
            storage.find_environment_by_name(1, "production").unwrap(),
            Some(prod)
        );
    }

    #[test]
    fn test_assign_replaces_previous_assignee() {
        let mut storage = storage();
        storage.create_issue(&make_issue(1, "a")).unwrap();
        storage.assign(1, 100).unwrap();
        storage.assign(1, 200).unwrap();
        let user: i64 = storage
            .connection()
            .query_row("SELECT user_id FROM assignments WHERE issue_id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(user, 200);
        assert!(storage.unassign(1).unwrap());
        assert!(!storage.unassign(1).unwrap());
    }

    #[test]
    fn test_delete_issue_cascades() {
        let mut storage = storage();
        storage.create_issue(&make_issue(1, "a")).unwrap();
        storage.bookmark(1, 7).unwrap();
        assert!(storage.delete_issue(1).unwrap());
        assert!(!storage.delete_issue(1).unwrap());
        let bookmarks: i64 = storage
            .connection()
            .query_row("SELECT COUNT(*) FROM bookmarks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(bookmarks, 0);
    }

    #[test]
    fn test_unknown_status_is_a_conversion_error() {
        let mut storage = storage();
        storage.create_issue(&make_issue(1, "a")).unwrap();
        storage
            .execute_test_sql("UPDATE issues SET status = 'open' WHERE id = 1")
            .unwrap();
        assert!(matches!(storage.get_issue(1), Err(SearchError::Database(_))));
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("search.db");
        assert!(matches!(
            SqliteStorage::open_existing(&path, None),
            Err(SearchError::DatabaseNotFound { .. })
        ));
        SqliteStorage::open(&path).unwrap();
        SqliteStorage::open_existing(&path, Some(500)).unwrap();
    }
}
