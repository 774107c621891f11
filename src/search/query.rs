//! Unranked issue query plans.
//!
//! An [`IssueQuery`] is a value: conditions consume it and return a narrowed
//! copy. Nothing touches the database until storage renders it to SQL.

use crate::error::Result;
use crate::model::IssueStatus;
use crate::search::filters::{Bound, SearchParameters, Side};
use crate::storage::SqliteStorage;
use crate::util::like_contains_pattern;
use crate::util::time::to_millis;
use chrono::{DateTime, Utc};
use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;
use std::fmt::Write as _;
use tracing::debug;

/// Upper bound on issue ids materialized by event-level date narrowing.
pub const EVENT_ISSUE_LIMIT: usize = 1000;

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Int(value) => value.to_sql(),
            Self::Text(value) => value.to_sql(),
        }
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Filtered, unordered set of issues in one project (alias `i`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueQuery {
    project_id: i64,
    joins: Vec<String>,
    join_params: Vec<SqlParam>,
    clauses: Vec<String>,
    params: Vec<SqlParam>,
    empty: bool,
}

impl IssueQuery {
    /// Issues of `project_id`. Statuses hidden by default are excluded
    /// unless the search names a status itself.
    #[must_use]
    pub fn for_project(project_id: i64, status_requested: bool) -> Self {
        let mut query = Self {
            project_id,
            joins: Vec::new(),
            join_params: Vec::new(),
            clauses: vec!["i.project_id = ?".to_string()],
            params: vec![SqlParam::Int(project_id)],
            empty: false,
        };
        if !status_requested {
            let placeholders = vec!["?"; IssueStatus::HIDDEN_BY_DEFAULT.len()].join(", ");
            query = query.filter(
                format!("i.status NOT IN ({placeholders})"),
                IssueStatus::HIDDEN_BY_DEFAULT.map(|s| SqlParam::from(s.as_str())),
            );
        }
        query
    }

    /// Restrict to issues with a record in `environment_id`, exposing alias `ie`.
    #[must_use]
    pub fn in_environment(mut self, environment_id: i64) -> Self {
        self.joins.push(
            "INNER JOIN issue_environments ie ON ie.issue_id = i.id AND ie.environment_id = ?"
                .to_string(),
        );
        self.join_params.push(SqlParam::Int(environment_id));
        self
    }

    /// Add a predicate. `clause` holds one `?` per entry of `params`.
    #[must_use]
    pub fn filter(
        mut self,
        clause: impl Into<String>,
        params: impl IntoIterator<Item = SqlParam>,
    ) -> Self {
        if self.empty {
            return self;
        }
        self.clauses.push(clause.into());
        self.params.extend(params);
        self
    }

    /// Restrict to an explicit id set. An empty set empties the query.
    #[must_use]
    pub fn restrict_ids(self, ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        if ids.is_empty() {
            return self.none();
        }
        ids.sort_unstable();
        ids.dedup();

        // Integer literals: no placeholder limit, nothing to escape.
        let mut clause = String::from("i.id IN (");
        for (idx, id) in ids.iter().enumerate() {
            if idx > 0 {
                clause.push(',');
            }
            let _ = write!(clause, "{id}");
        }
        clause.push(')');
        self.filter(clause, [])
    }

    /// The query that matches nothing.
    #[must_use]
    pub fn none(mut self) -> Self {
        self.empty = true;
        self.clauses.clear();
        self.params.clear();
        self
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.empty
    }

    #[must_use]
    pub const fn project_id(&self) -> i64 {
        self.project_id
    }

    /// Number of predicates beyond the project scope.
    #[must_use]
    pub fn predicate_count(&self) -> usize {
        self.clauses.len().saturating_sub(1)
    }

    /// Render `SELECT <projection> FROM issues i ...` with its parameters.
    #[must_use]
    pub fn to_sql(&self, projection: &str) -> (String, Vec<SqlParam>) {
        let mut sql = format!("SELECT {projection} FROM issues i");
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if self.empty {
            sql.push_str(" WHERE 0");
            return (sql, self.join_params.clone());
        }
        sql.push_str(" WHERE ");
        sql.push_str(&self.clauses.join(" AND "));

        let mut params = self.join_params.clone();
        params.extend(self.params.iter().cloned());
        (sql, params)
    }
}

/// Event-level date range, optionally narrowed by message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventWindow {
    pub from: Option<Bound<DateTime<Utc>>>,
    pub to: Option<Bound<DateTime<Utc>>>,
    pub query: Option<String>,
}

impl EventWindow {
    /// Build the window from `date_from`/`date_to`, if either is present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if a date parameter has the wrong type.
    pub fn from_parameters(params: &SearchParameters) -> Result<Option<Self>> {
        let from = params
            .get("date_from")
            .map(|v| v.timestamp("date_from"))
            .transpose()?;
        let to = params
            .get("date_to")
            .map(|v| v.timestamp("date_to"))
            .transpose()?;
        if from.is_none() && to.is_none() {
            return Ok(None);
        }
        let query = params
            .get("query")
            .map(|v| v.text("query").map(str::to_string))
            .transpose()?;
        Ok(Some(Self { from, to, query }))
    }

    /// Render the capped `SELECT DISTINCT issue_id FROM events` sub-query.
    #[must_use]
    pub fn to_sql(&self, project_id: i64, cap: usize) -> (String, Vec<SqlParam>) {
        let mut sql = String::from("SELECT DISTINCT issue_id FROM events WHERE project_id = ?");
        let mut params = vec![SqlParam::Int(project_id)];

        if let Some(from) = &self.from {
            let _ = write!(sql, " AND timestamp {} ?", from.operator(Side::Lower));
            params.push(SqlParam::Int(to_millis(from.value)));
        }
        if let Some(to) = &self.to {
            let _ = write!(sql, " AND timestamp {} ?", to.operator(Side::Upper));
            params.push(SqlParam::Int(to_millis(to.value)));
        }
        if let Some(query) = &self.query {
            sql.push_str(r" AND message LIKE ? ESCAPE '\'");
            params.push(SqlParam::Text(like_contains_pattern(query)));
        }
        let _ = write!(sql, " LIMIT {cap}");
        (sql, params)
    }
}

/// Restrict `query` to issues with an event inside `window`.
///
/// Runs as two round-trips: the capped event sub-query is materialized first,
/// then applied as an id restriction.
///
/// # Errors
///
/// Returns an error if the event query fails.
pub fn narrow_by_events(
    storage: &SqliteStorage,
    query: IssueQuery,
    window: &EventWindow,
) -> Result<IssueQuery> {
    if query.is_empty() {
        return Ok(query);
    }
    let ids = storage.issue_ids_for_events(query.project_id(), window, EVENT_ISSUE_LIMIT)?;
    if ids.len() >= EVENT_ISSUE_LIMIT {
        debug!(
            limit = EVENT_ISSUE_LIMIT,
            "event date narrowing hit the issue cap; results are truncated"
        );
    }
    Ok(query.restrict_ids(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::filters::{FilterValue, SearchFilters};
    use chrono::TimeZone;

    #[test]
    fn test_default_scope_excludes_hidden_statuses() {
        let (sql, params) = IssueQuery::for_project(7, false).to_sql("i.id");
        assert_eq!(
            sql,
            "SELECT i.id FROM issues i WHERE i.project_id = ? AND i.status NOT IN (?, ?, ?)"
        );
        assert_eq!(params[0], SqlParam::Int(7));
        assert_eq!(params[1], SqlParam::from("pending_deletion"));
    }

    #[test]
    fn test_requested_status_keeps_full_scope() {
        let query = IssueQuery::for_project(7, true);
        assert_eq!(query.predicate_count(), 0);
    }

    #[test]
    fn test_join_params_precede_where_params() {
        let query = IssueQuery::for_project(1, true)
            .in_environment(9)
            .filter("i.times_seen = ?", [SqlParam::Int(3)]);
        let (sql, params) = query.to_sql("i.id");
        assert!(sql.contains("INNER JOIN issue_environments ie"));
        assert_eq!(
            params,
            vec![SqlParam::Int(9), SqlParam::Int(1), SqlParam::Int(3)]
        );
    }

    #[test]
    fn test_restrict_to_no_ids_is_empty() {
        let query = IssueQuery::for_project(1, false).restrict_ids(Vec::new());
        assert!(query.is_empty());
        let (sql, params) = query.to_sql("i.id");
        assert!(sql.ends_with("WHERE 0"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_filters_after_none_are_ignored() {
        let query = IssueQuery::for_project(1, false)
            .none()
            .filter("i.times_seen = ?", [SqlParam::Int(3)]);
        assert!(query.is_empty());
        assert_eq!(query.predicate_count(), 0);
    }

    #[test]
    fn test_restrict_ids_dedups() {
        let query = IssueQuery::for_project(1, true).restrict_ids([3, 1, 3]);
        let (sql, _) = query.to_sql("i.id");
        assert!(sql.ends_with("i.id IN (1,3)"));
    }

    #[test]
    fn test_event_window_absent_without_dates() {
        let params = SearchFilters {
            query: Some("boom".to_string()),
            ..Default::default()
        }
        .parameters();
        assert_eq!(EventWindow::from_parameters(&params).unwrap(), None);
    }

    #[test]
    fn test_event_window_sql() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut params = SearchParameters::default();
        params.insert("date_from", FilterValue::Timestamp(Bound::exclusive(ts)));
        params.insert("query", FilterValue::Text("boom".to_string()));
        let window = EventWindow::from_parameters(&params).unwrap().unwrap();

        let (sql, binds) = window.to_sql(3, EVENT_ISSUE_LIMIT);
        assert_eq!(
            sql,
            "SELECT DISTINCT issue_id FROM events WHERE project_id = ? AND timestamp > ? \
             AND message LIKE ? ESCAPE '\\' LIMIT 1000"
        );
        assert_eq!(binds.len(), 3);
        assert_eq!(binds[1], SqlParam::Int(to_millis(ts)));
    }
}
