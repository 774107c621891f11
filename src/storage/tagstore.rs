//! Tag store: per-issue tag membership and per-environment statistics.
//!
//! The search engine treats the tag store as a black box answering "which
//! issues carry these tags". [`TagStore`] is that contract; the `SQLite`
//! implementation reads the `tag_values` and `tag_keys` tables in the same
//! database as the issues.

use crate::error::Result;
use crate::model::IssueTagValue;
use crate::search::filters::{ENVIRONMENT_TAG, TagFilters, TagValue};
use crate::search::query::SqlParam;
use crate::storage::sqlite::{SQLITE_VAR_LIMIT, SqliteStorage};
use crate::util::time::{from_millis, to_millis};
use rusqlite::{TransactionBehavior, params, params_from_iter};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Read access to tag membership.
pub trait TagStore {
    /// Issues in the project carrying every tag in `tags`.
    ///
    /// With `environment_id`, only issues seen in that environment qualify.
    /// [`TagValue::Any`] only requires the key to be present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn issue_ids_for_search_filter(
        &self,
        project_id: i64,
        environment_id: Option<i64>,
        tags: &TagFilters,
    ) -> Result<HashSet<i64>>;

    /// Per-environment statistics for `candidates` in the named environment.
    ///
    /// Candidates never seen in the environment are absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn environment_values(
        &self,
        project_id: i64,
        environment: &str,
        candidates: &HashSet<i64>,
    ) -> Result<Vec<IssueTagValue>>;

    /// The subset of `candidates` carrying the tag `key` with `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn issue_ids_with_tag(
        &self,
        project_id: i64,
        key: &str,
        value: &TagValue,
        candidates: &HashSet<i64>,
    ) -> Result<HashSet<i64>>;
}

/// `SELECT issue_id` for one tag filter with its parameters.
fn tag_select(project_id: i64, key: &str, value: &TagValue) -> (String, Vec<SqlParam>) {
    match value {
        TagValue::Exact(value) => (
            "SELECT issue_id FROM tag_values WHERE project_id = ? AND key = ? AND value = ?"
                .to_string(),
            vec![
                SqlParam::Int(project_id),
                SqlParam::from(key),
                SqlParam::Text(value.clone()),
            ],
        ),
        TagValue::Any => (
            "SELECT issue_id FROM tag_keys WHERE project_id = ? AND key = ?".to_string(),
            vec![SqlParam::Int(project_id), SqlParam::from(key)],
        ),
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

impl SqliteStorage {
    fn collect_ids(&self, sql: &str, params: &[SqlParam]) -> Result<HashSet<i64>> {
        tracing::trace!(sql = %sql, "tag store query");
        let mut stmt = self.connection().prepare(sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get(0))?
            .collect::<std::result::Result<HashSet<i64>, _>>()?;
        Ok(ids)
    }

    /// Record tag statistics for an issue.
    ///
    /// Counters accumulate; first/last seen widen to cover both records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn record_tag_value(&mut self, project_id: i64, tag: &IssueTagValue) -> Result<()> {
        let tx = self
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            r"
            INSERT INTO tag_values (project_id, issue_id, key, value, times_seen, first_seen, last_seen)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (project_id, issue_id, key, value) DO UPDATE SET
                times_seen = times_seen + excluded.times_seen,
                first_seen = MIN(first_seen, excluded.first_seen),
                last_seen = MAX(last_seen, excluded.last_seen)
            ",
            params![
                project_id,
                tag.issue_id,
                tag.key,
                tag.value,
                tag.times_seen,
                to_millis(tag.first_seen),
                to_millis(tag.last_seen),
            ],
        )?;

        tx.execute(
            r"
            INSERT OR REPLACE INTO tag_keys (project_id, issue_id, key, values_seen)
            SELECT ?1, ?2, ?3, COUNT(*) FROM tag_values
            WHERE project_id = ?1 AND issue_id = ?2 AND key = ?3
            ",
            params![project_id, tag.issue_id, tag.key],
        )?;

        tx.commit()?;
        Ok(())
    }
}

impl TagStore for SqliteStorage {
    fn issue_ids_for_search_filter(
        &self,
        project_id: i64,
        environment_id: Option<i64>,
        tags: &TagFilters,
    ) -> Result<HashSet<i64>> {
        let (mut sql, mut binds) = match environment_id {
            Some(environment_id) => (
                "SELECT ie.issue_id FROM issue_environments ie \
                 INNER JOIN issues i ON i.id = ie.issue_id \
                 WHERE i.project_id = ? AND ie.environment_id = ?"
                    .to_string(),
                vec![SqlParam::Int(project_id), SqlParam::Int(environment_id)],
            ),
            None => (
                "SELECT id FROM issues WHERE project_id = ?".to_string(),
                vec![SqlParam::Int(project_id)],
            ),
        };

        for (key, value) in tags {
            let (select, params) = tag_select(project_id, key, value);
            let _ = write!(sql, " INTERSECT {select}");
            binds.extend(params);
        }

        self.collect_ids(&sql, &binds)
    }

    fn environment_values(
        &self,
        project_id: i64,
        environment: &str,
        candidates: &HashSet<i64>,
    ) -> Result<Vec<IssueTagValue>> {
        let mut ids: Vec<i64> = candidates.iter().copied().collect();
        ids.sort_unstable();

        let mut values = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(SQLITE_VAR_LIMIT) {
            let sql = format!(
                "SELECT issue_id, key, value, times_seen, first_seen, last_seen FROM tag_values \
                 WHERE project_id = ? AND key = ? AND value = ? AND issue_id IN ({}) \
                 ORDER BY issue_id",
                placeholders(chunk.len())
            );
            let mut binds = vec![
                SqlParam::Int(project_id),
                SqlParam::from(ENVIRONMENT_TAG),
                SqlParam::from(environment),
            ];
            binds.extend(chunk.iter().copied().map(SqlParam::Int));

            let mut stmt = self.connection().prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(binds.iter()), |row| {
                Ok(IssueTagValue {
                    issue_id: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                    times_seen: row.get(3)?,
                    first_seen: from_millis(row.get(4)?),
                    last_seen: from_millis(row.get(5)?),
                })
            })?;
            for row in rows {
                values.push(row?);
            }
        }

        Ok(values)
    }

    fn issue_ids_with_tag(
        &self,
        project_id: i64,
        key: &str,
        value: &TagValue,
        candidates: &HashSet<i64>,
    ) -> Result<HashSet<i64>> {
        let mut ids: Vec<i64> = candidates.iter().copied().collect();
        ids.sort_unstable();

        let mut matches = HashSet::new();
        for chunk in ids.chunks(SQLITE_VAR_LIMIT) {
            let (select, mut binds) = tag_select(project_id, key, value);
            let sql = format!("{select} AND issue_id IN ({})", placeholders(chunk.len()));
            binds.extend(chunk.iter().copied().map(SqlParam::Int));
            matches.extend(self.collect_ids(&sql, &binds)?);
        }
        Ok(matches)
    }
}
