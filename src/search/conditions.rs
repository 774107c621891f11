//! Named filter conditions and the builder that applies them.
//!
//! A condition is a pure function `(state, value, scope) -> state'` registered
//! under a parameter name. Conditions are grouped into static tables; a
//! [`QueryBuilder`] walks one table in declaration order, runs the handler of
//! every parameter that is present and skips the rest.
//!
//! Each condition touches its own attribute, so the order of a table never
//! changes the result set.

use crate::error::Result;
use crate::model::{IssueTagValue, Project};
use crate::search::filters::{Bound, FilterValue, ReleaseFilter, SearchParameters, Side};
use crate::search::query::{IssueQuery, SqlParam};
use crate::storage::TagStore;
use crate::util::like_contains_pattern;
use crate::util::time::to_millis;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

/// What a condition can see besides its own value.
#[derive(Clone, Copy)]
pub struct SearchScope<'a> {
    pub project: &'a Project,
    pub tag_store: &'a dyn TagStore,
    pub environment_id: Option<i64>,
}

/// State threaded through a condition table.
pub trait QueryState {
    /// An empty state matches nothing; remaining conditions are skipped.
    fn is_empty(&self) -> bool;
}

impl QueryState for IssueQuery {
    fn is_empty(&self) -> bool {
        Self::is_empty(self)
    }
}

impl QueryState for Vec<IssueTagValue> {
    fn is_empty(&self) -> bool {
        <[IssueTagValue]>::is_empty(self)
    }
}

/// Condition handler signature.
pub type Handler<S> = for<'s> fn(S, &FilterValue, &SearchScope<'s>) -> Result<S>;

/// A handler registered under a parameter name.
pub struct Condition<S> {
    pub parameter: &'static str,
    pub handler: Handler<S>,
}

impl<S> Clone for Condition<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Condition<S> {}

impl<S> std::fmt::Debug for Condition<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("parameter", &self.parameter)
            .finish_non_exhaustive()
    }
}

const fn condition<S>(parameter: &'static str, handler: Handler<S>) -> Condition<S> {
    Condition { parameter, handler }
}

/// Applies a condition table to an initial state.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'c, S> {
    conditions: &'c [Condition<S>],
}

impl<'c, S: QueryState> QueryBuilder<'c, S> {
    #[must_use]
    pub const fn new(conditions: &'c [Condition<S>]) -> Self {
        Self { conditions }
    }

    /// Run every condition whose parameter is present, in table order.
    ///
    /// Returns the final state and the names of the conditions that ran.
    ///
    /// # Errors
    ///
    /// Propagates the first handler error.
    pub fn build(
        &self,
        mut state: S,
        params: &SearchParameters,
        scope: &SearchScope<'_>,
    ) -> Result<(S, Vec<&'static str>)> {
        let mut applied = Vec::new();
        for condition in self.conditions {
            if state.is_empty() {
                debug!(
                    applied = ?applied,
                    "query emptied; skipping remaining conditions"
                );
                break;
            }
            let Some(value) = params.get(condition.parameter) else {
                continue;
            };
            trace!(parameter = condition.parameter, "applying condition");
            state = (condition.handler)(state, value, scope)?;
            applied.push(condition.parameter);
        }
        Ok((state, applied))
    }
}

// === Issue conditions (SQL) ===

/// Conditions applied to the project-wide issue query.
pub static ISSUE_CONDITIONS: &[Condition<IssueQuery>] = &[
    condition("query", message_contains),
    condition("status", status_equals),
    condition("bookmarked_by", bookmarked_by),
    condition("assigned_to", assigned_to),
    condition("unassigned", unassigned),
    condition("subscribed_by", subscribed_by),
    condition("active_at_from", active_at_from),
    condition("active_at_to", active_at_to),
    condition("first_release", first_release),
    condition("times_seen", times_seen_equals),
    condition("times_seen_lower", times_seen_lower),
    condition("times_seen_upper", times_seen_upper),
    condition("age_from", age_from),
    condition("age_to", age_to),
    condition("last_seen_from", last_seen_from),
    condition("last_seen_to", last_seen_to),
    condition("tags", tags),
];

/// Conditions applied to the environment-joined issue query.
///
/// Scalar ranges other than `active_at` live in the per-environment
/// projection; see [`ENVIRONMENT_VALUE_CONDITIONS`].
pub static ENVIRONMENT_ISSUE_CONDITIONS: &[Condition<IssueQuery>] = &[
    condition("query", message_contains),
    condition("status", status_equals),
    condition("bookmarked_by", bookmarked_by),
    condition("assigned_to", assigned_to),
    condition("unassigned", unassigned),
    condition("subscribed_by", subscribed_by),
    condition("active_at_from", active_at_from),
    condition("active_at_to", active_at_to),
    condition("first_release", environment_first_release),
];

fn message_contains(
    query: IssueQuery,
    value: &FilterValue,
    _scope: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let pattern = like_contains_pattern(value.text("query")?);
    Ok(query.filter(
        r"(i.message LIKE ? ESCAPE '\' OR i.culprit LIKE ? ESCAPE '\')",
        [SqlParam::Text(pattern.clone()), SqlParam::Text(pattern)],
    ))
}

fn status_equals(
    query: IssueQuery,
    value: &FilterValue,
    _scope: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let status = value.status("status")?;
    Ok(query.filter("i.status = ?", [SqlParam::from(status.as_str())]))
}

fn membership(
    query: IssueQuery,
    table: &str,
    extra: &str,
    user_id: i64,
    scope: &SearchScope<'_>,
) -> IssueQuery {
    query.filter(
        format!("i.id IN (SELECT issue_id FROM {table} WHERE project_id = ? AND user_id = ?{extra})"),
        [SqlParam::Int(scope.project.id), SqlParam::Int(user_id)],
    )
}

fn bookmarked_by(
    query: IssueQuery,
    value: &FilterValue,
    scope: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let user = value.user("bookmarked_by")?;
    Ok(membership(query, "bookmarks", "", user, scope))
}

fn assigned_to(
    query: IssueQuery,
    value: &FilterValue,
    scope: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let user = value.user("assigned_to")?;
    Ok(membership(query, "assignments", "", user, scope))
}

fn subscribed_by(
    query: IssueQuery,
    value: &FilterValue,
    scope: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let user = value.user("subscribed_by")?;
    Ok(membership(query, "subscriptions", " AND is_active = 1", user, scope))
}

fn unassigned(
    query: IssueQuery,
    value: &FilterValue,
    _scope: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let exists = "EXISTS (SELECT 1 FROM assignments a WHERE a.issue_id = i.id)";
    let clause = if value.flag("unassigned")? {
        format!("NOT {exists}")
    } else {
        exists.to_string()
    };
    Ok(query.filter(clause, []))
}

fn release_condition(
    query: IssueQuery,
    value: &FilterValue,
    scope: &SearchScope<'_>,
    column: &str,
) -> Result<IssueQuery> {
    match value.release("first_release")? {
        ReleaseFilter::NoValue => Ok(query.none()),
        ReleaseFilter::Version(version) => Ok(query.filter(
            format!(
                "{column} IN (SELECT id FROM releases WHERE organization_id = ? AND version = ?)"
            ),
            [
                SqlParam::Int(scope.project.organization_id),
                SqlParam::Text(version.clone()),
            ],
        )),
    }
}

fn first_release(
    query: IssueQuery,
    value: &FilterValue,
    scope: &SearchScope<'_>,
) -> Result<IssueQuery> {
    release_condition(query, value, scope, "i.first_release_id")
}

fn environment_first_release(
    query: IssueQuery,
    value: &FilterValue,
    scope: &SearchScope<'_>,
) -> Result<IssueQuery> {
    release_condition(query, value, scope, "ie.first_release_id")
}

fn tags(query: IssueQuery, value: &FilterValue, scope: &SearchScope<'_>) -> Result<IssueQuery> {
    let tags = value.tags("tags")?;
    let matches =
        scope
            .tag_store
            .issue_ids_for_search_filter(scope.project.id, scope.environment_id, tags)?;
    debug!(tags = tags.len(), matches = matches.len(), "tag filter resolved");
    Ok(query.restrict_ids(matches))
}

fn timestamp_range(
    query: IssueQuery,
    bound: Bound<DateTime<Utc>>,
    column: &str,
    side: Side,
) -> IssueQuery {
    query.filter(
        format!("{column} {} ?", bound.operator(side)),
        [SqlParam::Int(to_millis(bound.value))],
    )
}

fn age_from(query: IssueQuery, value: &FilterValue, _: &SearchScope<'_>) -> Result<IssueQuery> {
    let bound = value.timestamp("age_from")?;
    Ok(timestamp_range(query, bound, "i.first_seen", Side::Lower))
}

fn age_to(query: IssueQuery, value: &FilterValue, _: &SearchScope<'_>) -> Result<IssueQuery> {
    let bound = value.timestamp("age_to")?;
    Ok(timestamp_range(query, bound, "i.first_seen", Side::Upper))
}

fn last_seen_from(
    query: IssueQuery,
    value: &FilterValue,
    _: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let bound = value.timestamp("last_seen_from")?;
    Ok(timestamp_range(query, bound, "i.last_seen", Side::Lower))
}

fn last_seen_to(query: IssueQuery, value: &FilterValue, _: &SearchScope<'_>) -> Result<IssueQuery> {
    let bound = value.timestamp("last_seen_to")?;
    Ok(timestamp_range(query, bound, "i.last_seen", Side::Upper))
}

fn active_at_from(
    query: IssueQuery,
    value: &FilterValue,
    _: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let bound = value.timestamp("active_at_from")?;
    Ok(timestamp_range(query, bound, "i.active_at", Side::Lower))
}

fn active_at_to(query: IssueQuery, value: &FilterValue, _: &SearchScope<'_>) -> Result<IssueQuery> {
    let bound = value.timestamp("active_at_to")?;
    Ok(timestamp_range(query, bound, "i.active_at", Side::Upper))
}

fn times_seen_equals(
    query: IssueQuery,
    value: &FilterValue,
    _: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let count = value.count("times_seen")?;
    Ok(query.filter("i.times_seen = ?", [SqlParam::Int(count)]))
}

fn times_seen_lower(
    query: IssueQuery,
    value: &FilterValue,
    _: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let bound = value.count_bound("times_seen_lower")?;
    Ok(query.filter(
        format!("i.times_seen {} ?", bound.operator(Side::Lower)),
        [SqlParam::Int(bound.value)],
    ))
}

fn times_seen_upper(
    query: IssueQuery,
    value: &FilterValue,
    _: &SearchScope<'_>,
) -> Result<IssueQuery> {
    let bound = value.count_bound("times_seen_upper")?;
    Ok(query.filter(
        format!("i.times_seen {} ?", bound.operator(Side::Upper)),
        [SqlParam::Int(bound.value)],
    ))
}

// === Per-environment value conditions (in memory) ===

/// Scalar conditions over the per-environment projection rows.
pub static ENVIRONMENT_VALUE_CONDITIONS: &[Condition<Vec<IssueTagValue>>] = &[
    condition("age_from", env_age_from),
    condition("age_to", env_age_to),
    condition("last_seen_from", env_last_seen_from),
    condition("last_seen_to", env_last_seen_to),
    condition("times_seen", env_times_seen_equals),
    condition("times_seen_lower", env_times_seen_lower),
    condition("times_seen_upper", env_times_seen_upper),
];

type Rows = Vec<IssueTagValue>;

fn retain(mut rows: Rows, keep: impl Fn(&IssueTagValue) -> bool) -> Rows {
    rows.retain(|row| keep(row));
    rows
}

fn env_age_from(rows: Rows, value: &FilterValue, _: &SearchScope<'_>) -> Result<Rows> {
    let bound = value.timestamp("age_from")?;
    Ok(retain(rows, |row| bound.admits(Side::Lower, &row.first_seen)))
}

fn env_age_to(rows: Rows, value: &FilterValue, _: &SearchScope<'_>) -> Result<Rows> {
    let bound = value.timestamp("age_to")?;
    Ok(retain(rows, |row| bound.admits(Side::Upper, &row.first_seen)))
}

fn env_last_seen_from(rows: Rows, value: &FilterValue, _: &SearchScope<'_>) -> Result<Rows> {
    let bound = value.timestamp("last_seen_from")?;
    Ok(retain(rows, |row| bound.admits(Side::Lower, &row.last_seen)))
}

fn env_last_seen_to(rows: Rows, value: &FilterValue, _: &SearchScope<'_>) -> Result<Rows> {
    let bound = value.timestamp("last_seen_to")?;
    Ok(retain(rows, |row| bound.admits(Side::Upper, &row.last_seen)))
}

fn env_times_seen_equals(rows: Rows, value: &FilterValue, _: &SearchScope<'_>) -> Result<Rows> {
    let count = value.count("times_seen")?;
    Ok(retain(rows, |row| row.times_seen == count))
}

fn env_times_seen_lower(rows: Rows, value: &FilterValue, _: &SearchScope<'_>) -> Result<Rows> {
    let bound = value.count_bound("times_seen_lower")?;
    Ok(retain(rows, |row| bound.admits(Side::Lower, &row.times_seen)))
}

fn env_times_seen_upper(rows: Rows, value: &FilterValue, _: &SearchScope<'_>) -> Result<Rows> {
    let bound = value.count_bound("times_seen_upper")?;
    Ok(retain(rows, |row| bound.admits(Side::Upper, &row.times_seen)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::filters::{SearchFilters, TagFilters, TagValue};
    use crate::storage::SqliteStorage;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn project() -> Project {
        Project {
            id: 1,
            organization_id: 10,
            slug: "web".to_string(),
        }
    }

    #[test]
    fn test_absent_parameters_leave_query_untouched() {
        crate::logging::init_test_logging();
        let storage = SqliteStorage::open_memory().unwrap();
        let project = project();
        let scope = SearchScope {
            project: &project,
            tag_store: &storage,
            environment_id: None,
        };
        let base = IssueQuery::for_project(1, false);
        let (query, applied) = QueryBuilder::new(ISSUE_CONDITIONS)
            .build(base.clone(), &SearchParameters::default(), &scope)
            .unwrap();
        assert_eq!(query, base);
        assert!(applied.is_empty());
    }

    #[test]
    fn test_applied_names_follow_table_order() {
        let storage = SqliteStorage::open_memory().unwrap();
        let project = project();
        let scope = SearchScope {
            project: &project,
            tag_store: &storage,
            environment_id: None,
        };
        let params = SearchFilters {
            times_seen: Some(3),
            query: Some("boom".to_string()),
            unassigned: Some(true),
            ..Default::default()
        }
        .parameters();
        let (query, applied) = QueryBuilder::new(ISSUE_CONDITIONS)
            .build(IssueQuery::for_project(1, false), &params, &scope)
            .unwrap();
        assert_eq!(applied, vec!["query", "unassigned", "times_seen"]);
        assert_eq!(query.predicate_count(), 4);
    }

    #[test]
    fn test_no_value_release_empties_query() {
        let storage = SqliteStorage::open_memory().unwrap();
        let project = project();
        let scope = SearchScope {
            project: &project,
            tag_store: &storage,
            environment_id: None,
        };
        let params = SearchFilters {
            first_release: Some(ReleaseFilter::NoValue),
            times_seen: Some(3),
            ..Default::default()
        }
        .parameters();
        let (query, applied) = QueryBuilder::new(ISSUE_CONDITIONS)
            .build(IssueQuery::for_project(1, false), &params, &scope)
            .unwrap();
        assert!(query.is_empty());
        assert_eq!(applied, vec!["first_release"]);
    }

    static TAG_CALLS: AtomicUsize = AtomicUsize::new(0);
    static COUNTED_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct NoMatches;

    impl TagStore for NoMatches {
        fn issue_ids_for_search_filter(
            &self,
            _project_id: i64,
            _environment_id: Option<i64>,
            _tags: &TagFilters,
        ) -> Result<HashSet<i64>> {
            TAG_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(HashSet::new())
        }

        fn environment_values(
            &self,
            _project_id: i64,
            _environment: &str,
            _candidates: &HashSet<i64>,
        ) -> Result<Vec<IssueTagValue>> {
            Ok(Vec::new())
        }

        fn issue_ids_with_tag(
            &self,
            _project_id: i64,
            _key: &str,
            _value: &TagValue,
            _candidates: &HashSet<i64>,
        ) -> Result<HashSet<i64>> {
            Ok(HashSet::new())
        }
    }

    fn counted(query: IssueQuery, _: &FilterValue, _: &SearchScope<'_>) -> Result<IssueQuery> {
        COUNTED_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(query)
    }

    #[test]
    fn test_empty_tag_match_short_circuits() {
        let project = project();
        let scope = SearchScope {
            project: &project,
            tag_store: &NoMatches,
            environment_id: None,
        };
        let table = [condition("tags", tags), condition("query", counted)];
        let mut tag_filters = TagFilters::new();
        tag_filters.insert("browser".to_string(), TagValue::exact("firefox"));
        let params = SearchFilters {
            tags: tag_filters,
            query: Some("boom".to_string()),
            ..Default::default()
        }
        .parameters();

        let (query, applied) = QueryBuilder::new(&table)
            .build(IssueQuery::for_project(1, false), &params, &scope)
            .unwrap();
        assert!(query.is_empty());
        assert_eq!(applied, vec!["tags"]);
        assert_eq!(TAG_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(COUNTED_CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_environment_value_conditions_filter_rows() {
        let storage = SqliteStorage::open_memory().unwrap();
        let project = project();
        let scope = SearchScope {
            project: &project,
            tag_store: &storage,
            environment_id: Some(1),
        };
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let row = |issue_id, times_seen| IssueTagValue {
            issue_id,
            key: "environment".to_string(),
            value: "production".to_string(),
            times_seen,
            first_seen: t0,
            last_seen: t0,
        };
        let params = SearchFilters {
            times_seen_lower: Some(Bound::exclusive(5)),
            age_from: Some(Bound::inclusive(t0)),
            ..Default::default()
        }
        .parameters();

        let (rows, _) = QueryBuilder::new(ENVIRONMENT_VALUE_CONDITIONS)
            .build(vec![row(1, 5), row(2, 6)], &params, &scope)
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.issue_id).collect();
        assert_eq!(ids, vec![2]);
    }
}
