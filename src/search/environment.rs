//! Environment-scoped search.
//!
//! Issue columns hold project-wide statistics, so a search scoped to one
//! environment reads its scalar ranges and rank inputs from the tag store's
//! per-environment projection instead. Candidates are narrowed in memory:
//!
//! 1. SQL: issues in the environment matching the non-scalar conditions.
//! 2. Tag store: per-environment statistics, filtered and scored in memory.
//! 3. Tag store: one match set per remaining tag filter, intersected.
//! 4. Sequence pagination, then hydration of the page's issues.

use crate::error::{Result, SearchError};
use crate::model::{Environment, Issue, Project};
use crate::search::conditions::{
    ENVIRONMENT_ISSUE_CONDITIONS, ENVIRONMENT_VALUE_CONDITIONS, QueryBuilder, SearchScope,
};
use crate::search::filters::{ENVIRONMENT_TAG, SearchParameters, TagFilters, TagValue};
use crate::search::paginator::{Hits, Page, PageRequest, SequencePaginator, empty_page};
use crate::search::query::IssueQuery;
use crate::search::rank::{RankInput, RankStrategy};
use crate::storage::{SqliteStorage, TagStore};
use crate::util::time::to_millis;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Resolver for searches carrying an `environment_id`.
pub struct EnvironmentSearch<'a> {
    storage: &'a SqliteStorage,
    tag_store: &'a dyn TagStore,
    rank: &'a RankStrategy,
}

impl<'a> EnvironmentSearch<'a> {
    #[must_use]
    pub const fn new(
        storage: &'a SqliteStorage,
        tag_store: &'a dyn TagStore,
        rank: &'a RankStrategy,
    ) -> Self {
        Self {
            storage,
            tag_store,
            rank,
        }
    }

    /// Run the search in `environment_id` of `project`.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for event date ranges, or an `environment` tag
    ///   naming another environment
    /// - `EnvironmentNotFound` if the environment is not in the project
    /// - storage errors, unmodified
    pub fn search(
        &self,
        project: &Project,
        environment_id: i64,
        params: &SearchParameters,
        page: &PageRequest,
    ) -> Result<Page<Issue>> {
        for name in ["date_from", "date_to"] {
            if params.contains(name) {
                return Err(SearchError::invalid_parameter(
                    name,
                    "event date ranges cannot be combined with an environment",
                ));
            }
        }

        let environment = self
            .storage
            .get_environment(project.id, environment_id)?
            .ok_or_else(|| SearchError::EnvironmentNotFound {
                project_id: project.id,
                environment: environment_id.to_string(),
            })?;
        let tags = remaining_tags(params, &environment)?;

        let scope = SearchScope {
            project,
            tag_store: self.tag_store,
            environment_id: Some(environment.id),
        };
        let empty = || empty_page(page, page.count_hits.then_some(Hits::Exact(0)));

        let base = IssueQuery::for_project(project.id, params.contains("status"))
            .in_environment(environment.id);
        let (query, applied) =
            QueryBuilder::new(ENVIRONMENT_ISSUE_CONDITIONS).build(base, params, &scope)?;
        let candidates: HashSet<i64> = self.storage.select_issue_ids(&query)?.into_iter().collect();
        debug!(
            environment = %environment.name,
            applied = ?applied,
            candidates = candidates.len(),
            "environment base query"
        );
        if candidates.is_empty() {
            return Ok(empty());
        }

        let values = self
            .tag_store
            .environment_values(project.id, &environment.name, &candidates)?;
        let (values, _) =
            QueryBuilder::new(ENVIRONMENT_VALUE_CONDITIONS).build(values, params, &scope)?;
        let scores: HashMap<i64, i64> = values
            .iter()
            .map(|value| {
                let input = RankInput {
                    first_seen_ms: to_millis(value.first_seen),
                    last_seen_ms: to_millis(value.last_seen),
                    times_seen: value.times_seen,
                };
                (value.issue_id, self.rank.score(&input))
            })
            .collect();

        let candidates = self.intersect_tags(project.id, scores.keys().copied().collect(), &tags)?;
        if candidates.is_empty() {
            return Ok(empty());
        }

        let paginator = SequencePaginator::new(
            scores
                .into_iter()
                .filter(|(id, _)| candidates.contains(id))
                .map(|(id, score)| (score, id)),
        );
        let page = paginator.paginate(page);
        self.hydrate(page)
    }

    /// Narrow `candidates` by every tag filter; each filter's match set is
    /// computed against the current candidates and intersected.
    fn intersect_tags(
        &self,
        project_id: i64,
        candidates: HashSet<i64>,
        tags: &TagFilters,
    ) -> Result<HashSet<i64>> {
        tags.iter().try_fold(candidates, |candidates, (key, value)| {
            if candidates.is_empty() {
                return Ok(candidates);
            }
            let matched = self
                .tag_store
                .issue_ids_with_tag(project_id, key, value, &candidates)?;
            let narrowed: HashSet<i64> = candidates.intersection(&matched).copied().collect();
            debug!(
                key = %key,
                before = candidates.len(),
                after = narrowed.len(),
                "tag intersection"
            );
            Ok(narrowed)
        })
    }

    fn hydrate(&self, page: Page<i64>) -> Result<Page<Issue>> {
        let mut issues = self.storage.get_issues_in_bulk(&page.results)?;
        let requested = page.results.len();
        let page = page.filter_map(|id| issues.remove(&id));
        if page.results.len() < requested {
            warn!(
                requested,
                hydrated = page.results.len(),
                "issues disappeared between ranking and hydration"
            );
        }
        Ok(page)
    }
}

/// Tag filters other than the reserved environment key.
///
/// An `environment` tag must agree with the environment being searched.
fn remaining_tags(params: &SearchParameters, environment: &Environment) -> Result<TagFilters> {
    let Some(value) = params.get("tags") else {
        return Ok(TagFilters::new());
    };
    let mut tags = value.tags("tags")?.clone();

    match tags.remove(ENVIRONMENT_TAG) {
        Some(TagValue::Exact(name)) if name != environment.name => {
            Err(SearchError::invalid_parameter(
                "tags",
                format!(
                    "environment tag '{name}' conflicts with environment '{}'",
                    environment.name
                ),
            ))
        }
        _ => Ok(tags),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::filters::FilterValue;

    fn production() -> Environment {
        Environment {
            id: 3,
            project_id: 1,
            name: "production".to_string(),
        }
    }

    fn params_with_tags(pairs: &[(&str, TagValue)]) -> SearchParameters {
        let mut params = SearchParameters::default();
        let tags = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        params.insert("tags", FilterValue::Tags(tags));
        params
    }

    #[test]
    fn test_environment_tag_is_removed_when_consistent() {
        let params = params_with_tags(&[
            (ENVIRONMENT_TAG, TagValue::exact("production")),
            ("browser", TagValue::Any),
        ]);
        let tags = remaining_tags(&params, &production()).unwrap();
        assert_eq!(tags.len(), 1);
        assert!(tags.contains_key("browser"));
    }

    #[test]
    fn test_conflicting_environment_tag_is_invalid() {
        let params = params_with_tags(&[(ENVIRONMENT_TAG, TagValue::exact("staging"))]);
        let err = remaining_tags(&params, &production()).unwrap_err();
        assert!(matches!(err, SearchError::InvalidParameter { ref field, .. } if field == "tags"));
    }

    #[test]
    fn test_no_tags_is_empty() {
        let tags = remaining_tags(&SearchParameters::default(), &production()).unwrap();
        assert!(tags.is_empty());
    }
}
