//! Issue search.
//!
//! [`SearchBackend::search`] turns a [`SearchRequest`] into one ranked,
//! cursor-paginated [`Page`] of issues. Without an environment the whole
//! search runs as SQL; with one it goes through [`environment`].

pub mod conditions;
pub mod environment;
pub mod filters;
pub mod paginator;
pub mod query;
pub mod rank;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::model::{Issue, Project};
use crate::storage::{SqliteStorage, TagStore};
use conditions::{ISSUE_CONDITIONS, QueryBuilder, SearchScope};
use environment::EnvironmentSearch;
use filters::SearchFilters;
use paginator::{Cursor, Page, PageRequest, SqlPaginator};
use query::{EventWindow, IssueQuery, narrow_by_events};
use rank::{RankStrategy, SortBy};
use tracing::debug;

/// One search call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub filters: SearchFilters,
    pub sort_by: SortBy,
    pub cursor: Option<Cursor>,
    /// Page size; the configured default when `None`.
    pub limit: Option<usize>,
    pub count_hits: bool,
}

/// Paging limits for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_hits: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
            max_hits: 1000,
        }
    }
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
            max_hits: config.max_hits,
        }
    }
}

impl SearchOptions {
    /// Requested page size, clamped to `[1, max_limit]`.
    #[must_use]
    pub fn resolve_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

/// Search entry point over a storage connection and a tag store.
pub struct SearchBackend<'a> {
    storage: &'a SqliteStorage,
    tag_store: &'a dyn TagStore,
    options: SearchOptions,
}

impl<'a> SearchBackend<'a> {
    /// Backend reading tags from the same database as the issues.
    #[must_use]
    pub const fn new(storage: &'a SqliteStorage, options: SearchOptions) -> Self {
        Self::with_tag_store(storage, storage, options)
    }

    #[must_use]
    pub const fn with_tag_store(
        storage: &'a SqliteStorage,
        tag_store: &'a dyn TagStore,
        options: SearchOptions,
    ) -> Self {
        Self {
            storage,
            tag_store,
            options,
        }
    }

    /// Run a search in `project`.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for malformed or contradictory filters
    /// - `EnvironmentNotFound` if `environment_id` is not in the project
    /// - storage errors, unmodified
    pub fn search(&self, project: &Project, request: &SearchRequest) -> Result<Page<Issue>> {
        let params = request.filters.parameters();
        let page = PageRequest {
            limit: self.options.resolve_limit(request.limit),
            cursor: request.cursor,
            count_hits: request.count_hits,
            max_hits: self.options.max_hits,
        };
        let rank = RankStrategy::new(request.sort_by.clone(), self.storage.dialect());

        debug!(
            project_id = project.id,
            parameters = ?params.names(),
            sort = %rank.sort_by,
            limit = page.limit,
            environment_id = ?request.filters.environment_id,
            "search"
        );

        if let Some(environment_id) = request.filters.environment_id {
            return EnvironmentSearch::new(self.storage, self.tag_store, &rank).search(
                project,
                environment_id,
                &params,
                &page,
            );
        }

        let scope = SearchScope {
            project,
            tag_store: self.tag_store,
            environment_id: None,
        };
        let base = IssueQuery::for_project(project.id, params.contains("status"));
        let (mut query, applied) = QueryBuilder::new(ISSUE_CONDITIONS).build(base, &params, &scope)?;
        debug!(applied = ?applied, empty = query.is_empty(), "issue query built");

        if let Some(window) = EventWindow::from_parameters(&params)? {
            query = narrow_by_events(self.storage, query, &window)?;
        }

        SqlPaginator::new(self.storage, &query, &rank).paginate(&page)
    }
}
