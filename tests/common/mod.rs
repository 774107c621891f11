#![allow(dead_code)]

use issue_search::model::Project;
use issue_search::search::paginator::Page;
use issue_search::search::{SearchBackend, SearchOptions, SearchRequest};
use issue_search::storage::SqliteStorage;
use std::sync::Once;
use std::time::Instant;
use tempfile::TempDir;
use tracing::info;

pub mod fixtures;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        issue_search::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!(
            "{}: assertions passed (elapsed {:?})",
            self.name,
            self.start.elapsed()
        );
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

pub fn test_db() -> SqliteStorage {
    init_test_logging();
    SqliteStorage::open_memory().expect("Failed to create test database")
}

pub fn test_db_with_dir() -> (SqliteStorage, TempDir) {
    init_test_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("isearch.db");
    let storage = SqliteStorage::open(&db_path).expect("Failed to create test database");
    (storage, dir)
}

/// Run a search with default options, panicking on error.
pub fn search(storage: &SqliteStorage, project: &Project, request: &SearchRequest) -> Page<i64> {
    search_with(storage, project, request, SearchOptions::default())
}

pub fn search_with(
    storage: &SqliteStorage,
    project: &Project,
    request: &SearchRequest,
    options: SearchOptions,
) -> Page<i64> {
    SearchBackend::new(storage, options)
        .search(project, request)
        .expect("search failed")
        .map(|issue| issue.id)
}

/// Ids in a page, in page order.
pub fn ids(page: &Page<i64>) -> Vec<i64> {
    page.results.clone()
}
