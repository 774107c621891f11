// Search performance benchmarks.
//
// Run with: cargo bench
//
// Performance Targets:
// | Operation                  | Target  | Description                          |
// |----------------------------|---------|--------------------------------------|
// | First page (10k)           | < 5ms   | Date sort, limit 100, 10k issues     |
// | Deep page (10k)            | < 5ms   | Keyset seek from a mid-list cursor   |
// | Count hits (10k)           | < 10ms  | Capped count alongside a page        |
// | Environment page (2k)      | < 20ms  | In-memory rank over 2k candidates    |

use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use issue_search::model::{Environment, Issue, IssueStatus, IssueTagValue, Project};
use issue_search::search::filters::{ENVIRONMENT_TAG, SearchFilters};
use issue_search::search::paginator::Cursor;
use issue_search::search::rank::SortBy;
use issue_search::search::{SearchBackend, SearchOptions, SearchRequest};
use issue_search::storage::SqliteStorage;
use std::hint::black_box;
use std::sync::Once;
use std::time::Instant;
use tempfile::TempDir;
use tracing::info;

fn init_bench_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = issue_search::logging::init_logging(0, false, None);
    });
}

fn log_bench_start(name: &str) -> Instant {
    info!("benchmark_start: {name}");
    Instant::now()
}

fn log_bench_end(name: &str, started_at: Instant) {
    info!("benchmark_end: {name} duration={:?}", started_at.elapsed());
}

fn create_test_issue(i: i64) -> Issue {
    let base = Utc.timestamp_opt(1_735_689_600, 0).unwrap();
    Issue {
        id: i + 1,
        project_id: 1,
        status: match i % 10 {
            0 => IssueStatus::Resolved,
            1 => IssueStatus::Ignored,
            _ => IssueStatus::Unresolved,
        },
        message: format!("Benchmark error {i}"),
        culprit: Some(format!("bench.module_{}", i % 50)),
        first_seen: base + Duration::seconds(i),
        last_seen: base + Duration::seconds(i * 7 % 100_000),
        active_at: None,
        times_seen: i % 1000 + 1,
        first_release_id: None,
    }
}

/// A database with `count` issues, a fifth of them in one environment.
fn setup_db(count: i64) -> (TempDir, SqliteStorage, Project, Environment) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut storage = SqliteStorage::open(&dir.path().join("bench.db")).expect("Failed to open db");
    let project = Project {
        id: 1,
        organization_id: 1,
        slug: "bench".to_string(),
    };
    storage.create_project(&project).expect("Failed to create project");
    let environment = storage
        .create_environment(project.id, "production")
        .expect("Failed to create environment");

    for i in 0..count {
        let issue = create_test_issue(i);
        storage.create_issue(&issue).expect("Failed to create issue");
        if i % 5 == 0 {
            storage
                .add_issue_environment(issue.id, environment.id, None)
                .expect("Failed to attach environment");
            storage
                .record_tag_value(
                    project.id,
                    &IssueTagValue {
                        issue_id: issue.id,
                        key: ENVIRONMENT_TAG.to_string(),
                        value: environment.name.clone(),
                        times_seen: issue.times_seen / 2 + 1,
                        first_seen: issue.first_seen,
                        last_seen: issue.last_seen,
                    },
                )
                .expect("Failed to record environment stats");
        }
    }

    (dir, storage, project, environment)
}

fn bench_first_page(c: &mut Criterion) {
    init_bench_logging();
    let mut group = c.benchmark_group("search/first_page");

    for count in [1_000_i64, 10_000] {
        let (_dir, storage, project, _) = setup_db(count);
        let backend = SearchBackend::new(&storage, SearchOptions::default());
        group.throughput(Throughput::Elements(100));

        for sort_by in [SortBy::Date, SortBy::Priority] {
            let request = SearchRequest {
                sort_by: sort_by.clone(),
                limit: Some(100),
                ..SearchRequest::default()
            };
            let id = BenchmarkId::new(sort_by.as_str(), count);
            group.bench_with_input(id, &request, |b, request| {
                let started = log_bench_start("search/first_page");
                b.iter(|| black_box(backend.search(&project, request).expect("search failed")));
                log_bench_end("search/first_page", started);
            });
        }
    }
    group.finish();
}

fn bench_deep_page(c: &mut Criterion) {
    init_bench_logging();
    let (_dir, storage, project, _) = setup_db(10_000);
    let backend = SearchBackend::new(&storage, SearchOptions::default());

    // Walk to the middle once, then measure seeking from there.
    let mut cursor: Option<Cursor> = None;
    for _ in 0..40 {
        let page = backend
            .search(
                &project,
                &SearchRequest {
                    limit: Some(100),
                    cursor,
                    ..SearchRequest::default()
                },
            )
            .expect("search failed");
        cursor = page.next;
    }

    let request = SearchRequest {
        limit: Some(100),
        cursor,
        ..SearchRequest::default()
    };
    c.bench_function("search/deep_page/10000", |b| {
        b.iter(|| black_box(backend.search(&project, &request).expect("search failed")));
    });

    let counted = SearchRequest {
        count_hits: true,
        ..request
    };
    c.bench_function("search/count_hits/10000", |b| {
        b.iter(|| black_box(backend.search(&project, &counted).expect("search failed")));
    });
}

fn bench_environment_page(c: &mut Criterion) {
    init_bench_logging();
    let (_dir, storage, project, environment) = setup_db(10_000);
    let backend = SearchBackend::new(&storage, SearchOptions::default());
    let request = SearchRequest {
        filters: SearchFilters {
            environment_id: Some(environment.id),
            ..SearchFilters::default()
        },
        limit: Some(100),
        ..SearchRequest::default()
    };

    c.bench_function("search/environment_page/2000", |b| {
        b.iter(|| black_box(backend.search(&project, &request).expect("search failed")));
    });
}

criterion_group!(
    search_benches,
    bench_first_page,
    bench_deep_page,
    bench_environment_page
);
criterion_main!(search_benches);
