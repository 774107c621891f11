#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use issue_search::model::{Environment, Event, Issue, IssueStatus, IssueTagValue, Project};
use issue_search::search::filters::ENVIRONMENT_TAG;
use issue_search::storage::SqliteStorage;

pub const ORG_ID: i64 = 1;

/// Fixed base time so ordering assertions are deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_735_689_600, 0).unwrap() // 2025-01-01 00:00:00 UTC
}

/// `base_time()` plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

pub fn project(id: i64) -> Project {
    Project {
        id,
        organization_id: ORG_ID,
        slug: format!("project-{id}"),
    }
}

/// Create a project row and return it.
pub fn seed_project(storage: &mut SqliteStorage, id: i64) -> Project {
    let project = project(id);
    storage.create_project(&project).unwrap();
    project
}

pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    pub fn new(id: i64, project_id: i64) -> Self {
        Self {
            issue: Issue {
                id,
                project_id,
                status: IssueStatus::Unresolved,
                message: format!("issue {id}"),
                culprit: None,
                first_seen: base_time(),
                last_seen: base_time(),
                active_at: None,
                times_seen: 1,
                first_release_id: None,
            },
        }
    }

    pub fn message(mut self, message: &str) -> Self {
        self.issue.message = message.to_string();
        self
    }

    pub fn culprit(mut self, culprit: &str) -> Self {
        self.issue.culprit = Some(culprit.to_string());
        self
    }

    pub fn status(mut self, status: IssueStatus) -> Self {
        self.issue.status = status;
        self
    }

    pub fn first_seen(mut self, at: DateTime<Utc>) -> Self {
        self.issue.first_seen = at;
        if self.issue.last_seen < at {
            self.issue.last_seen = at;
        }
        self
    }

    pub fn last_seen(mut self, at: DateTime<Utc>) -> Self {
        self.issue.last_seen = at;
        self
    }

    pub fn active_at(mut self, at: DateTime<Utc>) -> Self {
        self.issue.active_at = Some(at);
        self
    }

    pub fn times_seen(mut self, times_seen: i64) -> Self {
        self.issue.times_seen = times_seen;
        self
    }

    pub fn first_release(mut self, release_id: i64) -> Self {
        self.issue.first_release_id = Some(release_id);
        self
    }

    pub fn build(self) -> Issue {
        self.issue
    }

    pub fn insert(self, storage: &mut SqliteStorage) -> Issue {
        let issue = self.issue;
        storage.create_issue(&issue).unwrap();
        issue
    }
}

/// Record one event for an issue.
pub fn seed_event(storage: &mut SqliteStorage, issue: &Issue, event_id: &str, at: DateTime<Utc>) {
    storage
        .record_event(&Event {
            event_id: event_id.to_string(),
            project_id: issue.project_id,
            issue_id: issue.id,
            message: issue.message.clone(),
            timestamp: at,
        })
        .unwrap();
}

/// Record a tag value seen once at the issue's `last_seen`.
pub fn seed_tag(storage: &mut SqliteStorage, issue: &Issue, key: &str, value: &str) {
    storage
        .record_tag_value(
            issue.project_id,
            &IssueTagValue {
                issue_id: issue.id,
                key: key.to_string(),
                value: value.to_string(),
                times_seen: 1,
                first_seen: issue.first_seen,
                last_seen: issue.last_seen,
            },
        )
        .unwrap();
}

/// Per-environment statistics for [`seed_in_environment`].
#[derive(Debug, Clone, Copy)]
pub struct EnvStats {
    pub times_seen: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl EnvStats {
    pub fn new(times_seen: i64, first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) -> Self {
        Self {
            times_seen,
            first_seen,
            last_seen,
        }
    }
}

/// Attach an issue to an environment: membership row plus the
/// environment-scoped statistics in the tag store.
pub fn seed_in_environment(
    storage: &mut SqliteStorage,
    issue: &Issue,
    environment: &Environment,
    stats: EnvStats,
) {
    storage
        .add_issue_environment(issue.id, environment.id, None)
        .unwrap();
    storage
        .record_tag_value(
            issue.project_id,
            &IssueTagValue {
                issue_id: issue.id,
                key: ENVIRONMENT_TAG.to_string(),
                value: environment.name.clone(),
                times_seen: stats.times_seen,
                first_seen: stats.first_seen,
                last_seen: stats.last_seen,
            },
        )
        .unwrap();
}

/// Seed `count` unresolved issues with distinct `last_seen` minutes.
///
/// Issue `n` (1-based, id `base_id + n`) is last seen at minute `n`, so the
/// default date sort returns them highest id first.
pub fn seed_issues(storage: &mut SqliteStorage, project: &Project, base_id: i64, count: i64) -> Vec<Issue> {
    (1..=count)
        .map(|n| {
            IssueBuilder::new(base_id + n, project.id)
                .last_seen(at(n))
                .times_seen(n)
                .insert(storage)
        })
        .collect()
}
