//! Core data types for `issue_search`.
//!
//! This module defines the records the search engine reads:
//! - `Issue` - A deduplicated cluster of events (the searched entity)
//! - `IssueStatus` - Issue lifecycle states
//! - `Event` - One raw occurrence, used for event-level date narrowing
//! - `Project`, `Environment`, `Release` - Scoping and referenced entities
//! - `IssueTagValue` - Per-issue tag statistics from the tag store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Issue lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Unresolved,
    Resolved,
    Ignored,
    PendingDeletion,
    DeletionInProgress,
    PendingMerge,
}

impl IssueStatus {
    /// Statuses hidden from searches that do not ask for a status explicitly.
    pub const HIDDEN_BY_DEFAULT: [Self; 3] = [
        Self::PendingDeletion,
        Self::DeletionInProgress,
        Self::PendingMerge,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Resolved => "resolved",
            Self::Ignored => "ignored",
            Self::PendingDeletion => "pending_deletion",
            Self::DeletionInProgress => "deletion_in_progress",
            Self::PendingMerge => "pending_merge",
        }
    }

    #[must_use]
    pub const fn is_hidden_by_default(&self) -> bool {
        matches!(
            self,
            Self::PendingDeletion | Self::DeletionInProgress | Self::PendingMerge
        )
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = crate::error::SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unresolved" => Ok(Self::Unresolved),
            "resolved" => Ok(Self::Resolved),
            "ignored" => Ok(Self::Ignored),
            "pending_deletion" => Ok(Self::PendingDeletion),
            "deletion_in_progress" => Ok(Self::DeletionInProgress),
            "pending_merge" => Ok(Self::PendingMerge),
            other => Err(crate::error::SearchError::InvalidStatus {
                status: other.to_string(),
            }),
        }
    }
}

/// A searchable issue (error group).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    /// Issue ID, unique across projects.
    pub id: i64,

    /// Owning project.
    pub project_id: i64,

    /// Lifecycle status.
    #[serde(default)]
    pub status: IssueStatus,

    /// Representative message.
    pub message: String,

    /// Code location blamed for the issue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culprit: Option<String>,

    /// First occurrence.
    pub first_seen: DateTime<Utc>,

    /// Most recent occurrence.
    pub last_seen: DateTime<Utc>,

    /// When the issue last became active (e.g. regressed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_at: Option<DateTime<Utc>>,

    /// Number of events seen. Monotonic.
    pub times_seen: i64,

    /// Release the issue was first seen in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_release_id: Option<i64>,
}

/// One raw occurrence belonging to an issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub event_id: String,
    pub project_id: i64,
    pub issue_id: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A project: the scope every search runs in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub organization_id: i64,
    pub slug: String,
}

/// A named deployment context (e.g. production) within a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Environment {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
}

/// A versioned deployment artifact, owned by an organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub id: i64,
    pub organization_id: i64,
    pub version: String,
}

/// Per-issue tag statistics as recorded by the tag store.
///
/// For the reserved `environment` key these counters are the issue's
/// statistics scoped to that environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueTagValue {
    pub issue_id: i64,
    pub key: String,
    pub value: String,
    pub times_seen: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
