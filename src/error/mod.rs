//! Error types and handling for `issue_search`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration for ambient layers (CLI, config)
//! - Storage failures are wrapped unmodified; nothing here retries
//! - Provides structured JSON output for the CLI via [`StructuredError`]

mod structured;

pub use structured::{ErrorCode, StructuredError};

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    // === Storage Errors ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// `SQLite` database error, propagated as-is from the storage layer.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Lookup Errors ===
    /// Project with the specified ID does not exist.
    #[error("Project not found: {id}")]
    ProjectNotFound { id: i64 },

    /// Environment is not attached to the project being searched.
    #[error("Environment '{environment}' not found in project {project_id}")]
    EnvironmentNotFound {
        project_id: i64,
        environment: String,
    },

    // === Parameter Errors ===
    /// Contradictory or malformed search parameter.
    #[error("Invalid parameter: {field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    /// Unknown issue status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    // === Configuration Errors ===
    /// Configuration file or value error.
    #[error("Configuration error: {0}")]
    Config(String),

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SearchError {
    /// Can the caller fix this by changing the request?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::ProjectNotFound { .. }
                | Self::EnvironmentNotFound { .. }
                | Self::InvalidParameter { .. }
                | Self::InvalidStatus { .. }
                | Self::Config(_)
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::DatabaseNotFound { .. } => Some("Check --db or run: isearch init"),
            Self::EnvironmentNotFound { .. } => {
                Some("Use an environment id that belongs to the searched project")
            }
            Self::InvalidStatus { .. } => Some(
                "Valid statuses: unresolved, resolved, ignored, pending_deletion, \
                 deletion_in_progress, pending_merge",
            ),
            _ => None,
        }
    }

    /// Create an invalid-parameter error for a specific field.
    #[must_use]
    pub fn invalid_parameter(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type using `SearchError`.
pub type Result<T> = std::result::Result<T, SearchError>;
