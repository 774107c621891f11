//! Structured error output for the `isearch` CLI.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags
//! - Context for debugging

use crate::error::SearchError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Database Errors (exit code 2) ===
    /// Database file not found
    DatabaseNotFound,
    /// Database operation failed
    DatabaseError,

    // === Lookup Errors (exit code 3) ===
    /// Project does not exist
    ProjectNotFound,
    /// Environment is not part of the project
    EnvironmentNotFound,

    // === Parameter Errors (exit code 4) ===
    /// Malformed or contradictory search parameter
    InvalidParameter,
    /// Unknown status value
    InvalidStatus,

    // === Config Errors (exit code 7) ===
    /// Configuration error
    ConfigError,

    // === I/O Errors (exit code 8) ===
    /// File I/O error
    IoError,
    /// JSON serialization error
    JsonError,
    /// YAML parsing error
    YamlError,

    // === Internal Errors (exit code 1) ===
    /// Unexpected internal error
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::EnvironmentNotFound => "ENVIRONMENT_NOT_FOUND",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether fixing the input and retrying can succeed.
    ///
    /// Storage failures are not marked retryable here: retry policy belongs to
    /// the storage client.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidParameter | Self::InvalidStatus)
    }

    /// Get the exit code for this error category.
    ///
    /// - 1: Internal/unknown errors
    /// - 2: Database errors
    /// - 3: Lookup errors
    /// - 4: Parameter errors
    /// - 7: Config errors
    /// - 8: I/O errors
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DatabaseNotFound | Self::DatabaseError => 2,
            Self::ProjectNotFound | Self::EnvironmentNotFound => 3,
            Self::InvalidParameter | Self::InvalidStatus => 4,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError | Self::YamlError => 8,
            Self::InternalError => 1,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from a `SearchError`.
    #[must_use]
    pub fn from_error(err: &SearchError) -> Self {
        let (code, context) = Self::extract_code_and_context(err);
        let hint = Self::generate_hint(err);

        Self {
            code,
            message: err.to_string(),
            hint,
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Serialize to JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut output = String::new();

        if color {
            output.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            output.push_str("Error: ");
        }

        output.push_str(&self.message);

        if let Some(hint) = &self.hint {
            output.push('\n');
            if color {
                output.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                output.push_str("Hint: ");
            }
            output.push_str(hint);
        }

        output
    }

    fn extract_code_and_context(err: &SearchError) -> (ErrorCode, Option<Value>) {
        match err {
            SearchError::DatabaseNotFound { path } => (
                ErrorCode::DatabaseNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            SearchError::Database(_) => (ErrorCode::DatabaseError, None),
            SearchError::ProjectNotFound { id } => {
                (ErrorCode::ProjectNotFound, Some(json!({"project_id": id})))
            }
            SearchError::EnvironmentNotFound {
                project_id,
                environment,
            } => (
                ErrorCode::EnvironmentNotFound,
                Some(json!({"project_id": project_id, "environment": environment})),
            ),
            SearchError::InvalidParameter { field, reason } => (
                ErrorCode::InvalidParameter,
                Some(json!({"field": field, "reason": reason})),
            ),
            SearchError::InvalidStatus { status } => (
                ErrorCode::InvalidStatus,
                Some(json!({"provided": status, "valid_values": VALID_STATUSES})),
            ),
            SearchError::Config(_) => (ErrorCode::ConfigError, None),
            SearchError::Io(_) => (ErrorCode::IoError, None),
            SearchError::Json(_) => (ErrorCode::JsonError, None),
            SearchError::Yaml(_) => (ErrorCode::YamlError, None),
            SearchError::Other(_) => (ErrorCode::InternalError, None),
        }
    }

    fn generate_hint(err: &SearchError) -> Option<String> {
        match err {
            SearchError::InvalidStatus { status } => match detect_status_intent(status) {
                Some(detected) => Some(format!("Did you mean --status {detected}?")),
                None => err.suggestion().map(str::to_string),
            },
            _ => err.suggestion().map(str::to_string),
        }
    }
}

const VALID_STATUSES: [&str; 6] = [
    "unresolved",
    "resolved",
    "ignored",
    "pending_deletion",
    "deletion_in_progress",
    "pending_merge",
];

/// Status synonyms for intent detection.
static STATUS_SYNONYMS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    [
        ("open", "unresolved"),
        ("active", "unresolved"),
        ("new", "unresolved"),
        ("closed", "resolved"),
        ("fixed", "resolved"),
        ("done", "resolved"),
        ("muted", "ignored"),
        ("snoozed", "ignored"),
        ("deleted", "pending_deletion"),
        ("merging", "pending_merge"),
    ]
    .into_iter()
    .collect()
});

/// Detect what status the user likely meant.
fn detect_status_intent(input: &str) -> Option<&'static str> {
    let lower = input.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    if let Some(&canonical) = STATUS_SYNONYMS.get(lower.as_str()) {
        return Some(canonical);
    }

    VALID_STATUSES
        .iter()
        .copied()
        .find(|status| status.starts_with(&lower))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::EnvironmentNotFound.as_str(), "ENVIRONMENT_NOT_FOUND");
        assert_eq!(ErrorCode::InvalidParameter.as_str(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_error_code_exit_codes() {
        assert_eq!(ErrorCode::DatabaseError.exit_code(), 2);
        assert_eq!(ErrorCode::ProjectNotFound.exit_code(), 3);
        assert_eq!(ErrorCode::InvalidParameter.exit_code(), 4);
        assert_eq!(ErrorCode::ConfigError.exit_code(), 7);
        assert_eq!(ErrorCode::IoError.exit_code(), 8);
        assert_eq!(ErrorCode::InternalError.exit_code(), 1);
    }

    #[test]
    fn test_storage_errors_not_retryable() {
        assert!(!ErrorCode::DatabaseError.is_retryable());
        assert!(ErrorCode::InvalidParameter.is_retryable());
    }

    #[test]
    fn test_from_error_invalid_parameter() {
        let err = SearchError::invalid_parameter("cursor", "malformed token");
        let structured = StructuredError::from_error(&err);
        let json = structured.to_json();
        assert_eq!(json["error"]["code"], "INVALID_PARAMETER");
        assert_eq!(json["error"]["context"]["field"], "cursor");
        assert!(json["error"]["retryable"].as_bool().unwrap());
    }

    #[test]
    fn test_detect_status_intent() {
        assert_eq!(detect_status_intent("open"), Some("unresolved"));
        assert_eq!(detect_status_intent("Fixed"), Some("resolved"));
        assert_eq!(detect_status_intent("pending_d"), Some("pending_deletion"));
        assert_eq!(detect_status_intent("xyz"), None);
    }

    #[test]
    fn test_invalid_status_hint() {
        let err = SearchError::InvalidStatus {
            status: "muted".to_string(),
        };
        let structured = StructuredError::from_error(&err);
        assert_eq!(
            structured.hint.as_deref(),
            Some("Did you mean --status ignored?")
        );
    }

    #[test]
    fn test_to_human_output() {
        let err = SearchError::ProjectNotFound { id: 9 };
        let human = StructuredError::from_error(&err).to_human(false);
        assert_eq!(human, "Error: Project not found: 9");
    }
}
