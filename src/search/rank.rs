//! Sort orders and their per-dialect ranking expressions.
//!
//! Every score is an `i64` ordered descending. The SQL projection and the
//! in-memory scorer for a given [`SortBy`] produce identical values, so SQL
//! pagination and sequence pagination agree on order.

use crate::error::Result;
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Name of the scalar function backing `priority` on `SQLite`.
pub const PRIORITY_FUNCTION: &str = "issue_priority_score";

/// Requested sort order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Most recently seen first.
    #[default]
    Date,
    /// Frequency-weighted recency.
    Priority,
    /// Most recently created first.
    New,
    /// Most events first.
    Freq,
    /// Unrecognized sort name; ranks by the generic recency expression.
    Other(String),
}

impl SortBy {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Date => "date",
            Self::Priority => "priority",
            Self::New => "new",
            Self::Freq => "freq",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "date" | "" => Self::Date,
            "priority" => Self::Priority,
            "new" => Self::New,
            "freq" => Self::Freq,
            other => Self::Other(other.to_string()),
        })
    }
}

/// SQL dialect the ranking expression is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Postgres,
    Sqlite,
    MySql,
    Oracle,
    MsSql,
}

impl Dialect {
    /// Map a database engine name to its dialect. Unknown engines use `Postgres`.
    #[must_use]
    pub fn from_engine(engine: &str) -> Self {
        let engine = engine.trim().to_lowercase();
        let engine = engine.rsplit('.').next().unwrap_or_default();
        match engine {
            "sqlite3" | "sqlite" => Self::Sqlite,
            "mysql" => Self::MySql,
            "oracle" => Self::Oracle,
            "pyodbc" | "mssql" | "sql_server" => Self::MsSql,
            _ => Self::Postgres,
        }
    }
}

/// The columns a score is computed from, in stored units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankInput {
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub times_seen: i64,
}

/// Frequency-weighted recency score.
///
/// `trunc(log10(max(times_seen, 1)) * 600 + last_seen_seconds)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn priority_score(times_seen: i64, last_seen_ms: i64) -> i64 {
    let weight = (times_seen.max(1) as f64).log10() * 600.0;
    (weight + last_seen_ms.div_euclid(1000) as f64) as i64
}

/// Ranking for one sort order on one dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankStrategy {
    pub sort_by: SortBy,
    pub dialect: Dialect,
}

impl RankStrategy {
    #[must_use]
    pub const fn new(sort_by: SortBy, dialect: Dialect) -> Self {
        Self { sort_by, dialect }
    }

    /// SQL projection computing the score over the issue alias `i`.
    #[must_use]
    pub fn sql_expression(&self) -> &'static str {
        match (&self.sort_by, self.dialect) {
            (SortBy::Date, _) => "i.last_seen",
            (SortBy::New, _) => "i.first_seen",
            (SortBy::Freq, _) => "i.times_seen",
            (SortBy::Priority, Dialect::Sqlite) => "issue_priority_score(i.times_seen, i.last_seen)",
            (SortBy::Priority, Dialect::Postgres) => {
                "CAST(TRUNC(LOG(GREATEST(i.times_seen, 1)) * 600 + FLOOR(i.last_seen / 1000.0)) AS BIGINT)"
            }
            (SortBy::Priority, Dialect::MySql) => {
                "CAST(TRUNCATE(LOG10(GREATEST(i.times_seen, 1)) * 600 + FLOOR(i.last_seen / 1000), 0) AS SIGNED)"
            }
            (SortBy::Priority, Dialect::Oracle) => {
                "TRUNC(LOG(10, GREATEST(i.times_seen, 1)) * 600 + FLOOR(i.last_seen / 1000))"
            }
            (SortBy::Priority, Dialect::MsSql) => {
                "CAST(LOG10(CASE WHEN i.times_seen > 1 THEN i.times_seen ELSE 1 END) * 600 + FLOOR(i.last_seen / 1000.0) AS BIGINT)"
            }
            (SortBy::Other(_), Dialect::Sqlite) => "(i.last_seen / 1000)",
            (SortBy::Other(_), Dialect::Postgres | Dialect::Oracle) => "FLOOR(i.last_seen / 1000)",
            (SortBy::Other(_), Dialect::MySql) => "(i.last_seen DIV 1000)",
            (SortBy::Other(_), Dialect::MsSql) => "(i.last_seen / 1000)",
        }
    }

    /// In-memory score, equal to what [`Self::sql_expression`] yields.
    #[must_use]
    pub fn score(&self, input: &RankInput) -> i64 {
        match self.sort_by {
            SortBy::Date => input.last_seen_ms,
            SortBy::New => input.first_seen_ms,
            SortBy::Freq => input.times_seen,
            SortBy::Priority => priority_score(input.times_seen, input.last_seen_ms),
            SortBy::Other(_) => input.last_seen_ms.div_euclid(1000),
        }
    }
}

/// Register the ranking scalar functions on a connection.
///
/// # Errors
///
/// Returns an error if `SQLite` rejects the function registration.
pub fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        PRIORITY_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let times_seen: i64 = ctx.get(0)?;
            let last_seen_ms: i64 = ctx.get(1)?;
            Ok(priority_score(times_seen, last_seen_ms))
        },
    )?;
    Ok(())
}
