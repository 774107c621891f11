//! Typed search filters and the named parameter map derived from them.
//!
//! [`SearchFilters`] is what callers fill in. [`SearchFilters::parameters`]
//! turns it into a [`SearchParameters`] map holding only the parameters that
//! are present; a name missing from the map is "undefined" and its condition
//! never runs.

use crate::error::{Result, SearchError};
use crate::model::IssueStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Reserved tag key carrying the environment name.
pub const ENVIRONMENT_TAG: &str = "environment";

/// Value side of a tag filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagValue {
    /// The tag must carry exactly this value.
    Exact(String),
    /// The tag key must exist; any value matches.
    Any,
}

impl TagValue {
    #[must_use]
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{value}"),
            Self::Any => write!(f, "*"),
        }
    }
}

/// Tag filters keyed by tag name. Ordered so query plans are reproducible.
pub type TagFilters = BTreeMap<String, TagValue>;

/// Parse a `key=value` or `key:*` tag filter expression.
///
/// # Errors
///
/// Returns `InvalidParameter` if the key is empty or no separator is present.
pub fn parse_tag_filter(expr: &str) -> Result<(String, TagValue)> {
    let (key, value) = if let Some(key) = expr.strip_suffix(":*") {
        (key, TagValue::Any)
    } else if let Some((key, value)) = expr.split_once('=') {
        (key, TagValue::Exact(value.to_string()))
    } else {
        return Err(SearchError::invalid_parameter(
            "tags",
            format!("expected key=value or key:*, got '{expr}'"),
        ));
    };

    let key = key.trim();
    if key.is_empty() {
        return Err(SearchError::invalid_parameter("tags", "tag key cannot be empty"));
    }
    Ok((key.to_string(), value))
}

/// First-release filter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseFilter {
    /// Issues first seen in this release version.
    Version(String),
    /// The caller asked for a release that is not configured: nothing can match.
    NoValue,
}

impl FromStr for ReleaseFilter {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SearchError::invalid_parameter(
                "first_release",
                "release version cannot be empty",
            ));
        }
        if s.eq_ignore_ascii_case("none") {
            return Ok(Self::NoValue);
        }
        Ok(Self::Version(s.to_string()))
    }
}

/// Which end of a range a bound sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lower,
    Upper,
}

/// One end of a scalar range with its inclusive flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound<T> {
    pub value: T,
    pub inclusive: bool,
}

impl<T> Bound<T> {
    #[must_use]
    pub const fn inclusive(value: T) -> Self {
        Self {
            value,
            inclusive: true,
        }
    }

    #[must_use]
    pub const fn exclusive(value: T) -> Self {
        Self {
            value,
            inclusive: false,
        }
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Bound<U> {
        Bound {
            value: f(self.value),
            inclusive: self.inclusive,
        }
    }

    /// SQL comparison operator for this bound on the given side.
    #[must_use]
    pub const fn operator(&self, side: Side) -> &'static str {
        match (side, self.inclusive) {
            (Side::Lower, true) => ">=",
            (Side::Lower, false) => ">",
            (Side::Upper, true) => "<=",
            (Side::Upper, false) => "<",
        }
    }
}

impl<T: PartialOrd> Bound<T> {
    /// In-memory equivalent of [`Bound::operator`].
    pub fn admits(&self, side: Side, candidate: &T) -> bool {
        match (side, self.inclusive) {
            (Side::Lower, true) => *candidate >= self.value,
            (Side::Lower, false) => *candidate > self.value,
            (Side::Upper, true) => *candidate <= self.value,
            (Side::Upper, false) => *candidate < self.value,
        }
    }
}

/// Caller-facing search filters.
///
/// `None` means "not provided". `unassigned: Some(false)` is meaningful and
/// selects issues that have an assignee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Case-insensitive substring over message and culprit.
    pub query: Option<String>,
    pub status: Option<IssueStatus>,
    pub tags: TagFilters,
    pub bookmarked_by: Option<i64>,
    pub assigned_to: Option<i64>,
    pub unassigned: Option<bool>,
    pub subscribed_by: Option<i64>,
    pub first_release: Option<ReleaseFilter>,
    pub environment_id: Option<i64>,
    pub age_from: Option<Bound<DateTime<Utc>>>,
    pub age_to: Option<Bound<DateTime<Utc>>>,
    pub last_seen_from: Option<Bound<DateTime<Utc>>>,
    pub last_seen_to: Option<Bound<DateTime<Utc>>>,
    /// Event-level range; narrows to issues with an event in range.
    pub date_from: Option<Bound<DateTime<Utc>>>,
    pub date_to: Option<Bound<DateTime<Utc>>>,
    pub active_at_from: Option<Bound<DateTime<Utc>>>,
    pub active_at_to: Option<Bound<DateTime<Utc>>>,
    pub times_seen: Option<i64>,
    pub times_seen_lower: Option<Bound<i64>>,
    pub times_seen_upper: Option<Bound<i64>>,
}

impl SearchFilters {
    /// Named parameters for every filter that is present.
    ///
    /// A blank `query` and an empty `tags` map count as absent. `unassigned`
    /// is dropped when `assigned_to` is set.
    #[must_use]
    pub fn parameters(&self) -> SearchParameters {
        let mut params = SearchParameters::default();

        if let Some(query) = self.query.as_deref().map(str::trim)
            && !query.is_empty()
        {
            params.insert("query", FilterValue::Text(query.to_string()));
        }
        if let Some(status) = self.status {
            params.insert("status", FilterValue::Status(status));
        }
        if !self.tags.is_empty() {
            params.insert("tags", FilterValue::Tags(self.tags.clone()));
        }
        if let Some(user) = self.bookmarked_by {
            params.insert("bookmarked_by", FilterValue::User(user));
        }
        if let Some(user) = self.assigned_to {
            params.insert("assigned_to", FilterValue::User(user));
        } else if let Some(unassigned) = self.unassigned {
            params.insert("unassigned", FilterValue::Flag(unassigned));
        }
        if let Some(user) = self.subscribed_by {
            params.insert("subscribed_by", FilterValue::User(user));
        }
        if let Some(release) = &self.first_release {
            params.insert("first_release", FilterValue::Release(release.clone()));
        }

        let timestamps = [
            ("age_from", self.age_from),
            ("age_to", self.age_to),
            ("last_seen_from", self.last_seen_from),
            ("last_seen_to", self.last_seen_to),
            ("date_from", self.date_from),
            ("date_to", self.date_to),
            ("active_at_from", self.active_at_from),
            ("active_at_to", self.active_at_to),
        ];
        for (name, bound) in timestamps {
            if let Some(bound) = bound {
                params.insert(name, FilterValue::Timestamp(bound));
            }
        }

        if let Some(times_seen) = self.times_seen {
            params.insert("times_seen", FilterValue::Count(times_seen));
        }
        if let Some(bound) = self.times_seen_lower {
            params.insert("times_seen_lower", FilterValue::CountBound(bound));
        }
        if let Some(bound) = self.times_seen_upper {
            params.insert("times_seen_upper", FilterValue::CountBound(bound));
        }

        params
    }
}

/// A present parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Status(IssueStatus),
    Tags(TagFilters),
    User(i64),
    Flag(bool),
    Release(ReleaseFilter),
    Timestamp(Bound<DateTime<Utc>>),
    Count(i64),
    CountBound(Bound<i64>),
}

impl FilterValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Status(_) => "status",
            Self::Tags(_) => "tags",
            Self::User(_) => "user",
            Self::Flag(_) => "flag",
            Self::Release(_) => "release",
            Self::Timestamp(_) => "timestamp bound",
            Self::Count(_) => "count",
            Self::CountBound(_) => "count bound",
        }
    }

    fn mismatch(&self, parameter: &str, expected: &str) -> SearchError {
        SearchError::invalid_parameter(
            parameter,
            format!("expected {expected}, got {}", self.kind()),
        )
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn text(&self, parameter: &str) -> Result<&str> {
        match self {
            Self::Text(text) => Ok(text),
            other => Err(other.mismatch(parameter, "text")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn status(&self, parameter: &str) -> Result<IssueStatus> {
        match self {
            Self::Status(status) => Ok(*status),
            other => Err(other.mismatch(parameter, "status")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn tags(&self, parameter: &str) -> Result<&TagFilters> {
        match self {
            Self::Tags(tags) => Ok(tags),
            other => Err(other.mismatch(parameter, "tags")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn user(&self, parameter: &str) -> Result<i64> {
        match self {
            Self::User(user) => Ok(*user),
            other => Err(other.mismatch(parameter, "user")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn flag(&self, parameter: &str) -> Result<bool> {
        match self {
            Self::Flag(flag) => Ok(*flag),
            other => Err(other.mismatch(parameter, "flag")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn release(&self, parameter: &str) -> Result<&ReleaseFilter> {
        match self {
            Self::Release(release) => Ok(release),
            other => Err(other.mismatch(parameter, "release")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn timestamp(&self, parameter: &str) -> Result<Bound<DateTime<Utc>>> {
        match self {
            Self::Timestamp(bound) => Ok(*bound),
            other => Err(other.mismatch(parameter, "timestamp bound")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn count(&self, parameter: &str) -> Result<i64> {
        match self {
            Self::Count(count) => Ok(*count),
            other => Err(other.mismatch(parameter, "count")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidParameter` if the value has another type.
    pub fn count_bound(&self, parameter: &str) -> Result<Bound<i64>> {
        match self {
            Self::CountBound(bound) => Ok(*bound),
            other => Err(other.mismatch(parameter, "count bound")),
        }
    }
}

/// Present parameters by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParameters {
    values: HashMap<&'static str, FilterValue>,
}

impl SearchParameters {
    pub fn insert(&mut self, name: &'static str, value: FilterValue) {
        self.values.insert(name, value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FilterValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameter names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.values.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
