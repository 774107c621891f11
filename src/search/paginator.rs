//! Cursor pagination over ranked results.
//!
//! Results are totally ordered by `(score DESC, id DESC)`. A [`Cursor`] is a
//! position in that order, so a page is "the rows strictly after (or before)
//! this position". Rows inserted or deleted elsewhere never shift a page, and
//! a cursor whose row has been deleted still seeks to the right place.
//!
//! Two implementations share the contract: [`SqlPaginator`] seeks with a
//! keyset predicate in SQL, [`SequencePaginator`] seeks a sorted in-memory
//! sequence.

use crate::error::{Result, SearchError};
use crate::model::Issue;
use crate::search::query::{IssueQuery, SqlParam};
use crate::search::rank::RankStrategy;
use crate::storage::{ISSUE_COLUMNS, SqliteStorage};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;
use tracing::debug;

/// A position in the ranked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor {
    /// Sort score of the row at this position.
    pub value: i64,
    /// Issue id of the row at this position.
    pub id: i64,
    /// Page toward higher-ranked rows instead of lower-ranked ones.
    pub is_prev: bool,
}

impl Cursor {
    #[must_use]
    pub const fn new(value: i64, id: i64, is_prev: bool) -> Self {
        Self { value, id, is_prev }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.value, self.id, u8::from(self.is_prev))
    }
}

impl FromStr for Cursor {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || {
            SearchError::invalid_parameter("cursor", format!("expected <value>:<id>:<0|1>, got '{s}'"))
        };

        let mut parts = s.trim().split(':');
        let (Some(value), Some(id), Some(is_prev), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        let value = value.parse::<i64>().map_err(|_| malformed())?;
        let id = id.parse::<i64>().map_err(|_| malformed())?;
        let is_prev = match is_prev {
            "0" => false,
            "1" => true,
            _ => return Err(malformed()),
        };
        Ok(Self { value, id, is_prev })
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Total result count, exact or capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum Hits {
    Exact(u64),
    /// More than the cap matched; the count stopped at the cap.
    AtLeast(u64),
}

impl Hits {
    /// Interpret a count taken with a `max_hits + 1` limit.
    #[must_use]
    pub fn from_capped_count(count: u64, max_hits: u64) -> Self {
        if count > max_hits {
            Self::AtLeast(max_hits)
        } else {
            Self::Exact(count)
        }
    }
}

impl fmt::Display for Hits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{n}"),
            Self::AtLeast(n) => write!(f, "{n}+"),
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub next: Option<Cursor>,
    pub prev: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hits: Option<Hits>,
}

impl<T> Page<T> {
    /// A page with no rows and no cursors.
    #[must_use]
    pub const fn empty(hits: Option<Hits>) -> Self {
        Self {
            results: Vec::new(),
            next: None,
            prev: None,
            hits,
        }
    }

    /// Replace every row, keeping cursors and hits.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            results: self.results.into_iter().map(f).collect(),
            next: self.next,
            prev: self.prev,
            hits: self.hits,
        }
    }

    /// Replace rows, dropping those `f` rejects. Cursors are positional and
    /// stay valid.
    pub fn filter_map<U>(self, f: impl FnMut(T) -> Option<U>) -> Page<U> {
        Page {
            results: self.results.into_iter().filter_map(f).collect(),
            next: self.next,
            prev: self.prev,
            hits: self.hits,
        }
    }
}

/// Paging parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub cursor: Option<Cursor>,
    pub count_hits: bool,
    pub max_hits: usize,
}

impl PageRequest {
    fn is_backward(&self) -> bool {
        self.cursor.is_some_and(|c| c.is_prev)
    }
}

/// Build a page from rows fetched in scan order.
///
/// Scan order is nearest-to-cursor first: descending when paging forward,
/// ascending when paging backward. `rows` holds at most `limit + 1` entries
/// of `(score, id, row)`; the extra entry only signals that more rows exist.
fn assemble<T>(mut rows: Vec<(i64, i64, T)>, request: &PageRequest, hits: Option<Hits>) -> Page<T> {
    let limit = request.limit.max(1);
    let has_more = rows.len() > limit;
    rows.truncate(limit);

    if rows.is_empty() {
        return empty_page(request, hits);
    }

    let backward = request.is_backward();
    if backward {
        rows.reverse();
    }

    let first = rows.first().map(|(score, id, _)| Cursor::new(*score, *id, true));
    let last = rows.last().map(|(score, id, _)| Cursor::new(*score, *id, false));

    let (next, prev) = if backward {
        (last, if has_more { first } else { None })
    } else {
        (
            if has_more { last } else { None },
            if request.cursor.is_some() { first } else { None },
        )
    };

    debug!(rows = rows.len(), has_more, backward, "assembled page");

    Page {
        results: rows.into_iter().map(|(_, _, row)| row).collect(),
        next,
        prev,
        hits,
    }
}

/// A page with no rows. A forward cursor past the last row still links back
/// to the rows before it.
pub(crate) fn empty_page<T>(request: &PageRequest, hits: Option<Hits>) -> Page<T> {
    let mut page = Page::empty(hits);
    if let Some(cursor) = request.cursor
        && !cursor.is_prev
    {
        page.prev = Some(Cursor::new(cursor.value, cursor.id, true));
    }
    page
}

/// Keyset-seek pagination of an [`IssueQuery`] in SQL.
pub struct SqlPaginator<'a> {
    storage: &'a SqliteStorage,
    query: &'a IssueQuery,
    rank: &'a RankStrategy,
}

impl<'a> SqlPaginator<'a> {
    #[must_use]
    pub const fn new(storage: &'a SqliteStorage, query: &'a IssueQuery, rank: &'a RankStrategy) -> Self {
        Self {
            storage,
            query,
            rank,
        }
    }

    /// Fetch the page described by `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query fails.
    pub fn paginate(&self, request: &PageRequest) -> Result<Page<Issue>> {
        if self.query.is_empty() {
            let hits = request.count_hits.then_some(Hits::Exact(0));
            return Ok(empty_page(request, hits));
        }

        let (sql, params) = self.page_sql(request);
        let rows = self.storage.select_ranked_issues(&sql, &params)?;
        let rows = rows
            .into_iter()
            .map(|(score, issue)| (score, issue.id, issue))
            .collect();

        let hits = if request.count_hits {
            let (sql, params) = self.count_sql(request.max_hits);
            let count = self.storage.count_rows(&sql, &params)?;
            Some(Hits::from_capped_count(count, request.max_hits as u64))
        } else {
            None
        };

        Ok(assemble(rows, request, hits))
    }

    fn page_sql(&self, request: &PageRequest) -> (String, Vec<SqlParam>) {
        let projection = format!("{ISSUE_COLUMNS}, {} AS sort_value", self.rank.sql_expression());
        let (inner, mut params) = self.query.to_sql(&projection);

        let (seek, order) = match request.cursor {
            None => (None, "DESC"),
            Some(cursor) if cursor.is_prev => (
                Some((cursor, "(sort_value > ? OR (sort_value = ? AND id > ?))")),
                "ASC",
            ),
            Some(cursor) => (
                Some((cursor, "(sort_value < ? OR (sort_value = ? AND id < ?))")),
                "DESC",
            ),
        };

        let mut sql = format!("SELECT * FROM ({inner}) ranked");
        if let Some((cursor, predicate)) = seek {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
            params.extend([
                SqlParam::Int(cursor.value),
                SqlParam::Int(cursor.value),
                SqlParam::Int(cursor.id),
            ]);
        }
        let _ = write!(sql, " ORDER BY sort_value {order}, id {order} LIMIT ?");
        params.push(SqlParam::Int(
            i64::try_from(request.limit.max(1)).unwrap_or(i64::MAX).saturating_add(1),
        ));

        tracing::trace!(sql = %sql, "page query");
        (sql, params)
    }

    fn count_sql(&self, max_hits: usize) -> (String, Vec<SqlParam>) {
        let (inner, mut params) = self.query.to_sql("i.id");
        params.push(SqlParam::Int(i64::try_from(max_hits).unwrap_or(i64::MAX).saturating_add(1)));
        (format!("SELECT COUNT(*) FROM ({inner} LIMIT ?)"), params)
    }
}

/// Pagination over an in-memory ranked sequence of issue ids.
#[derive(Debug, Clone, Default)]
pub struct SequencePaginator {
    /// `(score, id)` sorted descending.
    entries: Vec<(i64, i64)>,
}

impl SequencePaginator {
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (i64, i64)>) -> Self {
        let mut entries: Vec<(i64, i64)> = entries.into_iter().collect();
        entries.sort_unstable_by(|a, b| b.cmp(a));
        entries.dedup();
        Self { entries }
    }

    /// Page of issue ids described by `request`.
    #[must_use]
    pub fn paginate(&self, request: &PageRequest) -> Page<i64> {
        let fetch = request.limit.max(1).saturating_add(1);
        let hits = request.count_hits.then(|| {
            Hits::from_capped_count(self.entries.len() as u64, request.max_hits as u64)
        });

        let rows: Vec<(i64, i64, i64)> = match request.cursor {
            None => self.entries.iter().take(fetch).map(|&(s, id)| (s, id, id)).collect(),
            Some(cursor) => {
                let position = (cursor.value, cursor.id);
                if cursor.is_prev {
                    let end = self.entries.partition_point(|&entry| entry > position);
                    self.entries[..end]
                        .iter()
                        .rev()
                        .take(fetch)
                        .map(|&(s, id)| (s, id, id))
                        .collect()
                } else {
                    let start = self.entries.partition_point(|&entry| entry >= position);
                    self.entries[start..]
                        .iter()
                        .take(fetch)
                        .map(|&(s, id)| (s, id, id))
                        .collect()
                }
            }
        };

        assemble(rows, request, hits)
    }
}
