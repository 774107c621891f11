//! `issue_search`: ranked, cursor-paginated issue search over `SQLite`.
//!
//! The library entry point is [`SearchBackend::search`]. The `isearch`
//! binary wraps it with config loading, logging and text/JSON output.

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod model;
pub mod search;
pub mod storage;
pub mod util;

pub use error::{ErrorCode, Result, SearchError, StructuredError};
pub use search::{SearchBackend, SearchOptions, SearchRequest};
