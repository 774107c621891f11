//! Storage layer: `SQLite` issue storage and the tag store.

pub mod events;
pub mod schema;
pub mod sqlite;
pub mod tagstore;

pub use sqlite::{ISSUE_COLUMNS, SqliteStorage};
pub use tagstore::TagStore;
