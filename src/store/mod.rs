//! Persistence: SQLite-backed catalog, sessions, results, known bugs, settings.

pub mod bugs;
pub mod catalog;
pub mod sessions;
pub mod sqlite;
pub mod stats;

pub use sqlite::Store;

/// Current wall-clock time as an RFC 3339 timestamp with milliseconds.
pub(crate) fn timestamp_now() -> String {
    sessions::timestamp(chrono::Utc::now())
}
