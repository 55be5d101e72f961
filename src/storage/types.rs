use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of feedwatch appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed: one polled source URL with a globally unique title.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
}

/// The binding of one destination (room) to one feed, with its own watermark.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub feed_id: i64,
    /// Destination identifier the entries are delivered to.
    pub destination: String,
    /// Watermark: entries published at or before this instant are
    /// considered already delivered.
    pub last_check: DateTime<Utc>,
    /// Who asked for the subscription, kept as delivery context.
    pub requested_by: Option<String>,
}

/// A feed as seen from one room, for the `list` command.
#[derive(Debug, Clone)]
pub struct RoomFeed {
    pub title: String,
    pub url: String,
    pub last_check: DateTime<Utc>,
}

/// Outcome of a watch registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A new subscription was created.
    Created,
    /// The room already watches this feed; nothing changed.
    AlreadyWatching,
    /// The room already watches this feed and the watermark was
    /// explicitly overwritten with the requested start date.
    WatermarkReset,
}

/// Convert a stored unix-millisecond column into a `DateTime<Utc>`.
///
/// Watermarks are stored with millisecond precision so the strict
/// `published > last_check` comparison never loses to truncation.
pub(crate) fn datetime_from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
