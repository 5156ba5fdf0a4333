use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// An insert collided with a uniqueness constraint.
    ///
    /// Raised for the canonical friendship pair key, the private-chat pair
    /// key, and the case-insensitive user email.  Callers decide whether
    /// this is an error or an idempotent hit.
    #[error("Record already exists")]
    Duplicate,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

impl StoreError {
    /// Fold a rusqlite error into the store taxonomy, turning uniqueness
    /// violations into [`StoreError::Duplicate`].
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            // SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == 2067 || e.extended_code == 1555 =>
            {
                StoreError::Duplicate
            }
            other => StoreError::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
