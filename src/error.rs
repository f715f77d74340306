use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error kinds surfaced by the mapify library.
///
/// The migration-time kinds (`SchemaFileNotFound`, `SchemaApplication`,
/// `DataPopulation`) are kept apart so callers can report them distinctly,
/// and `DatabaseNotFound` is split from `Database` so callers can decide to
/// create the store instead of failing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("input data error: {0}")]
    InputData(String),
    #[error("schema file {} not found", .0.display())]
    SchemaFileNotFound(PathBuf),
    #[error("error applying {step} schema: {reason}")]
    SchemaApplication { step: String, reason: String },
    #[error("error populating data for {step}: {reason}")]
    DataPopulation { step: String, reason: String },
    #[error("database {} does not exist", .0.display())]
    DatabaseNotFound(PathBuf),
    #[error("database error: {0}")]
    Database(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_database_not_found(&self) -> bool {
        matches!(self, Error::DatabaseNotFound(_))
    }

    /// True when another connection held the store's lock past the busy
    /// timeout.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// True for any failure raised by the store, including driver errors.
    pub fn is_database(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Sqlite(_)
                | Error::DatabaseNotFound(_)
                | Error::SchemaFileNotFound(_)
                | Error::SchemaApplication { .. }
                | Error::DataPopulation { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
