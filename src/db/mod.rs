//! Relational store: connections, creation/drop, schema migrations and the
//! place/marker tables.

pub mod migrate;
pub mod populate;
pub mod store;

pub use migrate::{
    create_database, enforce_schema_version, get_schema_version, latest_available_version,
    upgrade_database, TargetVersion,
};
pub use populate::{MigrationStep, PopulationRegistry};
pub use store::{load_markers, load_places, LoadSummary, StoredMarker};

use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Open an existing database.
///
/// Never creates the file: a missing database is reported as
/// [`Error::DatabaseNotFound`] from the SQLite error code.
pub fn connect(config: &DatabaseConfig) -> Result<Connection> {
    let path = config.path();
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(&path, flags).map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::CannotOpen => {
            Error::DatabaseNotFound(path.clone())
        }
        other => Error::Sqlite(other),
    })?;
    configure(&conn, config)?;
    Ok(conn)
}

/// Open the database, creating the file (and its directory) if needed.
pub(crate) fn open_or_create(config: &DatabaseConfig) -> Result<Connection> {
    if !config.dir.as_os_str().is_empty() {
        fs::create_dir_all(&config.dir)?;
    }
    let conn = Connection::open(config.path())?;
    configure(&conn, config)?;
    Ok(conn)
}

fn configure(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

/// Delete the database file together with its journal siblings.
pub fn drop_database(config: &DatabaseConfig) -> Result<()> {
    let path = config.path();
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut target = path.clone().into_os_string();
        target.push(suffix);
        remove_if_present(Path::new(&target))?;
    }
    info!("Dropped database {}", path.display());
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Connect and enforce the schema version, creating the database first when
/// it does not exist yet.
pub fn ensure_database(
    config: &DatabaseConfig,
    expected: TargetVersion,
    registry: &PopulationRegistry,
) -> Result<Connection> {
    let conn = match connect(config) {
        Ok(conn) => conn,
        Err(e) if e.is_database_not_found() => {
            warn!("{}, creating it", e);
            let version = match expected {
                TargetVersion::Exact(v) => Some(v),
                TargetVersion::Latest => None,
            };
            create_database(config, version, registry)?;
            connect(config)?
        }
        Err(e) => return Err(e),
    };
    enforce_schema_version(&conn, expected, &config.schema_dir)?;
    Ok(conn)
}
