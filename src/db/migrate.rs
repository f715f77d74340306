//! Versioned schema migrations.
//!
//! Schema state is an integer version recorded in the `schema_version`
//! ledger. Creation applies `v{N}_create_schema.sql`; upgrades apply
//! `v{N}_to_v{N+1}_upgrade_schema.sql` one step at a time. Every migration
//! runs inside a single `BEGIN EXCLUSIVE` transaction, so concurrent
//! migrations from other processes wait on the lock instead of racing.
//!
//! Failure semantics:
//! - creation is all-or-nothing at the file level: any failure deletes the
//!   database file, provided this call created it and no other connection
//!   holds its lock,
//! - an upgrade is all-or-nothing across the whole requested range: any
//!   failure rolls back every step applied so far.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use super::populate::{MigrationStep, PopulationRegistry};
use super::{connect, drop_database, open_or_create};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::models::SchemaVersion;

pub const LEDGER_TABLE: &str = "schema_version";

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);";

/// Audit columns added to every table, with their declarations.
pub const AUDIT_COLUMNS: [(&str, &str); 4] = [
    ("create_datetime", "TEXT"),
    ("write_datetime", "TEXT"),
    ("create_user_id", "INTEGER REFERENCES users(id)"),
    ("write_user_id", "INTEGER REFERENCES users(id)"),
];

static CREATE_SCHEMA_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v(\d+)_create_schema\.sql$").unwrap());

/// Version a caller requires the store to be at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetVersion {
    Exact(u32),
    /// Highest version with a creation file in the schema directory.
    Latest,
}

// ============================================================================
// Schema Files
// ============================================================================

pub fn create_schema_file(schema_dir: &Path, version: u32) -> PathBuf {
    schema_dir.join(format!("v{}_create_schema.sql", version))
}

pub fn upgrade_schema_file(schema_dir: &Path, from: u32) -> PathBuf {
    schema_dir.join(format!("v{}_to_v{}_upgrade_schema.sql", from, from + 1))
}

/// Highest version that has a creation file in `schema_dir`.
pub fn latest_available_version(schema_dir: &Path) -> Result<u32> {
    let entries = fs::read_dir(schema_dir).map_err(|_| Error::SchemaFileNotFound(schema_dir.to_path_buf()))?;
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let caps = CREATE_SCHEMA_FILE.captures(name.to_str()?)?;
            caps[1].parse::<u32>().ok()
        })
        .max()
        .ok_or_else(|| Error::SchemaFileNotFound(create_schema_file(schema_dir, 1)))
}

fn apply_schema_file(conn: &Connection, path: &Path, step: MigrationStep) -> Result<()> {
    if !path.is_file() {
        return Err(Error::SchemaFileNotFound(path.to_path_buf()));
    }
    let sql = fs::read_to_string(path)?;
    conn.execute_batch(&sql).map_err(|e| Error::SchemaApplication {
        step: step.to_string(),
        reason: e.to_string(),
    })?;
    debug!("Applied {}", path.display());
    Ok(())
}

// ============================================================================
// Ledger
// ============================================================================

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Current schema version: the most recently applied ledger row, or `None`
/// for an un-versioned store.
pub fn get_schema_version(conn: &Connection) -> Result<Option<u32>> {
    if !table_exists(conn, LEDGER_TABLE)? {
        return Ok(None);
    }
    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY applied_at DESC, version DESC LIMIT 1",
            [],
            |row| row.get::<_, u32>(0),
        )
        .optional()?;
    Ok(version)
}

/// Every ledger row, oldest first.
pub fn applied_versions(conn: &Connection) -> Result<Vec<SchemaVersion>> {
    if !table_exists(conn, LEDGER_TABLE)? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT version, description, applied_at FROM schema_version ORDER BY applied_at, version",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SchemaVersion {
            version: row.get(0)?,
            description: row.get(1)?,
            applied_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Insert a ledger row. A row for an already-recorded version is left as is.
fn record_version(conn: &Connection, version: u32, description: &str) -> Result<()> {
    let applied_at = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, description, applied_at) VALUES (?1, ?2, ?3)",
        params![version, description, applied_at],
    )?;
    if inserted == 0 {
        debug!("Ledger already records v{}", version);
    }
    Ok(())
}

fn describe(version: Option<u32>) -> String {
    version.map_or_else(|| "no schema".to_string(), |v| format!("v{}", v))
}

// ============================================================================
// Audit Columns
// ============================================================================

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Add the audit columns to every user table lacking them, back-fill the
/// timestamps and install triggers that keep them current. Idempotent.
pub fn inject_audit_columns(conn: &Connection) -> Result<()> {
    let tables: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([LEDGER_TABLE], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        names
    };

    for table in &tables {
        let existing = table_columns(conn, table)?;
        let quoted = quote_ident(table);
        for (column, decl) in AUDIT_COLUMNS {
            if !existing.iter().any(|c| c == column) {
                conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", quoted, column, decl))?;
                debug!("Added {}.{}", table, column);
            }
        }

        conn.execute(
            &format!(
                "UPDATE {} SET create_datetime = COALESCE(create_datetime, datetime('now')),
                               write_datetime = COALESCE(write_datetime, datetime('now'))
                 WHERE create_datetime IS NULL OR write_datetime IS NULL",
                quoted
            ),
            [],
        )?;

        conn.execute_batch(&format!(
            "CREATE TRIGGER IF NOT EXISTS {insert_trigger}
             AFTER INSERT ON {t} FOR EACH ROW
             WHEN NEW.create_datetime IS NULL OR NEW.write_datetime IS NULL
             BEGIN
                 UPDATE {t} SET create_datetime = COALESCE(NEW.create_datetime, datetime('now')),
                                write_datetime = COALESCE(NEW.write_datetime, datetime('now'))
                 WHERE rowid = NEW.rowid;
             END;
             CREATE TRIGGER IF NOT EXISTS {update_trigger}
             AFTER UPDATE ON {t} FOR EACH ROW
             WHEN NEW.write_datetime IS OLD.write_datetime
             BEGIN
                 UPDATE {t} SET write_datetime = datetime('now') WHERE rowid = NEW.rowid;
             END;",
            t = quoted,
            insert_trigger = quote_ident(&format!("{}_audit_insert", table)),
            update_trigger = quote_ident(&format!("{}_audit_update", table)),
        ))?;
    }
    debug!("Audit columns present on {} table(s)", tables.len());
    Ok(())
}

// ============================================================================
// Migrations
// ============================================================================

fn apply_step(
    tx: &Transaction<'_>,
    path: &Path,
    step: MigrationStep,
    registry: &PopulationRegistry,
) -> Result<()> {
    info!("Applying {} schema", step);
    apply_schema_file(tx, path, step)?;
    inject_audit_columns(tx)?;
    registry.run(tx, step)?;
    Ok(())
}

/// Create the database at `version` (or the latest available one).
///
/// Refuses to touch a database that already carries a schema version. Any
/// failure after the file has been opened deletes it. Returns the version
/// created.
pub fn create_database(
    config: &DatabaseConfig,
    version: Option<u32>,
    registry: &PopulationRegistry,
) -> Result<u32> {
    let target = match version {
        Some(0) => {
            return Err(Error::Configuration("schema versions start at 1".to_string()));
        }
        Some(v) => v,
        None => latest_available_version(&config.schema_dir)?,
    };

    let created_here = !config.path().exists();
    match connect(config) {
        Ok(conn) => {
            if let Some(current) = get_schema_version(&conn)? {
                return Err(Error::Database(format!(
                    "database {} already exists at v{}",
                    config.path().display(),
                    current
                )));
            }
        }
        Err(e) if e.is_database_not_found() => {}
        Err(e) => return Err(e),
    }

    info!("Creating database {} at v{}", config.path().display(), target);
    match create_schema(config, target, registry) {
        Ok(()) => {
            info!("Database created at v{}", target);
            Ok(target)
        }
        Err(e) if created_here && !e.is_busy() => {
            error!("Database creation failed, dropping it: {}", e);
            drop_database(config)?;
            Err(e)
        }
        Err(e) => {
            error!("Database creation failed, leaving {} in place: {}", config.path().display(), e);
            Err(e)
        }
    }
}

fn create_schema(config: &DatabaseConfig, target: u32, registry: &PopulationRegistry) -> Result<()> {
    let mut conn = open_or_create(config)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    tx.execute_batch(LEDGER_DDL)?;
    apply_step(
        &tx,
        &create_schema_file(&config.schema_dir, target),
        MigrationStep::Create(target),
        registry,
    )?;
    record_version(&tx, target, &format!("Create schema v{}", target))?;
    tx.commit()?;
    Ok(())
}

/// Upgrade the database from `from` to `to`, one version at a time, in a
/// single exclusive transaction.
pub fn upgrade_database(
    config: &DatabaseConfig,
    from: u32,
    to: u32,
    registry: &PopulationRegistry,
) -> Result<()> {
    if from >= to {
        return Err(Error::Configuration(format!(
            "cannot upgrade from v{} to v{}: target must be higher",
            from, to
        )));
    }

    let mut conn = connect(config)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;

    let current = get_schema_version(&tx)?;
    if current != Some(from) {
        return Err(Error::Database(format!(
            "cannot upgrade from v{}: database is at {}",
            from,
            describe(current)
        )));
    }

    for version in from..to {
        apply_step(
            &tx,
            &upgrade_schema_file(&config.schema_dir, version),
            MigrationStep::Upgrade(version, version + 1),
            registry,
        )?;
    }
    record_version(&tx, to, &format!("Upgrade schema v{} to v{}", from, to))?;
    tx.commit()?;

    info!("Database upgraded from v{} to v{}", from, to);
    Ok(())
}

/// Fail unless the store is at exactly the expected version. Returns the
/// version found.
pub fn enforce_schema_version(
    conn: &Connection,
    expected: TargetVersion,
    schema_dir: &Path,
) -> Result<u32> {
    let wanted = match expected {
        TargetVersion::Exact(v) => v,
        TargetVersion::Latest => latest_available_version(schema_dir)?,
    };
    match get_schema_version(conn)? {
        Some(v) if v == wanted => Ok(v),
        found => Err(Error::Database(format!(
            "schema version mismatch: expected v{}, found {}",
            wanted,
            describe(found)
        ))),
    }
}
