#![forbid(unsafe_code)]

use rusqlite::{Connection, Error as SqliteError, OptionalExtension};
use thiserror::Error;

/// Version of the register schema created by [`initialise_schema`].
pub const SCHEMA_VERSION: i64 = 1;

/// Initialise the sponsor register schema inside an SQLite database.
///
/// The function enables foreign keys, creates the history, configuration and
/// audit tables plus the indexes backing active-row lookups, and records the
/// schema version. Existing installations must already match the expected
/// version; mismatches are rejected so migrations can be applied explicitly.
///
/// # Examples
/// ```
/// use rusqlite::Connection;
/// use sponsor_data::store::{SCHEMA_VERSION, initialise_schema};
///
/// let mut conn = Connection::open_in_memory().expect("create in-memory database");
/// initialise_schema(&mut conn).expect("create register schema");
///
/// let version: i64 = conn
///     .query_row(
///         "SELECT version FROM sponsor_schema_version LIMIT 1",
///         [],
///         |row| row.get(0),
///     )
///     .expect("read schema version");
/// assert_eq!(version, SCHEMA_VERSION);
/// ```
///
/// # Errors
///
/// Returns [`SchemaError`] when a migration step fails or the database
/// carries a different schema version.
pub fn initialise_schema(connection: &mut Connection) -> Result<(), SchemaError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| SchemaError::ForeignKeys { source })?;

    let transaction = connection
        .transaction()
        .map_err(|source| SchemaError::Migration {
            step: "begin schema transaction",
            source,
        })?;

    create_history_tables(&transaction)?;
    create_bookkeeping_tables(&transaction)?;
    create_indexes(&transaction)?;
    ensure_schema_version(&transaction)?;

    transaction
        .commit()
        .map_err(|source| SchemaError::Migration {
            step: "commit schema transaction",
            source,
        })?;

    Ok(())
}

fn create_history_tables(transaction: &rusqlite::Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create organisations",
        "CREATE TABLE IF NOT EXISTS organisations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            town_city TEXT,
            county TEXT,
            created_at TEXT,
            deleted_at TEXT
        )",
    )?;
    run_migration_step(
        transaction,
        "create licences",
        "CREATE TABLE IF NOT EXISTS licences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organisation_id INTEGER NOT NULL,
            licence_type TEXT NOT NULL,
            rating TEXT NOT NULL,
            route TEXT NOT NULL,
            valid_from TEXT,
            valid_to TEXT,
            FOREIGN KEY (organisation_id) REFERENCES organisations(id)
        )",
    )
}

fn create_bookkeeping_tables(transaction: &rusqlite::Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create config",
        "CREATE TABLE IF NOT EXISTS config (
            name TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (name, key)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create sync_runs",
        "CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            bootstrap INTEGER NOT NULL CHECK (bootstrap IN (0, 1)),
            new_organisations INTEGER NOT NULL,
            new_licences INTEGER NOT NULL,
            changed_licences INTEGER NOT NULL,
            closed_organisations INTEGER NOT NULL,
            closed_licences INTEGER NOT NULL,
            error_count INTEGER NOT NULL,
            errors TEXT NOT NULL DEFAULT '[]'
        )",
    )
}

fn create_indexes(transaction: &rusqlite::Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "index active organisations",
        "CREATE INDEX IF NOT EXISTS idx_organisations_active
            ON organisations(name, town_city, county)
            WHERE deleted_at IS NULL",
    )?;
    run_migration_step(
        transaction,
        "index active licences",
        "CREATE INDEX IF NOT EXISTS idx_licences_active
            ON licences(organisation_id, licence_type, route)
            WHERE valid_to IS NULL",
    )
}

fn ensure_schema_version(transaction: &rusqlite::Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create schema version table",
        "CREATE TABLE IF NOT EXISTS sponsor_schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing_version: Option<i64> = transaction
        .query_row(
            "SELECT version FROM sponsor_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| SchemaError::Migration {
            step: "read schema version",
            source,
        })?;

    match existing_version {
        Some(version) if version == SCHEMA_VERSION => {}
        Some(found) => {
            return Err(SchemaError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found,
            });
        }
        None => {
            transaction
                .execute(
                    "INSERT INTO sponsor_schema_version (version) VALUES (?1)",
                    [SCHEMA_VERSION],
                )
                .map_err(|source| SchemaError::Migration {
                    step: "record schema version",
                    source,
                })?;
        }
    }

    Ok(())
}

fn run_migration_step(
    transaction: &rusqlite::Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), SchemaError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| SchemaError::Migration { step, source })
}

/// Errors raised when initialising the register schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Foreign key enforcement could not be switched on.
    #[error("failed to enable SQLite foreign keys")]
    ForeignKeys {
        /// Driver error.
        #[source]
        source: SqliteError,
    },
    /// A migration statement failed.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        /// Name of the failing step.
        step: &'static str,
        /// Driver error.
        #[source]
        source: SqliteError,
    },
    /// The database was created by a different schema version.
    #[error(
        "expected register schema version {expected} but found {found}; apply migrations before retrying"
    )]
    VersionMismatch {
        /// Version this build understands.
        expected: i64,
        /// Version recorded in the database.
        found: i64,
    },
}
