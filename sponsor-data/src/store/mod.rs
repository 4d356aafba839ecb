//! SQLite persistence for the sponsor register history.
//!
//! The module is split into two focused parts:
//! - [`initialise_schema`] materialises the tables and indexes.
//! - [`SqliteStore`] implements the organisation, licence and run-state
//!   store contracts over a single connection.
//!
//! Timestamps are stored as UTC text through rusqlite's `chrono` support.
#![forbid(unsafe_code)]

mod schema;

use camino::Utf8Path;
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use sponsor_core::{
    CancellationToken, InsertMode, Licence, LicenceId, LicenceKey, LicenceStore, NewLicence,
    Organisation, OrganisationId, OrganisationKey, OrganisationStore, RunStateStore, StoreError,
    SyncStats, Timestamp, ensure_not_cancelled,
};
use thiserror::Error;

pub use schema::{SCHEMA_VERSION, SchemaError, initialise_schema};

use crate::reader::register_search_functions;

/// Name of the configuration entry holding the bootstrap marker.
pub const BOOTSTRAP_MARKER_NAME: &str = "InitialRunDateTime";
/// Key of the configuration entry holding the bootstrap marker.
pub const BOOTSTRAP_MARKER_KEY: &str = "Default";

/// Errors raised when opening a [`SqliteStore`].
#[derive(Debug, Error)]
pub enum OpenStoreError {
    /// The database file could not be opened.
    #[error("failed to open SQLite database at {path}")]
    Open {
        /// Database path as given by the caller.
        path: String,
        /// Driver error.
        #[source]
        source: rusqlite::Error,
    },
    /// The schema could not be initialised.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The search functions could not be registered on the connection.
    #[error("failed to register SQL functions")]
    Functions {
        /// Driver error.
        #[source]
        source: rusqlite::Error,
    },
}

/// Organisation, licence and run-state store backed by SQLite.
///
/// One value serves all three store roles; pass `&store` for each of them.
///
/// # Examples
/// ```
/// use sponsor_core::{CancellationToken, InsertMode, OrganisationKey, OrganisationStore};
/// use sponsor_data::store::SqliteStore;
///
/// let store = SqliteStore::open_in_memory().expect("open store");
/// let cancel = CancellationToken::new();
/// let key = OrganisationKey::new("StaffCo", "Leeds", "");
/// let id = store.insert(&key, InsertMode::Tracked, &cancel).expect("insert");
/// let found = store.find_active(&key, &cancel).expect("lookup");
/// assert_eq!(found.map(|row| row.id), Some(id));
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and initialise its schema.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStoreError`] when the file cannot be opened or the schema
    /// cannot be initialised.
    pub fn open(path: &Utf8Path) -> Result<Self, OpenStoreError> {
        let connection = Connection::open(path.as_std_path()).map_err(|source| {
            OpenStoreError::Open {
                path: path.to_string(),
                source,
            }
        })?;
        Self::from_connection(connection)
    }

    /// Open a private in-memory database with the schema initialised.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStoreError`] when SQLite or the schema fails.
    pub fn open_in_memory() -> Result<Self, OpenStoreError> {
        let connection =
            Connection::open_in_memory().map_err(|source| OpenStoreError::Open {
                path: ":memory:".to_owned(),
                source,
            })?;
        Self::from_connection(connection)
    }

    /// Wrap an existing connection, initialising the schema first.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStoreError::Schema`] when the schema cannot be
    /// initialised, or [`OpenStoreError::Functions`] when the search
    /// functions cannot be registered.
    pub fn from_connection(mut connection: Connection) -> Result<Self, OpenStoreError> {
        initialise_schema(&mut connection)?;
        register_search_functions(&connection)
            .map_err(|source| OpenStoreError::Functions { source })?;
        Ok(Self { connection })
    }

    /// Borrow the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }
}

const ORGANISATION_COLUMNS: &str = "id, name, town_city, county, created_at, deleted_at";
const LICENCE_COLUMNS: &str =
    "id, organisation_id, licence_type, rating, route, valid_from, valid_to";

pub(crate) fn organisation_from_row(row: &Row<'_>) -> rusqlite::Result<Organisation> {
    Ok(Organisation {
        id: OrganisationId(row.get(0)?),
        name: row.get(1)?,
        town_city: row.get(2)?,
        county: row.get(3)?,
        created_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

pub(crate) fn licence_from_row(row: &Row<'_>) -> rusqlite::Result<Licence> {
    Ok(Licence {
        id: LicenceId(row.get(0)?),
        organisation_id: OrganisationId(row.get(1)?),
        licence_type: row.get(2)?,
        rating: row.get(3)?,
        route: row.get(4)?,
        valid_from: row.get(5)?,
        valid_to: row.get(6)?,
    })
}

pub(crate) fn organisation_select() -> String {
    format!("SELECT {ORGANISATION_COLUMNS} FROM organisations")
}

pub(crate) fn licence_select() -> String {
    format!("SELECT {LICENCE_COLUMNS} FROM licences")
}

/// Map a "no row updated" close into a conflict.
fn expect_closed(
    updated: usize,
    operation: &'static str,
    detail: impl FnOnce() -> String,
) -> Result<(), StoreError> {
    if updated == 0 {
        Err(StoreError::Conflict {
            operation,
            detail: detail(),
        })
    } else {
        Ok(())
    }
}

impl OrganisationStore for SqliteStore {
    fn find_active(
        &self,
        key: &OrganisationKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Organisation>, StoreError> {
        const OPERATION: &str = "find active organisation";
        ensure_not_cancelled(cancel)?;
        // NULL and '' denote the same location for identity purposes.
        let sql = format!(
            "{} WHERE deleted_at IS NULL
                AND name = ?1
                AND COALESCE(town_city, '') = ?2
                AND COALESCE(county, '') = ?3
              ORDER BY id LIMIT 1",
            organisation_select()
        );
        self.connection
            .query_row(
                &sql,
                params![
                    key.name,
                    key.town_city.as_deref().unwrap_or_default(),
                    key.county.as_deref().unwrap_or_default(),
                ],
                organisation_from_row,
            )
            .optional()
            .map_err(|err| StoreError::backend(OPERATION, err))
    }

    fn insert(
        &self,
        key: &OrganisationKey,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<OrganisationId, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.connection
            .execute(
                "INSERT INTO organisations (name, town_city, county, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    key.name,
                    key.town_city,
                    key.county,
                    mode.validity_start(Utc::now()),
                ],
            )
            .map_err(|err| StoreError::backend("insert organisation", err))?;
        Ok(OrganisationId(self.connection.last_insert_rowid()))
    }

    fn close(&self, id: OrganisationId, cancel: &CancellationToken) -> Result<(), StoreError> {
        const OPERATION: &str = "close organisation";
        ensure_not_cancelled(cancel)?;
        let updated = self
            .connection
            .execute(
                "UPDATE organisations SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![Utc::now(), id.0],
            )
            .map_err(|err| StoreError::backend(OPERATION, err))?;
        expect_closed(updated, OPERATION, || format!("no active organisation {id}"))
    }

    fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<Organisation>, StoreError> {
        const OPERATION: &str = "list active organisations";
        ensure_not_cancelled(cancel)?;
        let sql = format!("{} WHERE deleted_at IS NULL ORDER BY id", organisation_select());
        let mut statement = self
            .connection
            .prepare(&sql)
            .map_err(|err| StoreError::backend(OPERATION, err))?;
        let rows = statement
            .query_map([], organisation_from_row)
            .and_then(Iterator::collect)
            .map_err(|err| StoreError::backend(OPERATION, err));
        rows
    }
}

impl LicenceStore for SqliteStore {
    fn find_active(
        &self,
        key: &LicenceKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Licence>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let sql = format!(
            "{} WHERE valid_to IS NULL
                AND organisation_id = ?1
                AND licence_type = ?2
                AND route = ?3
              ORDER BY id LIMIT 1",
            licence_select()
        );
        self.connection
            .query_row(
                &sql,
                params![key.organisation_id.0, key.licence_type, key.route],
                licence_from_row,
            )
            .optional()
            .map_err(|err| StoreError::backend("find active licence", err))
    }

    fn insert(
        &self,
        licence: &NewLicence,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<LicenceId, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.connection
            .execute(
                "INSERT INTO licences (organisation_id, licence_type, rating, route, valid_from)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    licence.organisation_id.0,
                    licence.licence_type,
                    licence.rating,
                    licence.route,
                    mode.validity_start(Utc::now()),
                ],
            )
            .map_err(|err| StoreError::backend("insert licence", err))?;
        Ok(LicenceId(self.connection.last_insert_rowid()))
    }

    fn close(&self, id: LicenceId, cancel: &CancellationToken) -> Result<(), StoreError> {
        const OPERATION: &str = "close licence";
        ensure_not_cancelled(cancel)?;
        let updated = self
            .connection
            .execute(
                "UPDATE licences SET valid_to = ?1 WHERE id = ?2 AND valid_to IS NULL",
                params![Utc::now(), id.0],
            )
            .map_err(|err| StoreError::backend(OPERATION, err))?;
        expect_closed(updated, OPERATION, || format!("no active licence {id}"))
    }

    fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<Licence>, StoreError> {
        const OPERATION: &str = "list active licences";
        ensure_not_cancelled(cancel)?;
        let sql = format!("{} WHERE valid_to IS NULL ORDER BY id", licence_select());
        let mut statement = self
            .connection
            .prepare(&sql)
            .map_err(|err| StoreError::backend(OPERATION, err))?;
        let rows = statement
            .query_map([], licence_from_row)
            .and_then(Iterator::collect)
            .map_err(|err| StoreError::backend(OPERATION, err));
        rows
    }
}

pub(crate) fn read_bootstrap_marker(connection: &Connection) -> rusqlite::Result<Option<Timestamp>> {
    connection
        .query_row(
            "SELECT value FROM config WHERE name = ?1 AND key = ?2",
            params![BOOTSTRAP_MARKER_NAME, BOOTSTRAP_MARKER_KEY],
            |row| row.get(0),
        )
        .optional()
}

impl RunStateStore for SqliteStore {
    fn bootstrap_marker(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Timestamp>, StoreError> {
        ensure_not_cancelled(cancel)?;
        read_bootstrap_marker(&self.connection)
            .map_err(|err| StoreError::backend("read bootstrap marker", err))
    }

    fn set_bootstrap_marker(
        &self,
        value: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        const OPERATION: &str = "write bootstrap marker";
        ensure_not_cancelled(cancel)?;
        match self.connection.execute(
            "INSERT INTO config (name, key, value) VALUES (?1, ?2, ?3)",
            params![BOOTSTRAP_MARKER_NAME, BOOTSTRAP_MARKER_KEY, value],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict {
                    operation: OPERATION,
                    detail: "bootstrap marker already recorded".to_owned(),
                })
            }
            Err(err) => Err(StoreError::backend(OPERATION, err)),
        }
    }

    fn record_run(&self, stats: &SyncStats, cancel: &CancellationToken) -> Result<(), StoreError> {
        const OPERATION: &str = "record sync run";
        ensure_not_cancelled(cancel)?;
        let errors = serde_json::to_string(&stats.issue_messages())
            .map_err(|err| StoreError::backend(OPERATION, err))?;
        let summary = stats.summary();
        self.connection
            .execute(
                "INSERT INTO sync_runs (
                    started_at, finished_at, bootstrap,
                    new_organisations, new_licences, changed_licences,
                    closed_organisations, closed_licences, error_count, errors
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    stats.started_at,
                    stats.finished_at,
                    summary.bootstrap,
                    summary.new_organisations,
                    summary.new_licences,
                    summary.changed_licences,
                    summary.closed_organisations,
                    summary.closed_licences,
                    summary.error_count,
                    errors,
                ],
            )
            .map(|_| ())
            .map_err(|err| StoreError::backend(OPERATION, err))
    }
}

#[cfg(test)]
mod tests;
