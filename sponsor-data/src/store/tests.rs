//! Unit tests for the SQLite register store.

use super::{
    BOOTSTRAP_MARKER_KEY, BOOTSTRAP_MARKER_NAME, SCHEMA_VERSION, SchemaError, SqliteStore,
    initialise_schema,
};
use chrono::Utc;
use rstest::{fixture, rstest};
use rusqlite::Connection;
use sponsor_core::test_support::{StaticFeed, worker_record};
use sponsor_core::{
    CancellationToken, InsertMode, LicenceStore, NewLicence, OrganisationKey, OrganisationStore,
    RunStateStore, StoreError, Syncer,
};

#[fixture]
fn store() -> SqliteStore {
    SqliteStore::open_in_memory().expect("open in-memory store")
}

#[fixture]
fn cancel() -> CancellationToken {
    CancellationToken::new()
}

#[rstest]
fn initialises_schema_records_version() -> Result<(), SchemaError> {
    let mut connection = Connection::open_in_memory().expect("open in-memory database");

    initialise_schema(&mut connection)?;
    initialise_schema(&mut connection)?;

    let version: i64 = connection
        .query_row(
            "SELECT version FROM sponsor_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .expect("schema version present");
    assert_eq!(version, SCHEMA_VERSION);

    let table_count: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (
                'organisations',
                'licences',
                'config',
                'sync_runs'
            )",
            [],
            |row| row.get(0),
        )
        .expect("count tables");
    assert_eq!(table_count, 4);
    Ok(())
}

#[rstest]
fn rejects_unknown_schema_version() {
    let mut connection = Connection::open_in_memory().expect("open in-memory database");
    connection
        .execute_batch(
            "CREATE TABLE sponsor_schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT ''
            ) WITHOUT ROWID;
            INSERT INTO sponsor_schema_version (version) VALUES (7);",
        )
        .expect("seed foreign schema version");

    let err = initialise_schema(&mut connection).expect_err("version mismatch");

    match err {
        SchemaError::VersionMismatch { expected, found } => {
            assert_eq!(expected, SCHEMA_VERSION);
            assert_eq!(found, 7);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn empty_and_absent_locations_match(store: SqliteStore, cancel: CancellationToken) {
    store
        .connection()
        .execute(
            "INSERT INTO organisations (name, town_city, county) VALUES ('StaffCo', 'Leeds', '')",
            [],
        )
        .expect("seed legacy row with empty county");

    let key = OrganisationKey::new("StaffCo", "Leeds", "");
    let found = OrganisationStore::find_active(&store, &key, &cancel)
        .expect("lookup")
        .expect("row matches");

    assert_eq!(found.name, "StaffCo");
    assert!(found.created_at.is_none());
}

#[rstest]
fn lookups_are_case_sensitive(store: SqliteStore, cancel: CancellationToken) {
    let key = OrganisationKey::new("StaffCo", "Leeds", "");
    OrganisationStore::insert(&store, &key, InsertMode::Bootstrap, &cancel).expect("insert");

    let other = OrganisationKey::new("STAFFCO", "Leeds", "");
    let found = OrganisationStore::find_active(&store, &other, &cancel).expect("lookup");

    assert!(found.is_none());
}

#[rstest]
#[case(InsertMode::Bootstrap, false)]
#[case(InsertMode::Tracked, true)]
fn insert_mode_controls_validity_start(
    store: SqliteStore,
    cancel: CancellationToken,
    #[case] mode: InsertMode,
    #[case] stamped: bool,
) {
    let key = OrganisationKey::new("StaffCo", "Leeds", "");
    let organisation = OrganisationStore::insert(&store, &key, mode, &cancel).expect("insert");
    let licence = NewLicence::from_record(
        organisation,
        &worker_record("StaffCo", "Leeds", "A rating", "Skilled Worker"),
    );
    LicenceStore::insert(&store, &licence, mode, &cancel).expect("insert licence");

    let organisations = OrganisationStore::list_active(&store, &cancel).expect("list");
    let licences = LicenceStore::list_active(&store, &cancel).expect("list");

    assert_eq!(organisations.len(), 1);
    assert_eq!(licences.len(), 1);
    assert_eq!(organisations[0].created_at.is_some(), stamped);
    assert_eq!(licences[0].valid_from.is_some(), stamped);
}

#[rstest]
fn closing_twice_is_a_conflict(store: SqliteStore, cancel: CancellationToken) {
    let key = OrganisationKey::new("StaffCo", "Leeds", "");
    let id = OrganisationStore::insert(&store, &key, InsertMode::Tracked, &cancel).expect("insert");

    OrganisationStore::close(&store, id, &cancel).expect("first close");
    let err = OrganisationStore::close(&store, id, &cancel).expect_err("second close");

    assert!(matches!(err, StoreError::Conflict { .. }));
    assert!(
        OrganisationStore::find_active(&store, &key, &cancel)
            .expect("lookup")
            .is_none()
    );
}

#[rstest]
fn licence_lookup_uses_type_and_route(store: SqliteStore, cancel: CancellationToken) {
    let key = OrganisationKey::new("StaffCo", "Leeds", "");
    let organisation =
        OrganisationStore::insert(&store, &key, InsertMode::Tracked, &cancel).expect("insert");
    let record = worker_record("StaffCo", "Leeds", "A rating", "Skilled Worker");
    let id = LicenceStore::insert(
        &store,
        &NewLicence::from_record(organisation, &record),
        InsertMode::Tracked,
        &cancel,
    )
    .expect("insert licence");

    let hit = LicenceStore::find_active(&store, &record.licence_key(organisation), &cancel)
        .expect("lookup");
    let mut other_route = record.clone();
    other_route.route = "Global Business Mobility".to_owned();
    let miss = LicenceStore::find_active(&store, &other_route.licence_key(organisation), &cancel)
        .expect("lookup");

    assert_eq!(hit.map(|licence| licence.id), Some(id));
    assert!(miss.is_none());
}

#[rstest]
fn bootstrap_marker_is_written_once(store: SqliteStore, cancel: CancellationToken) {
    assert_eq!(store.bootstrap_marker(&cancel).expect("read"), None);
    let now = Utc::now();

    store.set_bootstrap_marker(now, &cancel).expect("first write");
    let err = store
        .set_bootstrap_marker(Utc::now(), &cancel)
        .expect_err("second write");

    assert!(matches!(err, StoreError::Conflict { .. }));
    let stored = store
        .bootstrap_marker(&cancel)
        .expect("read")
        .expect("marker present");
    assert_eq!(stored.timestamp_micros(), now.timestamp_micros());

    let name: String = store
        .connection()
        .query_row("SELECT name || '/' || key FROM config", [], |row| row.get(0))
        .expect("config row");
    assert_eq!(name, format!("{BOOTSTRAP_MARKER_NAME}/{BOOTSTRAP_MARKER_KEY}"));
}

#[rstest]
fn cancelled_calls_touch_nothing(store: SqliteStore, cancel: CancellationToken) {
    cancel.cancel();
    let key = OrganisationKey::new("StaffCo", "Leeds", "");

    let err = OrganisationStore::insert(&store, &key, InsertMode::Tracked, &cancel)
        .expect_err("cancelled");

    assert!(err.is_cancelled());
    let count: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM organisations", [], |row| row.get(0))
        .expect("count");
    assert_eq!(count, 0);
}

#[rstest]
fn records_runs_with_issue_messages(store: SqliteStore, cancel: CancellationToken) {
    let feed = StaticFeed::new(vec![
        worker_record("StaffCo", "Leeds", "A rating", "Skilled Worker"),
        worker_record("Brew Ltd", "York", "B rating", "Skilled Worker"),
    ]);
    let stats = Syncer::new(&feed, &store, &store, &store)
        .run(&cancel)
        .expect("bootstrap pass");

    let (bootstrap, new_organisations, error_count, errors): (bool, i64, i64, String) = store
        .connection()
        .query_row(
            "SELECT bootstrap, new_organisations, error_count, errors FROM sync_runs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .expect("run row");

    assert!(bootstrap);
    assert_eq!(new_organisations, 2);
    assert_eq!(error_count, 0);
    assert_eq!(errors, "[]");
    assert!(stats.is_clean());
}

#[rstest]
fn three_day_history_matches_memory_store(store: SqliteStore, cancel: CancellationToken) {
    let feed = StaticFeed::new(vec![worker_record(
        "StaffCo",
        "Leeds",
        "A rating",
        "Skilled Worker",
    )]);
    let syncer = Syncer::new(&feed, &store, &store, &store);
    syncer.run(&cancel).expect("day one");
    feed.replace(vec![worker_record(
        "StaffCo",
        "Newcastle",
        "A rating",
        "Skilled Worker",
    )]);
    let day_two = syncer.run(&cancel).expect("day two");
    feed.replace(vec![worker_record(
        "StaffCo",
        "Leeds",
        "A rating",
        "Skilled Worker",
    )]);
    let day_three = syncer.run(&cancel).expect("day three");

    for stats in [&day_two, &day_three] {
        assert_eq!(stats.closed_organisations, 1);
        assert_eq!(stats.closed_licences, 1);
    }
    let counts: (i64, i64, i64) = store
        .connection()
        .query_row(
            "SELECT
                (SELECT COUNT(*) FROM organisations),
                (SELECT COUNT(*) FROM licences),
                (SELECT COUNT(*) FROM organisations WHERE deleted_at IS NULL)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("counts");
    assert_eq!(counts, (3, 3, 1));
}
