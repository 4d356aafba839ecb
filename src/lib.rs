//! Facade crate for the sponsor register tracker.
//!
//! This crate re-exports the domain types and synchronisation engine, and
//! exposes the SQLite store and register feeds behind the `store-sqlite`
//! feature. Every type named by the store traits is re-exported so that
//! custom backends can be written against this crate alone.

#![forbid(unsafe_code)]

pub use sponsor_core::{
    CancellationToken, EntityKind, FeedError, FeedSource, InsertMode, Licence, LicenceId,
    LicenceKey, LicenceStore, NewLicence, Organisation, OrganisationId, OrganisationKey,
    OrganisationStore, RunStateStore, RunSummary, SponsorRecord, StoreError, SyncError, SyncIssue,
    SyncStats, Syncer, Timestamp,
};

#[cfg(feature = "store-sqlite")]
pub use sponsor_data::{
    CsvFileFeed, CsvLocation, HttpFeedConfig, HttpFeedSource, PageRequest, RegisterSnapshot,
    SqliteStore,
};
