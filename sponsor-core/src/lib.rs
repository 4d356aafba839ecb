//! Core domain types and the reconciliation engine for the sponsor register
//! tracker.
//!
//! The crate models the organisations and licences published in the UK
//! register of licensed sponsors as an append-only temporal history, defines
//! the store and feed contracts the engine depends on, and implements the
//! [`Syncer`] that reconciles a fresh register snapshot against that history.
//! Adapters for concrete storage and transport live in `sponsor-data`.

#![forbid(unsafe_code)]

mod model;
pub mod stats;
pub mod store;
pub mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use model::{
    InsertMode, Licence, LicenceId, LicenceKey, NewLicence, Organisation, OrganisationId,
    OrganisationKey, SponsorRecord, Timestamp,
};
pub use stats::{EntityKind, LicenceOutcome, RunSummary, SyncIssue, SyncStats};
pub use store::{
    BoxedError, FeedError, FeedSource, LicenceStore, OrganisationStore, RunStateStore,
    StoreError, ensure_not_cancelled,
};
pub use sync::{ReconcileError, SyncError, Syncer};
pub use tokio_util::sync::CancellationToken;
