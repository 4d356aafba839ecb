//! Collaborator contracts consumed by the reconciliation engine.
//!
//! The engine reads the register through a [`FeedSource`] and persists the
//! temporal history through an [`OrganisationStore`], a [`LicenceStore`] and a
//! [`RunStateStore`]. Every call receives the ambient [`CancellationToken`];
//! implementations should return [`StoreError::Cancelled`] or
//! [`FeedError::Cancelled`] once it fires instead of starting new I/O.
//!
//! Blanket implementations for shared references let a single adapter value
//! serve several roles at once.
//!
//! # Examples
//!
//! ```rust
//! use sponsor_core::{CancellationToken, FeedError, FeedSource, SponsorRecord};
//!
//! struct FixedFeed(Vec<SponsorRecord>);
//!
//! impl FeedSource for FixedFeed {
//!     fn fetch_records(
//!         &self,
//!         cancel: &CancellationToken,
//!     ) -> Result<Vec<SponsorRecord>, FeedError> {
//!         if cancel.is_cancelled() {
//!             return Err(FeedError::Cancelled);
//!         }
//!         Ok(self.0.clone())
//!     }
//! }
//!
//! let feed = FixedFeed(vec![SponsorRecord::default()]);
//! let records = feed.fetch_records(&CancellationToken::new()).unwrap();
//! assert_eq!(records.len(), 1);
//! ```

use std::error::Error as StdError;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::{
    InsertMode, Licence, LicenceId, LicenceKey, NewLicence, Organisation, OrganisationId,
    OrganisationKey, SponsorRecord, Timestamp,
};
use crate::stats::SyncStats;

/// Boxed error raised by an adapter's underlying driver.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Errors raised by the persistence collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The ambient cancellation token fired before the call ran.
    #[error("store operation cancelled")]
    Cancelled,
    /// The backing store failed.
    #[error("{operation} failed: {source}")]
    Backend {
        /// Short description of the attempted operation.
        operation: &'static str,
        /// Driver error.
        #[source]
        source: BoxedError,
    },
    /// The store refused a write that would break one of its invariants.
    #[error("{operation} rejected: {detail}")]
    Conflict {
        /// Short description of the attempted operation.
        operation: &'static str,
        /// Why the write was refused.
        detail: String,
    },
}

impl StoreError {
    /// Wrap a driver error raised while performing `operation`.
    pub fn backend(operation: &'static str, source: impl Into<BoxedError>) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }

    /// Whether the error stems from cancellation rather than a store fault.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Return [`StoreError::Cancelled`] once `cancel` has fired.
///
/// Adapters call this at the top of every operation.
pub fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Errors raised while fetching the register snapshot.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FeedError {
    /// The ambient cancellation token fired during the fetch.
    #[error("feed fetch cancelled")]
    Cancelled,
    /// The snapshot could not be obtained.
    #[error("sponsor register unavailable: {source}")]
    Unavailable {
        /// Transport or parsing error.
        #[source]
        source: BoxedError,
    },
}

impl FeedError {
    /// Wrap an adapter error that prevented the fetch.
    pub fn unavailable(source: impl Into<BoxedError>) -> Self {
        Self::Unavailable {
            source: source.into(),
        }
    }
}

/// Produces the full register snapshot in one call.
pub trait FeedSource {
    /// Fetch every record currently published.
    fn fetch_records(&self, cancel: &CancellationToken) -> Result<Vec<SponsorRecord>, FeedError>;
}

/// Persists organisation identity and temporal validity.
pub trait OrganisationStore {
    /// Find the active row for `key`, if any.
    fn find_active(
        &self,
        key: &OrganisationKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Organisation>, StoreError>;

    /// Insert a new active row for `key` and return its identifier.
    fn insert(
        &self,
        key: &OrganisationKey,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<OrganisationId, StoreError>;

    /// Stamp the validity end of row `id` with the current instant.
    fn close(&self, id: OrganisationId, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// List every active row.
    fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<Organisation>, StoreError>;
}

/// Persists licence identity and temporal validity, scoped to organisations.
pub trait LicenceStore {
    /// Find the active row for `key`, if any.
    fn find_active(
        &self,
        key: &LicenceKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Licence>, StoreError>;

    /// Insert a new active row and return its identifier.
    fn insert(
        &self,
        licence: &NewLicence,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<LicenceId, StoreError>;

    /// Stamp the validity end of row `id` with the current instant.
    fn close(&self, id: LicenceId, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// List every active row.
    fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<Licence>, StoreError>;
}

/// Persists the bootstrap marker and the audit trail of passes.
pub trait RunStateStore {
    /// Read the bootstrap marker; `None` means no pass has ever completed.
    fn bootstrap_marker(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Timestamp>, StoreError>;

    /// Write the bootstrap marker. Implementations must refuse a second write.
    fn set_bootstrap_marker(
        &self,
        value: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Append the statistics of a completed pass.
    fn record_run(&self, stats: &SyncStats, cancel: &CancellationToken) -> Result<(), StoreError>;
}

impl<T: FeedSource + ?Sized> FeedSource for &T {
    fn fetch_records(&self, cancel: &CancellationToken) -> Result<Vec<SponsorRecord>, FeedError> {
        (**self).fetch_records(cancel)
    }
}

impl<T: OrganisationStore + ?Sized> OrganisationStore for &T {
    fn find_active(
        &self,
        key: &OrganisationKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Organisation>, StoreError> {
        (**self).find_active(key, cancel)
    }

    fn insert(
        &self,
        key: &OrganisationKey,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<OrganisationId, StoreError> {
        (**self).insert(key, mode, cancel)
    }

    fn close(&self, id: OrganisationId, cancel: &CancellationToken) -> Result<(), StoreError> {
        (**self).close(id, cancel)
    }

    fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<Organisation>, StoreError> {
        (**self).list_active(cancel)
    }
}

impl<T: LicenceStore + ?Sized> LicenceStore for &T {
    fn find_active(
        &self,
        key: &LicenceKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Licence>, StoreError> {
        (**self).find_active(key, cancel)
    }

    fn insert(
        &self,
        licence: &NewLicence,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<LicenceId, StoreError> {
        (**self).insert(licence, mode, cancel)
    }

    fn close(&self, id: LicenceId, cancel: &CancellationToken) -> Result<(), StoreError> {
        (**self).close(id, cancel)
    }

    fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<Licence>, StoreError> {
        (**self).list_active(cancel)
    }
}

impl<T: RunStateStore + ?Sized> RunStateStore for &T {
    fn bootstrap_marker(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Timestamp>, StoreError> {
        (**self).bootstrap_marker(cancel)
    }

    fn set_bootstrap_marker(
        &self,
        value: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        (**self).set_bootstrap_marker(value, cancel)
    }

    fn record_run(&self, stats: &SyncStats, cancel: &CancellationToken) -> Result<(), StoreError> {
        (**self).record_run(stats, cancel)
    }
}
