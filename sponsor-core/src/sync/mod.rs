//! Reconciliation engine for the sponsor register.
//!
//! A [`Syncer`] performs one synchronisation pass per call to [`Syncer::run`]:
//!
//! 1. read the bootstrap marker; its absence selects bootstrap semantics;
//! 2. fetch the full register snapshot;
//! 3. reconcile every record's organisation and licence, in feed order;
//! 4. outside bootstrap, close every active entity the pass did not touch;
//! 5. after a bootstrap pass, write the bootstrap marker;
//! 6. persist the run statistics.
//!
//! History is append-only: rows are inserted or closed, never edited.
//! Failures while reconciling a single record, or while closing a single
//! entity, are collected as [`SyncIssue`]s and the pass carries on. Anything
//! that would make the pass meaningless is returned as a [`SyncError`].
//!
//! Records are processed one at a time and no transaction spans the pass. A
//! pass interrupted half-way is repaired by running it again: rows created
//! before the interruption are found unchanged and anything genuinely stale is
//! closed. Callers must serialise invocations; two overlapping passes may
//! insert duplicate rows for the same identity.
//!
//! # Examples
//!
//! ```rust
//! # #[cfg(feature = "test-support")]
//! # {
//! use sponsor_core::test_support::{MemoryRegister, StaticFeed};
//! use sponsor_core::{CancellationToken, SponsorRecord, Syncer};
//!
//! let feed = StaticFeed::new(vec![SponsorRecord::new(
//!     "StaffCo", "Leeds", "", "Worker", "A rating", "Skilled Worker",
//! )]);
//! let register = MemoryRegister::default();
//! let syncer = Syncer::new(&feed, &register, &register, &register);
//!
//! let stats = syncer.run(&CancellationToken::new()).unwrap();
//! assert!(stats.bootstrap);
//! assert_eq!(stats.new_organisations, 1);
//! # }
//! ```

use std::collections::HashSet;

use chrono::Utc;
use log::{debug, info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::{InsertMode, LicenceId, NewLicence, OrganisationId, SponsorRecord};
use crate::stats::{EntityKind, LicenceOutcome, SyncIssue, SyncStats, Tally};
use crate::store::{
    FeedError, FeedSource, LicenceStore, OrganisationStore, RunStateStore, StoreError,
    ensure_not_cancelled,
};

/// Fatal failures that abort a synchronisation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The bootstrap marker could not be read, so the pass mode is unknown.
    #[error("failed to read bootstrap marker: {0}")]
    BootstrapMarkerRead(#[source] StoreError),
    /// The register snapshot could not be fetched; nothing was written.
    #[error("failed to fetch sponsor register: {0}")]
    Fetch(#[source] FeedError),
    /// The bootstrap pass completed but its marker could not be written.
    #[error("failed to record bootstrap marker: {0}")]
    BootstrapMarkerWrite(#[source] StoreError),
    /// The pass completed but its statistics could not be persisted.
    #[error("failed to record run statistics: {source}")]
    RecordRun {
        /// Store failure.
        #[source]
        source: StoreError,
        /// Statistics of the completed pass.
        stats: Box<SyncStats>,
    },
    /// The ambient cancellation token fired; the pass stopped at the next
    /// store call without rolling back earlier writes.
    #[error("synchronisation cancelled")]
    Cancelled,
}

/// Store failure that stopped a single record from being reconciled.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Looking up the active organisation failed.
    #[error("find organisation: {0}")]
    FindOrganisation(#[source] StoreError),
    /// Inserting the organisation failed.
    #[error("insert organisation: {0}")]
    InsertOrganisation(#[source] StoreError),
    /// Looking up the active licence failed.
    #[error("find licence: {0}")]
    FindLicence(#[source] StoreError),
    /// Inserting a new licence failed.
    #[error("insert licence: {0}")]
    InsertLicence(#[source] StoreError),
    /// Closing the superseded licence version failed.
    #[error("close licence {id}: {source}")]
    CloseLicence {
        /// Licence left open.
        id: LicenceId,
        /// Store failure.
        #[source]
        source: StoreError,
    },
    /// Inserting the replacement licence version failed after the old one
    /// was closed.
    #[error("insert updated licence: {0}")]
    InsertReplacementLicence(#[source] StoreError),
}

impl ReconcileError {
    /// The underlying store error.
    #[must_use]
    pub const fn store_error(&self) -> &StoreError {
        match self {
            Self::FindOrganisation(source)
            | Self::InsertOrganisation(source)
            | Self::FindLicence(source)
            | Self::InsertLicence(source)
            | Self::CloseLicence { source, .. }
            | Self::InsertReplacementLicence(source) => source,
        }
    }

    /// Whether the failure stems from cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.store_error().is_cancelled()
    }
}

/// Entities touched by the current pass.
#[derive(Debug, Default)]
struct Seen {
    organisations: HashSet<OrganisationId>,
    licences: HashSet<LicenceId>,
}

/// Active identifiers a record resolved to.
#[derive(Debug, Clone, Copy)]
struct Touched {
    organisation: OrganisationId,
    licence: LicenceId,
}

/// Orchestrates synchronisation passes over the register.
#[derive(Debug)]
pub struct Syncer<F, O, L, R> {
    feed: F,
    organisations: O,
    licences: L,
    run_state: R,
}

impl<F, O, L, R> Syncer<F, O, L, R>
where
    F: FeedSource,
    O: OrganisationStore,
    L: LicenceStore,
    R: RunStateStore,
{
    /// Build a syncer over its four collaborators.
    pub const fn new(feed: F, organisations: O, licences: L, run_state: R) -> Self {
        Self {
            feed,
            organisations,
            licences,
            run_state,
        }
    }

    /// Run one synchronisation pass.
    ///
    /// Returns the statistics of the pass. A non-empty
    /// [`SyncStats::issues`] list means some records or entities were skipped
    /// and a re-run is advisable; it does not mean the pass failed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the bootstrap marker cannot be read or
    /// written, the snapshot cannot be fetched, the statistics cannot be
    /// persisted, or `cancel` fires.
    pub fn run(&self, cancel: &CancellationToken) -> Result<SyncStats, SyncError> {
        let started_at = Utc::now();

        let marker = guarded(cancel, || self.run_state.bootstrap_marker(cancel))
            .map_err(|err| fatal(err, SyncError::BootstrapMarkerRead))?;
        let mode = if marker.is_some() {
            InsertMode::Tracked
        } else {
            InsertMode::Bootstrap
        };
        info!("sync starting (bootstrap: {})", mode.is_bootstrap());

        let records = self.fetch(cancel)?;
        info!("fetched sponsor register ({} records)", records.len());

        let mut tally = Tally::default();
        let mut seen = Seen::default();
        for (index, record) in records.iter().enumerate() {
            match self.reconcile_record(record, mode, &mut tally, cancel) {
                Ok(touched) => {
                    seen.organisations.insert(touched.organisation);
                    seen.licences.insert(touched.licence);
                }
                Err(err) if err.is_cancelled() => return Err(SyncError::Cancelled),
                Err(source) => {
                    warn!(
                        "skipping record {index} for {:?}: {source}",
                        record.organisation_name
                    );
                    tally.issues.push(SyncIssue::Record {
                        index,
                        organisation: record.organisation_name.clone(),
                        source,
                    });
                }
            }
        }

        match mode {
            InsertMode::Tracked => self.close_stale(&seen, &mut tally, cancel)?,
            InsertMode::Bootstrap => {
                let now = Utc::now();
                guarded(cancel, || self.run_state.set_bootstrap_marker(now, cancel))
                    .map_err(|err| fatal(err, SyncError::BootstrapMarkerWrite))?;
                info!("bootstrap marker recorded at {now}");
            }
        }

        let stats = tally.finish(started_at, Utc::now(), mode.is_bootstrap());
        info!(
            "sync complete: {} new organisations, {} new licences, {} changed licences, \
             {} closed organisations, {} closed licences, {} errors",
            stats.new_organisations,
            stats.new_licences,
            stats.changed_licences,
            stats.closed_organisations,
            stats.closed_licences,
            stats.issues.len()
        );

        match guarded(cancel, || self.run_state.record_run(&stats, cancel)) {
            Ok(()) => Ok(stats),
            Err(err) if err.is_cancelled() => Err(SyncError::Cancelled),
            Err(source) => Err(SyncError::RecordRun {
                source,
                stats: Box::new(stats),
            }),
        }
    }

    fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<SponsorRecord>, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.feed.fetch_records(cancel).map_err(|err| match err {
            FeedError::Cancelled => SyncError::Cancelled,
            other => SyncError::Fetch(other),
        })
    }

    fn reconcile_record(
        &self,
        record: &SponsorRecord,
        mode: InsertMode,
        tally: &mut Tally,
        cancel: &CancellationToken,
    ) -> Result<Touched, ReconcileError> {
        let (organisation, is_new) = self.reconcile_organisation(record, mode, cancel)?;
        if is_new {
            tally.new_organisations += 1;
        }
        let (licence, outcome) = self.reconcile_licence(organisation, record, mode, cancel)?;
        tally.record_licence(outcome);
        Ok(Touched {
            organisation,
            licence,
        })
    }

    /// Resolve the active organisation for `record`, inserting one if needed.
    ///
    /// Identity fields are immutable: a record whose location changed
    /// resolves to a different key and therefore a fresh row.
    fn reconcile_organisation(
        &self,
        record: &SponsorRecord,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<(OrganisationId, bool), ReconcileError> {
        let key = record.organisation_key();
        let existing = guarded(cancel, || self.organisations.find_active(&key, cancel))
            .map_err(ReconcileError::FindOrganisation)?;
        if let Some(organisation) = existing {
            return Ok((organisation.id, false));
        }
        let id = guarded(cancel, || self.organisations.insert(&key, mode, cancel))
            .map_err(ReconcileError::InsertOrganisation)?;
        debug!("inserted organisation {id} for {:?}", key.name);
        Ok((id, true))
    }

    /// Resolve the active licence for `record` under `organisation`.
    fn reconcile_licence(
        &self,
        organisation: OrganisationId,
        record: &SponsorRecord,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<(LicenceId, LicenceOutcome), ReconcileError> {
        let key = record.licence_key(organisation);
        let existing = guarded(cancel, || self.licences.find_active(&key, cancel))
            .map_err(ReconcileError::FindLicence)?;
        let replacement = NewLicence::from_record(organisation, record);

        let Some(current) = existing else {
            let id = guarded(cancel, || self.licences.insert(&replacement, mode, cancel))
                .map_err(ReconcileError::InsertLicence)?;
            return Ok((id, LicenceOutcome::New));
        };
        if current.rating == record.rating {
            return Ok((current.id, LicenceOutcome::Unchanged));
        }

        guarded(cancel, || self.licences.close(current.id, cancel)).map_err(|source| {
            ReconcileError::CloseLicence {
                id: current.id,
                source,
            }
        })?;
        // A rating change implies a prior pass, so the replacement is always tracked.
        let id = guarded(cancel, || {
            self.licences.insert(&replacement, InsertMode::Tracked, cancel)
        })
        .map_err(ReconcileError::InsertReplacementLicence)?;
        debug!(
            "licence {} re-rated from {:?} to {:?} as {id}",
            current.id, current.rating, record.rating
        );
        Ok((id, LicenceOutcome::Changed))
    }

    /// Close active entities that the pass did not touch.
    ///
    /// Each entity kind is handled independently: failing to list one kind
    /// records an issue and leaves the other kind's closure unaffected.
    fn close_stale(
        &self,
        seen: &Seen,
        tally: &mut Tally,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let organisations = guarded(cancel, || self.organisations.list_active(cancel))
            .map(|rows| rows.into_iter().map(|row| row.id).collect());
        close_unseen(
            EntityKind::Organisation,
            organisations,
            &seen.organisations,
            |id| guarded(cancel, || self.organisations.close(id, cancel)),
            |id| id.0,
            tally,
        )?;

        let licences = guarded(cancel, || self.licences.list_active(cancel))
            .map(|rows| rows.into_iter().map(|row| row.id).collect());
        close_unseen(
            EntityKind::Licence,
            licences,
            &seen.licences,
            |id| guarded(cancel, || self.licences.close(id, cancel)),
            |id| id.0,
            tally,
        )
    }
}

fn close_unseen<I, C, R>(
    kind: EntityKind,
    active: Result<Vec<I>, StoreError>,
    seen: &HashSet<I>,
    mut close: C,
    raw: R,
    tally: &mut Tally,
) -> Result<(), SyncError>
where
    I: Copy + Eq + std::hash::Hash,
    C: FnMut(I) -> Result<(), StoreError>,
    R: Fn(I) -> i64,
{
    let active = match active {
        Ok(ids) => ids,
        Err(err) if err.is_cancelled() => return Err(SyncError::Cancelled),
        Err(source) => {
            warn!("stale {kind} closure skipped: {source}");
            tally.issues.push(SyncIssue::ListActive { kind, source });
            return Ok(());
        }
    };

    for id in active.into_iter().filter(|id| !seen.contains(id)) {
        match close(id) {
            Ok(()) => {
                debug!("closed stale {kind} {}", raw(id));
                tally.record_closed(kind);
            }
            Err(err) if err.is_cancelled() => return Err(SyncError::Cancelled),
            Err(source) => {
                warn!("failed to close stale {kind} {}: {source}", raw(id));
                tally.issues.push(SyncIssue::Close {
                    kind,
                    id: raw(id),
                    source,
                });
            }
        }
    }
    Ok(())
}

/// Run a store call unless `cancel` has already fired.
fn guarded<T>(
    cancel: &CancellationToken,
    call: impl FnOnce() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    ensure_not_cancelled(cancel)?;
    call()
}

fn fatal(err: StoreError, wrap: fn(StoreError) -> SyncError) -> SyncError {
    if err.is_cancelled() {
        SyncError::Cancelled
    } else {
        wrap(err)
    }
}
