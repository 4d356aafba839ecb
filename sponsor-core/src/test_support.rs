//! In-memory feed and stores used by unit and behaviour tests.
//!
//! [`MemoryRegister`] implements all three store contracts over plain vectors
//! and can be told to fail specific calls through [`Fault`]s. [`StaticFeed`]
//! serves a replaceable snapshot. The module is compiled for this crate's
//! own tests and for dependants that enable the `test-support` feature.

use std::cell::RefCell;
use std::collections::HashSet;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::model::{
    InsertMode, Licence, LicenceId, LicenceKey, NewLicence, Organisation, OrganisationId,
    OrganisationKey, SponsorRecord, Timestamp,
};
use crate::stats::{EntityKind, RunSummary, SyncStats};
use crate::store::{
    FeedError, FeedSource, LicenceStore, OrganisationStore, RunStateStore, StoreError,
    ensure_not_cancelled,
};

/// A store call that [`MemoryRegister`] should fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Fail inserts of organisations with this name.
    InsertOrganisation(String),
    /// Fail inserts of licences on this route.
    InsertLicence(String),
    /// Fail listing active entities of this kind.
    ListActive(EntityKind),
    /// Fail closing this organisation.
    CloseOrganisation(OrganisationId),
    /// Fail closing this licence.
    CloseLicence(LicenceId),
    /// Fail reading the bootstrap marker.
    ReadBootstrapMarker,
    /// Fail writing the bootstrap marker.
    WriteBootstrapMarker,
    /// Fail persisting run statistics.
    RecordRun,
}

#[derive(Debug, Default)]
struct MemoryState {
    organisations: Vec<Organisation>,
    licences: Vec<Licence>,
    bootstrap_marker: Option<Timestamp>,
    marker_writes: usize,
    runs: Vec<RunSummary>,
    faults: HashSet<Fault>,
}

/// In-memory organisation, licence and run-state store.
///
/// Identifiers are assigned sequentially from 1 in insertion order.
#[derive(Debug, Default)]
pub struct MemoryRegister {
    state: RefCell<MemoryState>,
}

impl MemoryRegister {
    /// Make subsequent matching calls fail.
    pub fn inject(&self, fault: Fault) {
        self.state.borrow_mut().faults.insert(fault);
    }

    /// Stop failing matching calls.
    pub fn clear_faults(&self) {
        self.state.borrow_mut().faults.clear();
    }

    /// Pretend a bootstrap pass already completed at `value`.
    pub fn seed_bootstrap_marker(&self, value: Timestamp) {
        self.state.borrow_mut().bootstrap_marker = Some(value);
    }

    /// Every organisation row, closed ones included, in insertion order.
    #[must_use]
    pub fn organisations(&self) -> Vec<Organisation> {
        self.state.borrow().organisations.clone()
    }

    /// Every licence row, closed ones included, in insertion order.
    #[must_use]
    pub fn licences(&self) -> Vec<Licence> {
        self.state.borrow().licences.clone()
    }

    /// Current bootstrap marker.
    #[must_use]
    pub fn marker(&self) -> Option<Timestamp> {
        self.state.borrow().bootstrap_marker
    }

    /// Number of successful bootstrap marker writes.
    #[must_use]
    pub fn marker_writes(&self) -> usize {
        self.state.borrow().marker_writes
    }

    /// Summaries of every recorded run, oldest first.
    #[must_use]
    pub fn runs(&self) -> Vec<RunSummary> {
        self.state.borrow().runs.clone()
    }

    fn check(&self, fault: &Fault, operation: &'static str) -> Result<(), StoreError> {
        if self.state.borrow().faults.contains(fault) {
            Err(StoreError::backend(operation, "injected fault"))
        } else {
            Ok(())
        }
    }
}

fn next_id(len: usize) -> i64 {
    i64::try_from(len).map_or(i64::MAX, |value| value + 1)
}

impl OrganisationStore for MemoryRegister {
    fn find_active(
        &self,
        key: &OrganisationKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Organisation>, StoreError> {
        ensure_not_cancelled(cancel)?;
        Ok(self
            .state
            .borrow()
            .organisations
            .iter()
            .find(|row| row.is_active() && row.key() == *key)
            .cloned())
    }

    fn insert(
        &self,
        key: &OrganisationKey,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<OrganisationId, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(
            &Fault::InsertOrganisation(key.name.clone()),
            "insert organisation",
        )?;
        let mut state = self.state.borrow_mut();
        let id = OrganisationId(next_id(state.organisations.len()));
        state.organisations.push(Organisation {
            id,
            name: key.name.clone(),
            town_city: key.town_city.clone(),
            county: key.county.clone(),
            created_at: mode.validity_start(Utc::now()),
            deleted_at: None,
        });
        Ok(id)
    }

    fn close(&self, id: OrganisationId, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(&Fault::CloseOrganisation(id), "close organisation")?;
        let mut state = self.state.borrow_mut();
        let row = state
            .organisations
            .iter_mut()
            .find(|row| row.id == id && row.is_active())
            .ok_or_else(|| StoreError::Conflict {
                operation: "close organisation",
                detail: format!("no active organisation {id}"),
            })?;
        row.deleted_at = Some(Utc::now());
        Ok(())
    }

    fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<Organisation>, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(
            &Fault::ListActive(EntityKind::Organisation),
            "list active organisations",
        )?;
        Ok(self
            .state
            .borrow()
            .organisations
            .iter()
            .filter(|row| row.is_active())
            .cloned()
            .collect())
    }
}

impl LicenceStore for MemoryRegister {
    fn find_active(
        &self,
        key: &LicenceKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Licence>, StoreError> {
        ensure_not_cancelled(cancel)?;
        Ok(self
            .state
            .borrow()
            .licences
            .iter()
            .find(|row| row.is_active() && row.key() == *key)
            .cloned())
    }

    fn insert(
        &self,
        licence: &NewLicence,
        mode: InsertMode,
        cancel: &CancellationToken,
    ) -> Result<LicenceId, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(
            &Fault::InsertLicence(licence.route.clone()),
            "insert licence",
        )?;
        let mut state = self.state.borrow_mut();
        let id = LicenceId(next_id(state.licences.len()));
        state.licences.push(Licence {
            id,
            organisation_id: licence.organisation_id,
            licence_type: licence.licence_type.clone(),
            rating: licence.rating.clone(),
            route: licence.route.clone(),
            valid_from: mode.validity_start(Utc::now()),
            valid_to: None,
        });
        Ok(id)
    }

    fn close(&self, id: LicenceId, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(&Fault::CloseLicence(id), "close licence")?;
        let mut state = self.state.borrow_mut();
        let row = state
            .licences
            .iter_mut()
            .find(|row| row.id == id && row.is_active())
            .ok_or_else(|| StoreError::Conflict {
                operation: "close licence",
                detail: format!("no active licence {id}"),
            })?;
        row.valid_to = Some(Utc::now());
        Ok(())
    }

    fn list_active(&self, cancel: &CancellationToken) -> Result<Vec<Licence>, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(
            &Fault::ListActive(EntityKind::Licence),
            "list active licences",
        )?;
        Ok(self
            .state
            .borrow()
            .licences
            .iter()
            .filter(|row| row.is_active())
            .cloned()
            .collect())
    }
}

impl RunStateStore for MemoryRegister {
    fn bootstrap_marker(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Timestamp>, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(&Fault::ReadBootstrapMarker, "read bootstrap marker")?;
        Ok(self.state.borrow().bootstrap_marker)
    }

    fn set_bootstrap_marker(
        &self,
        value: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(&Fault::WriteBootstrapMarker, "write bootstrap marker")?;
        let mut state = self.state.borrow_mut();
        if let Some(existing) = state.bootstrap_marker {
            return Err(StoreError::Conflict {
                operation: "write bootstrap marker",
                detail: format!("marker already set at {existing}"),
            });
        }
        state.bootstrap_marker = Some(value);
        state.marker_writes += 1;
        Ok(())
    }

    fn record_run(&self, stats: &SyncStats, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        self.check(&Fault::RecordRun, "record run")?;
        self.state.borrow_mut().runs.push(stats.summary());
        Ok(())
    }
}

/// Feed serving a snapshot that tests can swap between passes.
#[derive(Debug, Default)]
pub struct StaticFeed {
    records: RefCell<Vec<SponsorRecord>>,
    unavailable: RefCell<Option<String>>,
    fetches: RefCell<usize>,
}

impl StaticFeed {
    /// Serve `records` until replaced.
    #[must_use]
    pub fn new(records: Vec<SponsorRecord>) -> Self {
        Self {
            records: RefCell::new(records),
            ..Self::default()
        }
    }

    /// Serve `records` from now on.
    pub fn replace(&self, records: Vec<SponsorRecord>) {
        *self.records.borrow_mut() = records;
    }

    /// Fail every subsequent fetch with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.unavailable.borrow_mut() = Some(reason.into());
    }

    /// Number of fetches attempted so far.
    #[must_use]
    pub fn fetches(&self) -> usize {
        *self.fetches.borrow()
    }
}

impl FeedSource for StaticFeed {
    fn fetch_records(&self, cancel: &CancellationToken) -> Result<Vec<SponsorRecord>, FeedError> {
        *self.fetches.borrow_mut() += 1;
        if cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        if let Some(reason) = self.unavailable.borrow().as_ref() {
            return Err(FeedError::unavailable(reason.clone()));
        }
        Ok(self.records.borrow().clone())
    }
}

/// Worker licence record with the given location, rating and route.
#[must_use]
pub fn worker_record(name: &str, town: &str, rating: &str, route: &str) -> SponsorRecord {
    SponsorRecord::new(name, town, "", "Worker", rating, route)
}
