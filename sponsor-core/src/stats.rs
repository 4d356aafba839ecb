//! Per-pass statistics returned by the reconciliation engine.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::model::Timestamp;
use crate::store::StoreError;
use crate::sync::ReconcileError;

/// What happened to a licence while reconciling one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenceOutcome {
    /// No active licence matched; a new one was inserted.
    New,
    /// The active licence already carried the record's rating.
    Unchanged,
    /// The rating differed; the old row was closed and a new one opened.
    Changed,
}

/// The two entity kinds reconciled by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Sponsor organisations.
    Organisation,
    /// Sponsor licences.
    Licence,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Organisation => "organisation",
            Self::Licence => "licence",
        })
    }
}

/// A recoverable failure collected during a pass.
///
/// Issues never abort the pass. A non-empty issue list means the affected
/// records or entities were skipped; re-running the pass is safe.
#[derive(Debug, Error)]
pub enum SyncIssue {
    /// Reconciling one feed record failed; the record was skipped.
    #[error("record {index} ({organisation}): {source}")]
    Record {
        /// Zero-based position of the record in the feed snapshot.
        index: usize,
        /// Organisation named by the record.
        organisation: String,
        /// Store failure that stopped the record.
        #[source]
        source: ReconcileError,
    },
    /// Listing active entities failed; no entity of that kind was closed.
    #[error("failed to list active {kind}s: {source}")]
    ListActive {
        /// Entity kind whose closure was skipped.
        kind: EntityKind,
        /// Store failure.
        #[source]
        source: StoreError,
    },
    /// Closing one stale entity failed.
    #[error("failed to close {kind} {id}: {source}")]
    Close {
        /// Entity kind.
        kind: EntityKind,
        /// Raw identifier of the entity left open.
        id: i64,
        /// Store failure.
        #[source]
        source: StoreError,
    },
}

/// Aggregate outcome of one synchronisation pass.
///
/// Built once by the engine at the end of a pass and never mutated
/// afterwards. Issues serialise as their display strings.
#[derive(Debug, Serialize)]
pub struct SyncStats {
    /// When the pass started.
    pub started_at: Timestamp,
    /// When reconciliation and closure finished.
    pub finished_at: Timestamp,
    /// Whether the pass ran with bootstrap semantics.
    pub bootstrap: bool,
    /// Organisations inserted because no active row matched.
    pub new_organisations: u64,
    /// Licences inserted because no active row matched.
    pub new_licences: u64,
    /// Licences re-versioned because their rating changed.
    pub changed_licences: u64,
    /// Active organisations closed because the feed no longer lists them.
    pub closed_organisations: u64,
    /// Active licences closed because the feed no longer lists them.
    pub closed_licences: u64,
    /// Recoverable failures collected during the pass.
    #[serde(rename = "errors", serialize_with = "serialize_issues")]
    pub issues: Vec<SyncIssue>,
}

impl SyncStats {
    /// Whether the pass completed without recoverable failures.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Counters of the pass without timestamps or issue details.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            bootstrap: self.bootstrap,
            new_organisations: self.new_organisations,
            new_licences: self.new_licences,
            changed_licences: self.changed_licences,
            closed_organisations: self.closed_organisations,
            closed_licences: self.closed_licences,
            error_count: self.issues.len(),
        }
    }

    /// Display strings of every issue, in the order they were collected.
    #[must_use]
    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

fn serialize_issues<S: Serializer>(issues: &[SyncIssue], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(issues.iter().map(ToString::to_string))
}

/// Comparable counters of a pass, as kept in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    /// Whether the pass ran with bootstrap semantics.
    pub bootstrap: bool,
    /// See [`SyncStats::new_organisations`].
    pub new_organisations: u64,
    /// See [`SyncStats::new_licences`].
    pub new_licences: u64,
    /// See [`SyncStats::changed_licences`].
    pub changed_licences: u64,
    /// See [`SyncStats::closed_organisations`].
    pub closed_organisations: u64,
    /// See [`SyncStats::closed_licences`].
    pub closed_licences: u64,
    /// Number of recoverable failures.
    pub error_count: usize,
}

/// Mutable counters accumulated while a pass is running.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub(crate) new_organisations: u64,
    pub(crate) new_licences: u64,
    pub(crate) changed_licences: u64,
    pub(crate) closed_organisations: u64,
    pub(crate) closed_licences: u64,
    pub(crate) issues: Vec<SyncIssue>,
}

impl Tally {
    pub(crate) fn record_licence(&mut self, outcome: LicenceOutcome) {
        match outcome {
            LicenceOutcome::New => self.new_licences += 1,
            LicenceOutcome::Changed => self.changed_licences += 1,
            LicenceOutcome::Unchanged => {}
        }
    }

    pub(crate) fn record_closed(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Organisation => self.closed_organisations += 1,
            EntityKind::Licence => self.closed_licences += 1,
        }
    }

    pub(crate) fn finish(
        self,
        started_at: Timestamp,
        finished_at: Timestamp,
        bootstrap: bool,
    ) -> SyncStats {
        SyncStats {
            started_at,
            finished_at,
            bootstrap,
            new_organisations: self.new_organisations,
            new_licences: self.new_licences,
            changed_licences: self.changed_licences,
            closed_organisations: self.closed_organisations,
            closed_licences: self.closed_licences,
            issues: self.issues,
        }
    }
}
