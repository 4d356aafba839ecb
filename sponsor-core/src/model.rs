//! Domain entities tracked across synchronisation passes.
//!
//! Organisations and licences are versioned rows: a row is only ever created
//! or closed, never edited. The optional validity markers carry the history:
//! an absent start marker means the row pre-dates tracking, and an absent end
//! marker means the row is current.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instant used for validity markers and run bookkeeping.
pub type Timestamp = DateTime<Utc>;

/// A single flat row of the published sponsor register.
///
/// Empty cells in the feed are represented by empty strings. No ordering or
/// uniqueness guarantee applies across a snapshot.
///
/// # Examples
///
/// ```
/// use sponsor_core::SponsorRecord;
///
/// let record = SponsorRecord::new("Acme Ltd", "London", "", "Worker", "A rating", "Skilled Worker");
/// let key = record.organisation_key();
/// assert_eq!(key.county, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SponsorRecord {
    /// Registered organisation name.
    pub organisation_name: String,
    /// Town or city; empty when the register leaves it blank.
    pub town_city: String,
    /// County; empty when the register leaves it blank.
    pub county: String,
    /// Licence type, e.g. `Worker` or `Temporary Worker`.
    pub licence_type: String,
    /// Licence rating, e.g. `A rating`.
    pub rating: String,
    /// Immigration route, e.g. `Skilled Worker`.
    pub route: String,
}

impl SponsorRecord {
    /// Build a record from its six register columns.
    #[must_use]
    pub fn new(
        organisation_name: impl Into<String>,
        town_city: impl Into<String>,
        county: impl Into<String>,
        licence_type: impl Into<String>,
        rating: impl Into<String>,
        route: impl Into<String>,
    ) -> Self {
        Self {
            organisation_name: organisation_name.into(),
            town_city: town_city.into(),
            county: county.into(),
            licence_type: licence_type.into(),
            rating: rating.into(),
            route: route.into(),
        }
    }

    /// Identity key of the organisation named by this record.
    #[must_use]
    pub fn organisation_key(&self) -> OrganisationKey {
        OrganisationKey::new(
            self.organisation_name.as_str(),
            &self.town_city,
            &self.county,
        )
    }

    /// Active-lookup key of the licence described by this record.
    #[must_use]
    pub fn licence_key(&self, organisation_id: OrganisationId) -> LicenceKey {
        LicenceKey {
            organisation_id,
            licence_type: self.licence_type.clone(),
            route: self.route.clone(),
        }
    }
}

/// Natural identity of an organisation.
///
/// Matching is exact and case-sensitive. Empty town/city and county values
/// are normalised to `None` so that an empty cell and an absent value denote
/// the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrganisationKey {
    /// Registered organisation name.
    pub name: String,
    /// Town or city, if known.
    pub town_city: Option<String>,
    /// County, if known.
    pub county: Option<String>,
}

impl OrganisationKey {
    /// Build a key, treating empty strings as absent.
    #[must_use]
    pub fn new(name: impl Into<String>, town_city: &str, county: &str) -> Self {
        Self {
            name: name.into(),
            town_city: non_empty(town_city),
            county: non_empty(county),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

/// Store-assigned organisation identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrganisationId(pub i64);

impl fmt::Display for OrganisationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Store-assigned licence identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LicenceId(pub i64);

impl fmt::Display for LicenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One version of an organisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organisation {
    /// Store-assigned identifier.
    pub id: OrganisationId,
    /// Registered organisation name.
    pub name: String,
    /// Town or city, if known.
    pub town_city: Option<String>,
    /// County, if known.
    pub county: Option<String>,
    /// Validity start; `None` when the row pre-dates tracking.
    pub created_at: Option<Timestamp>,
    /// Validity end; `None` while the row is current.
    pub deleted_at: Option<Timestamp>,
}

impl Organisation {
    /// Identity key of this row.
    #[must_use]
    pub fn key(&self) -> OrganisationKey {
        OrganisationKey {
            name: self.name.clone(),
            town_city: self.town_city.clone(),
            county: self.county.clone(),
        }
    }

    /// Whether the row is the current version of its identity.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Lookup key for the active licence of an organisation.
///
/// Type and route together identify a licence; a change to either yields a
/// different licence rather than a new version of the same one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LicenceKey {
    /// Owning organisation.
    pub organisation_id: OrganisationId,
    /// Licence type.
    pub licence_type: String,
    /// Immigration route.
    pub route: String,
}

/// Insert payload for a licence version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLicence {
    /// Owning organisation.
    pub organisation_id: OrganisationId,
    /// Licence type.
    pub licence_type: String,
    /// Licence rating carried by this version.
    pub rating: String,
    /// Immigration route.
    pub route: String,
}

impl NewLicence {
    /// Build the licence payload for `record` under `organisation_id`.
    #[must_use]
    pub fn from_record(organisation_id: OrganisationId, record: &SponsorRecord) -> Self {
        Self {
            organisation_id,
            licence_type: record.licence_type.clone(),
            rating: record.rating.clone(),
            route: record.route.clone(),
        }
    }
}

/// One version of a licence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Licence {
    /// Store-assigned identifier.
    pub id: LicenceId,
    /// Owning organisation.
    pub organisation_id: OrganisationId,
    /// Licence type.
    pub licence_type: String,
    /// Licence rating.
    pub rating: String,
    /// Immigration route.
    pub route: String,
    /// Validity start; `None` when the row pre-dates tracking.
    pub valid_from: Option<Timestamp>,
    /// Validity end; `None` while the row is current.
    pub valid_to: Option<Timestamp>,
}

impl Licence {
    /// Active-lookup key of this row.
    #[must_use]
    pub fn key(&self) -> LicenceKey {
        LicenceKey {
            organisation_id: self.organisation_id,
            licence_type: self.licence_type.clone(),
            route: self.route.clone(),
        }
    }

    /// Whether the row is the current version of its key.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// How a store stamps the validity start of an inserted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// First-ever pass: the row is presumed to pre-date tracking.
    Bootstrap,
    /// Regular pass: the row starts now.
    Tracked,
}

impl InsertMode {
    /// Whether this is the bootstrap mode.
    #[must_use]
    pub const fn is_bootstrap(self) -> bool {
        matches!(self, Self::Bootstrap)
    }

    /// Validity start marker to persist for a row inserted at `now`.
    #[must_use]
    pub const fn validity_start(self, now: Timestamp) -> Option<Timestamp> {
        match self {
            Self::Bootstrap => None,
            Self::Tracked => Some(now),
        }
    }
}
