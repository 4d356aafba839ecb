//! Read-only paginated view of the current register.
//!
//! [`SqliteStore::snapshot`] answers "which sponsors are active right now",
//! one page at a time, optionally narrowed by a search term. All queries run
//! inside one transaction so the page, the total and the licences agree.

use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;
use sponsor_core::{Licence, Organisation, Timestamp};
use thiserror::Error;

use crate::store::{SqliteStore, licence_select, organisation_select, read_bootstrap_marker};

/// Largest position accepted for `from` and `to`.
pub const MAX_POSITION: u32 = 1_000_000_000;
/// Largest number of organisations returned by one page.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Longest accepted search term, in characters.
pub const MAX_SEARCH_CHARS: usize = 200;

/// Validation failures for a [`PageRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageRequestError {
    /// `from` lies outside `1..=MAX_POSITION`.
    #[error("from must be between 1 and {}", MAX_POSITION)]
    FromOutOfRange,
    /// `to` lies outside `1..=MAX_POSITION`.
    #[error("to must be between 1 and {}", MAX_POSITION)]
    ToOutOfRange,
    /// `to` precedes `from`.
    #[error("to ({to}) must be >= from ({from})")]
    Inverted {
        /// Requested first position.
        from: u32,
        /// Requested last position.
        to: u32,
    },
    /// The page spans more than [`MAX_PAGE_SIZE`] organisations.
    #[error("page size must not exceed {}", MAX_PAGE_SIZE)]
    PageTooLarge,
    /// The search term is longer than [`MAX_SEARCH_CHARS`].
    #[error("search must not exceed {} characters", MAX_SEARCH_CHARS)]
    SearchTooLong,
}

/// A validated page of active organisations.
///
/// Positions are 1-based and inclusive, counted over active organisations
/// ordered by name after the search filter is applied.
///
/// # Examples
/// ```
/// use sponsor_data::reader::{PageRequest, PageRequestError};
///
/// let page = PageRequest::new(1, 25, "leeds").expect("valid page");
/// assert_eq!(page.limit(), 25);
/// assert_eq!(
///     PageRequest::new(1, 101, "").unwrap_err(),
///     PageRequestError::PageTooLarge
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    from: u32,
    to: u32,
    search: String,
}

impl PageRequest {
    /// Validate and build a page request.
    ///
    /// # Errors
    ///
    /// Returns [`PageRequestError`] when a bound is out of range, the bounds
    /// are inverted, the page is too large or the search term is too long.
    pub fn new(from: u32, to: u32, search: impl Into<String>) -> Result<Self, PageRequestError> {
        if !(1..=MAX_POSITION).contains(&from) {
            return Err(PageRequestError::FromOutOfRange);
        }
        if !(1..=MAX_POSITION).contains(&to) {
            return Err(PageRequestError::ToOutOfRange);
        }
        if to < from {
            return Err(PageRequestError::Inverted { from, to });
        }
        if to - from >= MAX_PAGE_SIZE {
            return Err(PageRequestError::PageTooLarge);
        }
        let search = search.into();
        if search.chars().count() > MAX_SEARCH_CHARS {
            return Err(PageRequestError::SearchTooLong);
        }
        Ok(Self { from, to, search })
    }

    /// First position of the page.
    #[must_use]
    pub const fn from(&self) -> u32 {
        self.from
    }

    /// Last position of the page.
    #[must_use]
    pub const fn to(&self) -> u32 {
        self.to
    }

    /// Search term; empty when unfiltered.
    #[must_use]
    pub fn search(&self) -> &str {
        &self.search
    }

    /// Number of organisations the page can hold.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.to - self.from + 1
    }

    const fn offset(&self) -> u32 {
        self.from - 1
    }

    fn like_pattern(&self) -> Option<String> {
        (!self.search.is_empty())
            .then(|| format!("%{}%", escape_like(&self.search.to_lowercase())))
    }
}

/// Escape `\`, `%` and `_` so the term matches literally inside `LIKE`.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// One page of the current register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterSnapshot {
    /// When the bootstrap pass completed; `None` before the first pass.
    pub initial_run_time: Option<Timestamp>,
    /// Active organisations matching the search, across all pages.
    pub total_organisations: u64,
    /// First position requested.
    pub from: u32,
    /// Last position requested.
    pub to: u32,
    /// Active organisations on this page, ordered by name.
    pub organisations: Vec<Organisation>,
    /// Active licences held by the organisations on this page.
    pub licences: Vec<Licence>,
}

/// Failure while reading a snapshot.
#[derive(Debug, Error)]
#[error("failed to read register snapshot ({step})")]
pub struct ReadError {
    step: &'static str,
    #[source]
    source: rusqlite::Error,
}

impl ReadError {
    fn at(step: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self { step, source }
    }

    /// Name of the query that failed.
    #[must_use]
    pub const fn step(&self) -> &'static str {
        self.step
    }
}

/// SQL function folding text to lower case with Unicode rules.
///
/// SQLite's own `LIKE` and `lower()` only fold ASCII letters.
const FOLD_CASE_FN: &str = "sponsor_fold_case";

const SEARCH_FILTER: &str = "(sponsor_fold_case(name) LIKE ?1 ESCAPE '\\' \
                             OR sponsor_fold_case(town_city) LIKE ?1 ESCAPE '\\')";

/// Register the SQL functions the search filter relies on.
pub(crate) fn register_search_functions(connection: &Connection) -> rusqlite::Result<()> {
    connection.create_scalar_function(
        FOLD_CASE_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |context| {
            let text: Option<String> = context.get(0)?;
            Ok(text.map(|value| value.to_lowercase()))
        },
    )
}

impl SqliteStore {
    /// Read one page of active organisations and their active licences.
    ///
    /// Matching is a substring test over the organisation name and
    /// town/city that ignores case for any Unicode letter, not only ASCII.
    /// Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError`] when any query fails.
    pub fn snapshot(&self, request: &PageRequest) -> Result<RegisterSnapshot, ReadError> {
        let transaction = self
            .connection()
            .unchecked_transaction()
            .map_err(ReadError::at("begin read transaction"))?;

        let initial_run_time =
            read_bootstrap_marker(&transaction).map_err(ReadError::at("read bootstrap marker"))?;
        let pattern = request.like_pattern();
        let total_organisations = count_active(&transaction, pattern.as_deref())?;
        let organisations = page_of_active(&transaction, request, pattern.as_deref())?;
        let licences = active_licences_of(&transaction, &organisations)?;

        transaction
            .commit()
            .map_err(ReadError::at("finish read transaction"))?;

        Ok(RegisterSnapshot {
            initial_run_time,
            total_organisations,
            from: request.from(),
            to: request.to(),
            organisations,
            licences,
        })
    }
}

fn count_active(connection: &Connection, pattern: Option<&str>) -> Result<u64, ReadError> {
    let count: i64 = match pattern {
        Some(like) => connection.query_row(
            &format!(
                "SELECT COUNT(*) FROM organisations WHERE deleted_at IS NULL AND {SEARCH_FILTER}"
            ),
            [like],
            |row| row.get(0),
        ),
        None => connection.query_row(
            "SELECT COUNT(*) FROM organisations WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        ),
    }
    .map_err(ReadError::at("count active organisations"))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

fn page_of_active(
    connection: &Connection,
    request: &PageRequest,
    pattern: Option<&str>,
) -> Result<Vec<Organisation>, ReadError> {
    let step = "select organisation page";
    let filter = if pattern.is_some() {
        format!("AND {SEARCH_FILTER}")
    } else {
        // Keep ?1 bound so the parameter positions stay fixed.
        "AND ?1 IS NULL".to_owned()
    };
    let sql = format!(
        "{} WHERE deleted_at IS NULL {filter} ORDER BY name, id LIMIT ?2 OFFSET ?3",
        organisation_select()
    );
    let mut statement = connection.prepare(&sql).map_err(ReadError::at(step))?;
    let rows = statement
        .query_map(
            params![pattern, request.limit(), request.offset()],
            crate::store::organisation_from_row,
        )
        .and_then(Iterator::collect)
        .map_err(ReadError::at(step));
    rows
}

fn active_licences_of(
    connection: &Connection,
    organisations: &[Organisation],
) -> Result<Vec<Licence>, ReadError> {
    if organisations.is_empty() {
        return Ok(Vec::new());
    }
    let step = "select page licences";
    let placeholders = vec!["?"; organisations.len()].join(", ");
    let sql = format!(
        "{} WHERE valid_to IS NULL AND organisation_id IN ({placeholders})
         ORDER BY organisation_id, id",
        licence_select()
    );
    let mut statement = connection.prepare(&sql).map_err(ReadError::at(step))?;
    let rows = statement
        .query_map(
            params_from_iter(organisations.iter().map(|organisation| organisation.id.0)),
            crate::store::licence_from_row,
        )
        .and_then(Iterator::collect)
        .map_err(ReadError::at(step));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use sponsor_core::test_support::{StaticFeed, worker_record};
    use sponsor_core::{CancellationToken, Syncer};

    #[fixture]
    fn populated() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("open in-memory store");
        let feed = StaticFeed::new(vec![
            worker_record("Zeta Care", "Leeds", "A rating", "Skilled Worker"),
            worker_record("Alpha Ltd", "York", "A rating", "Skilled Worker"),
            worker_record("Alpha Ltd", "York", "A rating", "Global Business Mobility"),
            worker_record("100% Staffing", "Hull", "B rating", "Skilled Worker"),
            worker_record("Mid_Point", "Leeds", "A rating", "Skilled Worker"),
        ]);
        Syncer::new(&feed, &store, &store, &store)
            .run(&CancellationToken::new())
            .expect("bootstrap pass");
        store
    }

    #[rstest]
    #[case(0, 10, PageRequestError::FromOutOfRange)]
    #[case(1, 0, PageRequestError::ToOutOfRange)]
    #[case(1, MAX_POSITION + 1, PageRequestError::ToOutOfRange)]
    #[case(10, 5, PageRequestError::Inverted { from: 10, to: 5 })]
    #[case(1, 101, PageRequestError::PageTooLarge)]
    fn rejects_invalid_bounds(#[case] from: u32, #[case] to: u32, #[case] expected: PageRequestError) {
        assert_eq!(PageRequest::new(from, to, ""), Err(expected));
    }

    #[rstest]
    fn accepts_boundary_requests() {
        assert!(PageRequest::new(1, 100, "").is_ok());
        assert!(PageRequest::new(MAX_POSITION, MAX_POSITION, "").is_ok());
        assert!(PageRequest::new(1, 1, "x".repeat(MAX_SEARCH_CHARS)).is_ok());
        assert_eq!(
            PageRequest::new(1, 1, "x".repeat(MAX_SEARCH_CHARS + 1)),
            Err(PageRequestError::SearchTooLong)
        );
    }

    #[rstest]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like(r"50%_off\"), r"50\%\_off\\");
    }

    #[rstest]
    fn pages_are_ordered_by_name(populated: SqliteStore) {
        let request = PageRequest::new(1, 2, "").expect("valid page");

        let snapshot = populated.snapshot(&request).expect("snapshot");

        assert_eq!(snapshot.total_organisations, 4);
        let names: Vec<_> = snapshot
            .organisations
            .iter()
            .map(|organisation| organisation.name.as_str())
            .collect();
        assert_eq!(names, ["100% Staffing", "Alpha Ltd"]);
        assert_eq!(snapshot.licences.len(), 3);
        assert!(snapshot.initial_run_time.is_some());
    }

    #[rstest]
    fn second_page_continues_the_order(populated: SqliteStore) {
        let request = PageRequest::new(3, 10, "").expect("valid page");

        let snapshot = populated.snapshot(&request).expect("snapshot");

        let names: Vec<_> = snapshot
            .organisations
            .iter()
            .map(|organisation| organisation.name.as_str())
            .collect();
        assert_eq!(names, ["Mid_Point", "Zeta Care"]);
        assert_eq!((snapshot.from, snapshot.to), (3, 10));
    }

    #[rstest]
    #[case("leeds", 2)]
    #[case("ALPHA", 1)]
    #[case("%", 1)]
    #[case("_", 1)]
    #[case("nowhere", 0)]
    fn search_matches_name_or_town_literally(
        populated: SqliteStore,
        #[case] term: &str,
        #[case] expected: u64,
    ) {
        let request = PageRequest::new(1, 100, term).expect("valid page");

        let snapshot = populated.snapshot(&request).expect("snapshot");

        assert_eq!(snapshot.total_organisations, expected);
        assert_eq!(snapshot.organisations.len() as u64, expected);
    }

    #[rstest]
    #[case("école")]
    #[case("ÉCOLE")]
    #[case("ærø")]
    #[case("ÆRØ")]
    fn search_folds_non_ascii_letters(#[case] term: &str) {
        let store = SqliteStore::open_in_memory().expect("open in-memory store");
        let feed = StaticFeed::new(vec![
            worker_record("École Française", "Ærøskøbing", "A rating", "Skilled Worker"),
            worker_record("Staffco", "Leeds", "A rating", "Skilled Worker"),
        ]);
        Syncer::new(&feed, &store, &store, &store)
            .run(&CancellationToken::new())
            .expect("bootstrap pass");
        let request = PageRequest::new(1, 10, term).expect("valid page");

        let snapshot = store.snapshot(&request).expect("snapshot");

        assert_eq!(snapshot.total_organisations, 1);
        assert_eq!(snapshot.organisations[0].name, "École Française");
    }

    #[rstest]
    fn failed_query_names_its_step(populated: SqliteStore) {
        populated
            .connection()
            .execute_batch("DROP TABLE config")
            .expect("drop config table");
        let request = PageRequest::new(1, 10, "").expect("valid page");

        let err = populated.snapshot(&request).expect_err("missing table");

        assert_eq!(err.step(), "read bootstrap marker");
    }

    #[rstest]
    fn empty_store_has_no_initial_run() {
        let store = SqliteStore::open_in_memory().expect("open in-memory store");
        let request = PageRequest::new(1, 10, "").expect("valid page");

        let snapshot = store.snapshot(&request).expect("snapshot");

        assert_eq!(snapshot.initial_run_time, None);
        assert!(snapshot.organisations.is_empty());
        assert!(snapshot.licences.is_empty());
    }
}
