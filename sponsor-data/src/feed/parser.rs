//! CSV parsing for the published sponsor register.
//!
//! The register has five columns: organisation name, town/city, county,
//! "type & rating" (e.g. `Worker (A rating)`) and route. The header row is
//! skipped, short rows are logged and dropped, and every field is trimmed.

use std::io::Read;

use csv::{ReaderBuilder, StringRecord, Trim};
use log::warn;
use sponsor_core::SponsorRecord;
use thiserror::Error;

/// Number of columns a usable register row carries.
pub const REGISTER_COLUMNS: usize = 5;

/// Errors raised while parsing the register CSV.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The input had no header row.
    #[error("register CSV is empty; expected a header row")]
    MissingHeader,
    /// The header row could not be read.
    #[error("failed to read register CSV header")]
    Header {
        /// CSV reader error.
        #[source]
        source: csv::Error,
    },
    /// A data row could not be read.
    #[error("failed to read register CSV row {line}")]
    Row {
        /// One-based line number, counting the header as line 1.
        line: u64,
        /// CSV reader error.
        #[source]
        source: csv::Error,
    },
}

/// Parse a register CSV into flat records.
///
/// Rows with fewer than [`REGISTER_COLUMNS`] fields are skipped with a
/// warning; a row that cannot be read at all aborts parsing.
///
/// # Examples
/// ```
/// use sponsor_data::feed::parse_register;
///
/// let csv = "Organisation Name,Town/City,County,Type & Rating,Route\n\
///            StaffCo,Leeds,,Worker (A rating),Skilled Worker\n";
/// let records = parse_register(csv.as_bytes()).expect("parse register");
/// assert_eq!(records[0].licence_type, "Worker");
/// assert_eq!(records[0].rating, "A rating");
/// ```
///
/// # Errors
///
/// Returns [`ParseError`] when the header is missing or a row is malformed
/// beyond repair (for example invalid UTF-8).
pub fn parse_register<R: Read>(reader: R) -> Result<Vec<SponsorRecord>, ParseError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let header = csv_reader
        .headers()
        .map_err(|source| ParseError::Header { source })?;
    if header.is_empty() {
        return Err(ParseError::MissingHeader);
    }

    let mut records = Vec::new();
    for (line, row) in (2_u64..).zip(csv_reader.records()) {
        let row = row.map_err(|source| ParseError::Row { line, source })?;
        match record_from_row(&row) {
            Some(record) => records.push(record),
            None => warn!(
                "skipping malformed register row {line}: {} columns, expected {REGISTER_COLUMNS}",
                row.len()
            ),
        }
    }
    Ok(records)
}

fn record_from_row(row: &StringRecord) -> Option<SponsorRecord> {
    if row.len() < REGISTER_COLUMNS {
        return None;
    }
    let field = |index: usize| row.get(index).unwrap_or_default();
    let (licence_type, rating) = split_type_and_rating(field(3));
    Some(SponsorRecord {
        organisation_name: field(0).to_owned(),
        town_city: field(1).to_owned(),
        county: field(2).to_owned(),
        licence_type,
        rating,
        route: field(4).to_owned(),
    })
}

/// Split a "type & rating" cell into licence type and rating.
///
/// The text before the first `(` is the type and the text after it, minus a
/// trailing `)`, is the rating. Without a parenthesis the whole cell is the
/// type and the rating is empty.
///
/// # Examples
/// ```
/// use sponsor_data::feed::split_type_and_rating;
///
/// assert_eq!(
///     split_type_and_rating("Worker (A rating)"),
///     ("Worker".to_owned(), "A rating".to_owned())
/// );
/// assert_eq!(
///     split_type_and_rating("Temporary Worker"),
///     ("Temporary Worker".to_owned(), String::new())
/// );
/// ```
#[must_use]
pub fn split_type_and_rating(cell: &str) -> (String, String) {
    let cell = cell.trim();
    let Some((licence_type, rest)) = cell.split_once('(') else {
        return (cell.to_owned(), String::new());
    };
    let rest = rest.trim();
    let rating = rest.strip_suffix(')').unwrap_or(rest);
    (licence_type.trim().to_owned(), rating.to_owned())
}
