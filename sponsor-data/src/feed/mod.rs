//! Adapters that obtain the published sponsor register.
//!
//! - [`parse_register`] turns the register CSV into [`SponsorRecord`]s.
//! - [`extract_csv_url`] finds the current CSV link on the publication page.
//! - [`HttpFeedSource`] downloads (and optionally discovers) the CSV.
//! - [`CsvFileFeed`] reads a CSV stored on disk.
//!
//! [`SponsorRecord`]: sponsor_core::SponsorRecord

mod discovery;
mod file;
mod http;
mod parser;

use camino::Utf8PathBuf;
use thiserror::Error;

pub use discovery::{PUBLICATION_PAGE_URL, extract_csv_url};
pub use file::CsvFileFeed;
pub use http::{CsvLocation, DEFAULT_USER_AGENT, FeedBuildError, HttpFeedConfig, HttpFeedSource};
pub use parser::{ParseError, REGISTER_COLUMNS, parse_register, split_type_and_rating};

/// Reasons a register snapshot could not be obtained.
///
/// Surfaced to the engine as the source of
/// [`FeedError::Unavailable`](sponsor_core::FeedError::Unavailable).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The local register file could not be opened.
    #[error("failed to open register file {path}")]
    Open {
        /// File path.
        path: Utf8PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A request exceeded the configured timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Requested URL.
        url: String,
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },
    /// The server answered with an error status.
    #[error("request to {url} failed with HTTP status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The request failed before a response arrived.
    #[error("request to {url} failed: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Transport error description.
        message: String,
    },
    /// The publication page carried no register CSV link.
    #[error("no register CSV link found on {page}")]
    LinkNotFound {
        /// Publication page URL.
        page: String,
    },
    /// The discovered link was not a valid URL.
    #[error("invalid register CSV link {link}")]
    InvalidLink {
        /// Link text as found on the page.
        link: String,
        /// URL parser error.
        #[source]
        source: url::ParseError,
    },
    /// The CSV could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}
