//! `FeedSource` over a register CSV stored on disk.

use std::fs::File;
use std::io::BufReader;

use camino::{Utf8Path, Utf8PathBuf};
use sponsor_core::{CancellationToken, FeedError, FeedSource, SponsorRecord};

use super::FetchError;
use super::parser::parse_register;

/// Register feed read from a local CSV file.
///
/// Useful for offline runs and for replaying a previously downloaded
/// snapshot. The file is re-read on every fetch.
///
/// # Examples
/// ```no_run
/// use sponsor_core::{CancellationToken, FeedSource};
/// use sponsor_data::feed::CsvFileFeed;
///
/// let feed = CsvFileFeed::new("register.csv");
/// let records = feed.fetch_records(&CancellationToken::new())?;
/// # Ok::<(), sponsor_core::FeedError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvFileFeed {
    path: Utf8PathBuf,
}

impl CsvFileFeed {
    /// Read the register from `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path the register is read from.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<SponsorRecord>, FetchError> {
        let file = File::open(self.path.as_std_path()).map_err(|source| FetchError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(parse_register(BufReader::new(file))?)
    }
}

impl FeedSource for CsvFileFeed {
    fn fetch_records(&self, cancel: &CancellationToken) -> Result<Vec<SponsorRecord>, FeedError> {
        if cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        log::info!("reading sponsor register from {}", self.path);
        self.read().map_err(FeedError::unavailable)
    }
}
