//! `sync` command: one synchronisation pass into a SQLite database.

use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use sponsor_core::{CancellationToken, FeedSource, SyncError, SyncStats, Syncer};
use sponsor_data::feed::PUBLICATION_PAGE_URL;
use sponsor_data::{CsvFileFeed, CsvLocation, HttpFeedSource, SqliteStore};
use std::io::Write;
use url::Url;

use crate::{
    ARG_CSV_FILE, ARG_CSV_URL, ARG_DATABASE, ARG_PAGE_URL, CliError, ENV_SYNC_DATABASE,
    write_json,
};

/// CLI arguments for the `sync` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "sync",
    long_about = "Fetch the current register and reconcile it into the \
                 database. Without --csv-url or --csv-file the CSV link is \
                 discovered from the publication page.",
    about = "Synchronise the register into the database"
)]
#[ortho_config(prefix = "SPONSOR")]
pub(crate) struct SyncArgs {
    /// Path to the SQLite database; created when missing.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Download the register CSV from this URL.
    #[arg(long = ARG_CSV_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) csv_url: Option<String>,
    /// Read the register CSV from a local file.
    #[arg(long = ARG_CSV_FILE, value_name = "path")]
    #[serde(default)]
    pub(crate) csv_file: Option<Utf8PathBuf>,
    /// Publication page to discover the CSV link from.
    #[arg(long = ARG_PAGE_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) page_url: Option<String>,
}

impl SyncArgs {
    fn into_config(self) -> Result<SyncConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        SyncConfig::try_from(merged)
    }
}

/// Where a pass reads the register from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RegisterSource {
    File(Utf8PathBuf),
    Http(CsvLocation),
}

/// Resolved `sync` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyncConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) source: RegisterSource,
}

impl TryFrom<SyncArgs> for SyncConfig {
    type Error = CliError;

    fn try_from(args: SyncArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_SYNC_DATABASE,
        })?;
        let source = match (args.csv_file, args.csv_url, args.page_url) {
            (Some(_), Some(_), _) => return Err(conflict(ARG_CSV_FILE, ARG_CSV_URL)),
            (Some(_), None, Some(_)) => return Err(conflict(ARG_CSV_FILE, ARG_PAGE_URL)),
            (None, Some(_), Some(_)) => return Err(conflict(ARG_CSV_URL, ARG_PAGE_URL)),
            (Some(path), None, None) => RegisterSource::File(path),
            (None, Some(url), None) => {
                RegisterSource::Http(CsvLocation::Direct(parse_url(ARG_CSV_URL, url)?))
            }
            (None, None, page_url) => RegisterSource::Http(discovery_location(page_url)?),
        };
        Ok(Self { database, source })
    }
}

const fn conflict(first: &'static str, second: &'static str) -> CliError {
    CliError::ConflictingArguments { first, second }
}

fn discovery_location(page_url: Option<String>) -> Result<CsvLocation, CliError> {
    match page_url {
        Some(page) => Ok(CsvLocation::Discover(parse_url(ARG_PAGE_URL, page)?)),
        None => CsvLocation::publication_page().map_err(|source| CliError::InvalidUrl {
            field: ARG_PAGE_URL,
            value: PUBLICATION_PAGE_URL.to_owned(),
            source,
        }),
    }
}

fn parse_url(field: &'static str, value: String) -> Result<Url, CliError> {
    Url::parse(&value).map_err(|source| CliError::InvalidUrl {
        field,
        value,
        source,
    })
}

pub(crate) fn run_sync(args: SyncArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    run_sync_with(&config, writer)
}

/// Run one pass for `config` and print its statistics.
///
/// A pass whose statistics could not be recorded still prints them before
/// the failure is reported.
pub(crate) fn run_sync_with(config: &SyncConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    let store = SqliteStore::open(&config.database)?;
    let outcome = match &config.source {
        RegisterSource::File(path) => {
            let feed = CsvFileFeed::new(path.clone());
            log::info!("reading sponsor register from {}", feed.path());
            sync_from(&feed, &store)
        }
        RegisterSource::Http(location) => {
            let feed = HttpFeedSource::new(location.clone())?;
            match &feed.config().location {
                CsvLocation::Direct(url) => log::info!("using register CSV at {url}"),
                CsvLocation::Discover(page) => {
                    log::info!("discovering sponsor register from {page}");
                }
            }
            sync_from(&feed, &store)
        }
    };
    match outcome {
        Ok(stats) => {
            report(&stats);
            write_json(writer, &stats)
        }
        Err(SyncError::RecordRun { source, stats }) => {
            write_json(writer, &stats)?;
            Err(SyncError::RecordRun { source, stats }.into())
        }
        Err(err) => Err(err.into()),
    }
}

fn sync_from(feed: &dyn FeedSource, store: &SqliteStore) -> Result<SyncStats, SyncError> {
    Syncer::new(feed, store, store, store).run(&CancellationToken::new())
}

fn report(stats: &SyncStats) {
    if stats.is_clean() {
        log::info!("synchronisation pass finished cleanly");
    } else {
        log::warn!(
            "synchronisation pass finished with {} issue(s)",
            stats.issues.len()
        );
    }
}
