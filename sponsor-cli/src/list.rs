//! `list` command: print a page of the active register.

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use sponsor_data::reader::MAX_POSITION;
use sponsor_data::{PageRequest, SqliteStore};
use std::io::Write;

use crate::{ARG_DATABASE, ARG_FROM, ARG_SEARCH, ARG_TO, CliError, ENV_LIST_DATABASE, write_json};

/// First position listed when `--from` is omitted.
const DEFAULT_FROM: u32 = 1;
/// Page length used when `--to` is omitted.
const DEFAULT_PAGE_LEN: u32 = 50;

/// CLI arguments for the `list` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "list",
    long_about = "Print active organisations ordered by name, with their \
                 active licences. Positions are one-based and inclusive; a \
                 page holds at most 100 organisations.",
    about = "List the active register"
)]
#[ortho_config(prefix = "SPONSOR")]
pub(crate) struct ListArgs {
    /// Path to an existing SQLite database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// First position to list (default 1).
    #[arg(long = ARG_FROM, value_name = "n")]
    #[serde(default)]
    pub(crate) from: Option<u32>,
    /// Last position to list (default: a page of 50).
    #[arg(long = ARG_TO, value_name = "n")]
    #[serde(default)]
    pub(crate) to: Option<u32>,
    /// Case-insensitive substring of the name or town.
    #[arg(long = ARG_SEARCH, value_name = "text")]
    #[serde(default)]
    pub(crate) search: Option<String>,
}

impl ListArgs {
    fn into_config(self) -> Result<ListConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ListConfig::try_from(merged)
    }
}

/// Resolved `list` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) request: PageRequest,
}

impl ListConfig {
    fn require_database(path: &Utf8Path) -> Result<(), CliError> {
        if path.is_file() {
            Ok(())
        } else {
            Err(CliError::MissingDatabase {
                path: path.to_path_buf(),
            })
        }
    }
}

impl TryFrom<ListArgs> for ListConfig {
    type Error = CliError;

    fn try_from(args: ListArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_LIST_DATABASE,
        })?;
        let from = args.from.unwrap_or(DEFAULT_FROM);
        let to = args
            .to
            .unwrap_or_else(|| from.saturating_add(DEFAULT_PAGE_LEN - 1).min(MAX_POSITION));
        let request = PageRequest::new(from, to, args.search.unwrap_or_default())?;
        Ok(Self { database, request })
    }
}

pub(crate) fn run_list(args: ListArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    run_list_with(&config, writer)
}

pub(crate) fn run_list_with(config: &ListConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    ListConfig::require_database(&config.database)?;
    let store = SqliteStore::open(&config.database)?;
    let snapshot = store.snapshot(&config.request)?;
    write_json(writer, &snapshot)
}
