//! Command-line interface for tracking the register of licensed sponsors.
//!
//! `sponsor-tracker sync` runs one synchronisation pass into a SQLite
//! database and prints its statistics. `sponsor-tracker list` prints a page
//! of the currently active register. Both print JSON on stdout; diagnostics
//! go to the log on stderr.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;

mod error;
mod list;
mod sync;

pub use error::CliError;

use list::{ListArgs, run_list};
use sync::{SyncArgs, run_sync};

pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_CSV_URL: &str = "csv-url";
pub(crate) const ARG_CSV_FILE: &str = "csv-file";
pub(crate) const ARG_PAGE_URL: &str = "page-url";
pub(crate) const ARG_FROM: &str = "from";
pub(crate) const ARG_TO: &str = "to";
pub(crate) const ARG_SEARCH: &str = "search";
pub(crate) const ENV_SYNC_DATABASE: &str = "SPONSOR_CMDS_SYNC_DATABASE";
pub(crate) const ENV_LIST_DATABASE: &str = "SPONSOR_CMDS_LIST_DATABASE";

/// Run the CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] when arguments or configuration are invalid, or when
/// the requested command fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Command::Sync(args) => run_sync(args, &mut stdout),
        Command::List(args) => run_list(args, &mut stdout),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "sponsor-tracker",
    about = "Track the UK register of licensed sponsors as a versioned history",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch the register and reconcile it into the database.
    Sync(SyncArgs),
    /// Print a page of the active register.
    List(ListArgs),
}

/// Write `value` as pretty JSON followed by a newline.
pub(crate) fn write_json<T: Serialize>(writer: &mut dyn Write, value: &T) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *writer, value).map_err(CliError::SerialiseOutput)?;
    writeln!(writer).map_err(CliError::WriteOutput)
}

#[cfg(test)]
mod tests;
