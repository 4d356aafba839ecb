//! Error types emitted by the sponsor CLI.
//!
//! Keep this error type reasonably small, as every command helper returns
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use sponsor_core::SyncError;
use sponsor_data::feed::FeedBuildError;
use sponsor_data::{OpenStoreError, PageRequestError, ReadError};
use thiserror::Error;

/// Errors emitted by the sponsor CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        /// Flag name without leading dashes.
        field: &'static str,
        /// Environment variable that can supply the value.
        env: &'static str,
    },
    /// Two options that select the register source were both supplied.
    #[error("--{first} and --{second} cannot be combined")]
    ConflictingArguments {
        /// First conflicting flag.
        first: &'static str,
        /// Second conflicting flag.
        second: &'static str,
    },
    /// A URL option did not parse.
    #[error("{field} {value:?} is not a valid URL: {source}")]
    InvalidUrl {
        /// Flag name without leading dashes.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },
    /// The database to read from does not exist.
    #[error("database {path:?} does not exist or is not a file")]
    MissingDatabase {
        /// Configured database path.
        path: Utf8PathBuf,
    },
    /// The page bounds or search term were rejected.
    #[error(transparent)]
    InvalidPage(#[from] PageRequestError),
    /// Opening or migrating the database failed.
    #[error(transparent)]
    OpenStore(#[from] OpenStoreError),
    /// Building the HTTP register feed failed.
    #[error("failed to build register feed: {0}")]
    BuildFeed(#[from] FeedBuildError),
    /// The synchronisation pass failed.
    #[error(transparent)]
    Sync(Box<SyncError>),
    /// Reading the active register failed.
    #[error(transparent)]
    Read(#[from] ReadError),
    /// Serialising command output failed.
    #[error("failed to serialise output: {0}")]
    SerialiseOutput(#[source] serde_json::Error),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<SyncError> for CliError {
    fn from(error: SyncError) -> Self {
        Self::Sync(Box::new(error))
    }
}
