//! Data access and ingestion adapters for the sponsor register tracker.
//!
//! Responsibilities:
//! - Persist organisation and licence history in SQLite.
//! - Serve paginated read views over the current register.
//! - Fetch and parse the published register CSV from HTTP or disk.
//!
//! Boundaries:
//! - Do not encode reconciliation rules (live in `sponsor-core`).
//! - Keep blocking I/O behind the synchronous store and feed traits.
//!
//! Invariants:
//! - History rows are only inserted or closed, never edited.
//! - No global mutable state.

pub mod feed;
pub mod reader;
pub mod store;

pub use feed::{CsvFileFeed, CsvLocation, FetchError, HttpFeedConfig, HttpFeedSource};
pub use reader::{PageRequest, PageRequestError, ReadError, RegisterSnapshot};
pub use store::{OpenStoreError, SchemaError, SqliteStore};
