//! HTTP-based `FeedSource` downloading the published register.
//!
//! [`HttpFeedSource`] either downloads a known CSV URL or first scrapes the
//! current link from the publication page. The [`FeedSource`] trait is
//! synchronous, so the source owns a Tokio runtime and blocks on it, racing
//! every request against the caller's cancellation token.

use std::time::Duration;

use reqwest::Client;
use sponsor_core::{CancellationToken, FeedError, FeedSource, SponsorRecord};
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use url::Url;

use super::discovery::{PUBLICATION_PAGE_URL, extract_csv_url};
use super::parser::parse_register;
use super::FetchError;

/// Default user agent for register requests.
pub const DEFAULT_USER_AGENT: &str = "sponsor-tracker/0.1";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors raised while building an [`HttpFeedSource`].
#[derive(Debug, thiserror::Error)]
pub enum FeedBuildError {
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    /// Failed to build the Tokio runtime.
    #[error("failed to build Tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Where the register CSV is obtained from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvLocation {
    /// Download this CSV directly.
    Direct(Url),
    /// Scrape the CSV link from this publication page, then download it.
    Discover(Url),
}

impl CsvLocation {
    /// Discover the CSV from the official publication page.
    ///
    /// # Errors
    ///
    /// Returns an error only if [`PUBLICATION_PAGE_URL`] stops being a valid
    /// absolute URL.
    pub fn publication_page() -> Result<Self, url::ParseError> {
        Url::parse(PUBLICATION_PAGE_URL).map(Self::Discover)
    }
}

/// Configuration for [`HttpFeedSource`].
#[derive(Debug, Clone)]
pub struct HttpFeedConfig {
    /// Where to obtain the CSV.
    pub location: CsvLocation,
    /// Request timeout duration.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl HttpFeedConfig {
    /// Create a configuration for the given location.
    #[must_use]
    pub fn new(location: CsvLocation) -> Self {
        Self {
            location,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Register feed served over HTTP.
///
/// # Runtime behaviour
///
/// Outside any Tokio runtime, or inside a `current_thread` runtime, the
/// source blocks on its own runtime. Inside a multi-threaded runtime it uses
/// [`tokio::task::block_in_place`] on the caller's handle.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use sponsor_core::{CancellationToken, FeedSource};
/// use sponsor_data::feed::{CsvLocation, HttpFeedConfig, HttpFeedSource};
///
/// let config = HttpFeedConfig::new(CsvLocation::publication_page()?)
///     .with_timeout(Duration::from_secs(60));
/// let feed = HttpFeedSource::with_config(config)?;
/// let records = feed.fetch_records(&CancellationToken::new())?;
/// println!("{} register rows", records.len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct HttpFeedSource {
    client: Client,
    config: HttpFeedConfig,
    runtime: Runtime,
}

impl std::fmt::Debug for HttpFeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFeedSource")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("runtime", &"<tokio::runtime::Runtime>")
            .finish()
    }
}

impl HttpFeedSource {
    /// Create a source for `location` with default timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or Tokio runtime fails to build.
    pub fn new(location: CsvLocation) -> Result<Self, FeedBuildError> {
        Self::with_config(HttpFeedConfig::new(location))
    }

    /// Create a source with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or Tokio runtime fails to build.
    pub fn with_config(config: HttpFeedConfig) -> Result<Self, FeedBuildError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(FeedBuildError::HttpClient)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(FeedBuildError::Runtime)?;
        Ok(Self {
            client,
            config,
            runtime,
        })
    }

    /// Configuration the source was built with.
    #[must_use]
    pub const fn config(&self) -> &HttpFeedConfig {
        &self.config
    }

    async fn fetch_async(&self) -> Result<Vec<SponsorRecord>, FetchError> {
        let csv_url = match &self.config.location {
            CsvLocation::Direct(url) => url.clone(),
            CsvLocation::Discover(page) => self.discover(page).await?,
        };
        log::info!("downloading sponsor register from {csv_url}");
        let body = self
            .get(&csv_url)
            .await?
            .bytes()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, &csv_url))?;
        Ok(parse_register(body.as_ref())?)
    }

    async fn discover(&self, page: &Url) -> Result<Url, FetchError> {
        let html = self
            .get(page)
            .await?
            .text()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, page))?;
        let link = extract_csv_url(&html).ok_or_else(|| FetchError::LinkNotFound {
            page: page.to_string(),
        })?;
        log::debug!("discovered register CSV at {link}");
        Url::parse(link).map_err(|source| FetchError::InvalidLink {
            link: link.to_owned(),
            source,
        })
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, url))?
            .error_for_status()
            .map_err(|err| self.convert_reqwest_error(&err, url))
    }

    /// Convert a reqwest error to a [`FetchError`].
    fn convert_reqwest_error(&self, error: &reqwest::Error, url: &Url) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: self.config.timeout.as_secs(),
            };
        }

        if let Some(status) = error.status() {
            return FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            };
        }

        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

impl FeedSource for HttpFeedSource {
    /// Download and parse the register.
    ///
    /// Cancellation aborts the in-flight request and yields
    /// [`FeedError::Cancelled`].
    fn fetch_records(&self, cancel: &CancellationToken) -> Result<Vec<SponsorRecord>, FeedError> {
        if cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        let future = async {
            tokio::select! {
                () = cancel.cancelled() => Err(FeedError::Cancelled),
                result = self.fetch_async() => result.map_err(FeedError::unavailable),
            }
        };
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(future))
            }
            _ => self.runtime.block_on(future),
        }
    }
}
