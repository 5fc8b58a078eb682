//! AniDB HTTP client with rate limiting.
//!
//! The client never retries on its own: AniDB bans clients that hammer it, so
//! a failed fetch is reported and the caller decides when to come back.

use super::rate_limiter::RateLimiter;
use crate::error::{AniDbError, Result};
use crate::xml::XmlCursor;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::Client;
use shared::config::AniDbConfig;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Escaped NUL character AniDB occasionally emits; it makes the document invalid XML
const INVALID_NUL_ESCAPE: &str = "&#x0;";

/// Raw HTTP response for image passthrough
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Outbound HTTP transport
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Fetch a URL and return the body; non-success statuses are errors
    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Fetch a URL and return the whole response, whatever its status
    async fn get_response(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse>;
}

/// Default transport backed by reqwest
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .gzip(true)
            .build()?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<HttpResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let response = self.get_response(url, cancel).await?;

        if !(200..300).contains(&response.status) {
            warn!(url = %url, status = response.status, "Request failed");
            return Err(AniDbError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        Ok(response.body)
    }

    async fn get_response(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AniDbError::Cancelled),
            response = self.send(url) => response,
        }
    }
}

/// Rate-limited AniDB client
pub struct AniDbClient {
    /// HTTP transport
    transport: Arc<dyn HttpTransport>,
    /// Shared rate limiter
    rate_limiter: Arc<RateLimiter>,
    /// Extra wait after each limiter release
    extra_delay: Duration,
    /// HTTP API endpoint
    api_url: String,
    /// Registered client name
    client_name: String,
    /// Registered client version
    client_version: u32,
    /// Title dump location
    titles_url: String,
}

impl AniDbClient {
    /// Create a new AniDB client
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        rate_limiter: Arc<RateLimiter>,
        config: &AniDbConfig,
    ) -> Self {
        Self {
            transport,
            rate_limiter,
            extra_delay: Duration::from_millis(config.extra_delay_ms),
            api_url: config.api_url.clone(),
            client_name: config.client_name.clone(),
            client_version: config.client_version,
            titles_url: config.titles_url.clone(),
        }
    }

    /// Create a client using the reqwest transport
    pub fn from_config(config: &AniDbConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(
            &format!("{}/{}", config.client_name, config.client_version),
            Duration::from_secs(config.timeout_seconds),
        )?;

        Ok(Self::new(
            Arc::new(transport),
            Arc::new(RateLimiter::from_config(&config.rate_limit)),
            config,
        ))
    }

    /// Series detail request URL
    pub fn series_url(&self, anidb_id: u32) -> String {
        format!(
            "{}?request=anime&client={}&clientver={}&protover=1&aid={}",
            self.api_url, self.client_name, self.client_version, anidb_id
        )
    }

    /// Wait for a rate limiter slot plus the configured extra delay
    async fn pace(&self, cancel: &CancellationToken) -> Result<()> {
        self.rate_limiter.tick(cancel).await?;

        if !self.extra_delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AniDbError::Cancelled),
                _ = tokio::time::sleep(self.extra_delay) => {}
            }
        }

        Ok(())
    }

    /// Fetch and sanitize the detail document for one series
    pub async fn fetch_series(&self, anidb_id: u32, cancel: &CancellationToken) -> Result<String> {
        let url = self.series_url(anidb_id);
        self.pace(cancel).await?;

        info!(anidb_id = anidb_id, "Fetching series document");
        let body = self.transport.get(&url, cancel).await?;
        let document = decode_document(body)?;
        check_service_error(&document)?;

        debug!(anidb_id = anidb_id, bytes = document.len(), "Series document fetched");
        Ok(document)
    }

    /// Fetch the bulk title index
    pub async fn fetch_titles(&self, cancel: &CancellationToken) -> Result<String> {
        self.pace(cancel).await?;

        info!(url = %self.titles_url, "Fetching title index");
        let body = self.transport.get(&self.titles_url, cancel).await?;
        let document = decode_document(body)?;
        check_service_error(&document)?;

        debug!(bytes = document.len(), "Title index fetched");
        Ok(document)
    }

    /// Fetch an image, paced like every other AniDB request
    pub async fn fetch_image(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse> {
        self.pace(cancel).await?;
        debug!(url = %url, "Fetching image");
        self.transport.get_response(url, cancel).await
    }
}

/// Turn a response body into document text
///
/// Gunzips bodies that still carry the gzip header (AniDB compresses its
/// responses whether or not the transport negotiated it) and strips the
/// escaped NUL character.
pub fn decode_document(body: Vec<u8>) -> Result<String> {
    let bytes = if body.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::with_capacity(body.len() * 4);
        GzDecoder::new(body.as_slice())
            .read_to_end(&mut decoded)
            .map_err(AniDbError::Decompress)?;
        decoded
    } else {
        body
    };

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };

    Ok(text.replace(INVALID_NUL_ESCAPE, ""))
}

/// Reject `<error>` documents (bans, unknown client, ...) before they are cached
pub fn check_service_error(document: &str) -> Result<()> {
    let mut cursor = XmlCursor::new(document);

    match cursor.root() {
        Ok(Some(root)) if root.is("error") => {
            let message = cursor.read_text().unwrap_or_default();
            warn!(message = %message, "AniDB returned an error document");
            Err(AniDbError::Service(message))
        }
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(AniDbError::Service("empty document".to_string())),
        Err(e) => Err(e),
    }
}
