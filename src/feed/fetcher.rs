use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::redirect::Policy;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

use crate::util::{validate_proxy_base, validate_url};

/// Default per-feed timeout. The retrieval path goes through a third-party
/// proxy whose latency we do not control.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(12);

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 3;
const USER_AGENT: &str = concat!("secwire/", env!("CARGO_PKG_VERSION"));

/// Placeholder substituted with the percent-encoded feed URL in proxy
/// templates, e.g. `https://proxy.example.com/raw?url={url}`.
pub const PROXY_URL_PLACEHOLDER: &str = "{url}";

/// Transport-level failures for a single feed.
///
/// Cloneable so failures can live in per-feed state and in events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(String),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Fewer bytes arrived than Content-Length promised
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Source of raw feed documents.
///
/// Every call is independent: a failure or a hang in one call must not
/// affect any other. Implementations are shared across concurrent fetches.
pub trait FeedFetcher: Send + Sync {
    fn fetch<'a>(&'a self, feed_url: &'a str) -> BoxFuture<'a, Result<String, FetchError>>;
}

/// Retrieval indirection: a proxy endpoint that fetches feeds on our behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    template: String,
}

impl ProxyEndpoint {
    /// Validates a proxy template.
    ///
    /// With a `{url}` placeholder the encoded feed URL is substituted;
    /// without one the raw feed URL is appended after a `/`
    /// (`https://proxy.example.com/https://example.com/feed`).
    pub fn parse(template: &str) -> Result<Self, FetchError> {
        let template = template.trim();
        let base = template
            .split_once(PROXY_URL_PLACEHOLDER)
            .map_or(template, |(before, _)| before);
        validate_proxy_base(base).map_err(|e| FetchError::InvalidProxy(e.to_string()))?;
        Ok(Self {
            template: template.to_string(),
        })
    }

    pub fn request_url(&self, feed_url: &str) -> String {
        if self.template.contains(PROXY_URL_PLACEHOLDER) {
            let encoded: String = url::form_urlencoded::byte_serialize(feed_url.as_bytes()).collect();
            self.template.replace(PROXY_URL_PLACEHOLDER, &encoded)
        } else {
            format!("{}/{}", self.template.trim_end_matches('/'), feed_url)
        }
    }
}

/// Options for [`HttpFetcher`].
#[derive(Default)]
pub struct FetchOptions {
    pub timeout: Option<Duration>,
    pub proxy: Option<ProxyEndpoint>,
    /// Sent as a bearer token to the proxy only, never to feed hosts.
    pub proxy_api_key: Option<SecretString>,
}

/// HTTP(S) feed fetcher with an optional proxy hop.
pub struct HttpFetcher {
    client: reqwest::Client,
    proxy: Option<ProxyEndpoint>,
    proxy_api_key: Option<SecretString>,
}

impl HttpFetcher {
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT))
            .redirect(create_redirect_policy())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to create HTTP client: {}", e)))?;

        if let Some(proxy) = &options.proxy {
            tracing::info!(proxy = %proxy.template, "Fetching feeds through proxy");
        }

        Ok(Self {
            client,
            proxy: options.proxy,
            proxy_api_key: options.proxy_api_key,
        })
    }

    async fn fetch_text(&self, feed_url: &str) -> Result<String, FetchError> {
        // SEC: Validate before use to prevent SSRF via a hostile taxonomy
        let target = validate_url(feed_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let mut request = match &self.proxy {
            Some(proxy) => {
                let mut request = self.client.get(proxy.request_url(target.as_str()));
                if let Some(key) = &self.proxy_api_key {
                    tracing::trace!("Proxy authentication configured");
                    request = request.bearer_auth(key.expose_secret());
                }
                request
            }
            None => self.client.get(target.as_str()),
        };
        request = request.header(
            reqwest::header::ACCEPT,
            "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.5",
        );

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl FeedFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, feed_url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(self.fetch_text(feed_url))
    }
}

/// Redirect policy with a hop limit and loop detection.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
