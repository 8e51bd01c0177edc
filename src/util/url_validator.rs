use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors from validating feed, article, or proxy URLs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
    /// Proxy endpoints must use HTTPS; plain HTTP is tolerated for localhost only.
    #[error("Insecure proxy URL: HTTPS required (except localhost)")]
    InsecureProxy,
}

/// Validates a URL for use as a feed source or article link.
///
/// SEC: Rejects non-HTTP(S) schemes, localhost, and private/link-local
/// address literals so a hostile taxonomy or feed cannot point the fetcher at
/// internal services.
///
/// ```
/// use secwire::util::validate_url;
///
/// assert!(validate_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if is_local_host(&url) {
        return Err(UrlValidationError::Localhost);
    }
    if let Some(ip) = host_ip(&url) {
        if is_private_ip(&ip) {
            return Err(UrlValidationError::PrivateIp(ip.to_string()));
        }
    }

    Ok(url)
}

/// Validates the base of a retrieval proxy.
///
/// HTTPS is required so a proxy API key never crosses the wire in clear
/// text. `http://localhost` and loopback addresses are accepted for local
/// proxies and tests.
pub fn validate_proxy_base(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_local_host(&url) => {
            tracing::warn!(proxy = %url, "Using non-HTTPS proxy (localhost only)");
            Ok(url)
        }
        "http" => Err(UrlValidationError::InsecureProxy),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Canonical form of an article link used for identity: surrounding
/// whitespace and trailing slashes removed.
pub fn normalize_link(link: &str) -> &str {
    link.trim().trim_end_matches('/')
}

fn host_ip(url: &Url) -> Option<IpAddr> {
    let host = url.host_str()?;
    // IPv6 hosts come back bracketed
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    bare.parse().ok()
}

fn is_local_host(url: &Url) -> bool {
    if url.host_str() == Some("localhost") {
        return true;
    }
    host_ip(url).is_some_and(|ip| ip.is_loopback())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local fc00::/7
                || (first & 0xffc0) == 0xfe80 // link local fe80::/10
        }
    }
}
