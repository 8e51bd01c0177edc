//! Configuration file parser for ~/.config/secwire/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as likely typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::{EngineOptions, DEFAULT_MAX_CONCURRENT_FETCHES};
use crate::feed::parser::DEFAULT_SUMMARY_MAX_CHARS;
use crate::feed::{Category, CategoryResolver, FetchOptions, ParseOptions, ProxyEndpoint};
use crate::session::DEFAULT_PAGE_SIZE;

/// Environment variable that overrides `proxy_api_key`.
pub const PROXY_KEY_ENV: &str = "SECWIRE_PROXY_KEY";

const MAX_FETCH_TIMEOUT_SECS: u64 = 300;
const MAX_CONCURRENT_FETCHES: usize = 256;
/// A century; anything larger is effectively "keep everything".
const MAX_AGE_DAYS: u32 = 36_500;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks `proxy_api_key` to prevent secret leakage
/// in logs, error messages, and debug output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OPML taxonomy file. Relative paths resolve against the config dir.
    pub taxonomy_path: Option<PathBuf>,

    /// Per-feed fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    pub max_concurrent_fetches: usize,

    /// Articles per page in the CLI listing.
    pub page_size: usize,

    pub summary_max_chars: usize,

    /// Drop dated articles older than this many days. 0 = keep everything.
    pub max_age_days: u32,

    /// Retrieval proxy template, e.g. `https://proxy.example.com/raw?url={url}`.
    pub proxy_url: Option<String>,

    /// Bearer token for the proxy (alternative to SECWIRE_PROXY_KEY env var).
    /// Env var takes precedence over config file.
    pub proxy_api_key: Option<String>,

    pub categories: CategoryConfig,
}

/// `[categories]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    /// Category for feeds no rule matches. Slug or label; `other` if unset.
    pub default: Option<String>,

    /// Fall back to built-in topic keywords before the default.
    pub builtin_keywords: bool,

    /// `[[categories.mapping]]` rules. Without `subgroup` a rule covers the
    /// whole group.
    pub mapping: Vec<CategoryMapping>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryMapping {
    pub group: String,
    #[serde(default)]
    pub subgroup: Option<String>,
    pub category: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            taxonomy_path: None,
            fetch_timeout_secs: 12,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            page_size: DEFAULT_PAGE_SIZE,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            max_age_days: 0,
            proxy_url: None,
            proxy_api_key: None,
            categories: CategoryConfig::default(),
        }
    }
}

/// SEC-015: Mask proxy_api_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("taxonomy_path", &self.taxonomy_path)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("page_size", &self.page_size)
            .field("summary_max_chars", &self.summary_max_chars)
            .field("max_age_days", &self.max_age_days)
            .field("proxy_url", &self.proxy_url)
            .field(
                "proxy_api_key",
                &self.proxy_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("categories", &self.categories)
            .finish()
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            proxy = config.proxy_url.is_some(),
            mappings = config.categories.mapping.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parses and validates TOML text. Blank text yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to flag unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks ranges and parses category names and the proxy template.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_secs == 0 || self.fetch_timeout_secs > MAX_FETCH_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "fetch_timeout_secs must be between 1 and {}, got {}",
                MAX_FETCH_TIMEOUT_SECS, self.fetch_timeout_secs
            )));
        }
        if self.max_concurrent_fetches == 0 || self.max_concurrent_fetches > MAX_CONCURRENT_FETCHES {
            return Err(ConfigError::Invalid(format!(
                "max_concurrent_fetches must be between 1 and {}, got {}",
                MAX_CONCURRENT_FETCHES, self.max_concurrent_fetches
            )));
        }
        if self.max_age_days > MAX_AGE_DAYS {
            return Err(ConfigError::Invalid(format!(
                "max_age_days must be at most {}, got {}",
                MAX_AGE_DAYS, self.max_age_days
            )));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".to_string()));
        }
        if self.summary_max_chars == 0 {
            return Err(ConfigError::Invalid(
                "summary_max_chars must be at least 1".to_string(),
            ));
        }

        self.proxy_endpoint()?;
        self.category_resolver()?;
        Ok(())
    }

    /// Proxy key from SECWIRE_PROXY_KEY, falling back to the config file.
    pub fn proxy_api_key(&self) -> Option<SecretString> {
        self.proxy_api_key_with(std::env::var(PROXY_KEY_ENV).ok())
    }

    fn proxy_api_key_with(&self, env_value: Option<String>) -> Option<SecretString> {
        env_value
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.proxy_api_key.clone().filter(|k| !k.trim().is_empty()))
            .map(SecretString::from)
    }

    pub fn proxy_endpoint(&self) -> Result<Option<ProxyEndpoint>, ConfigError> {
        match self.proxy_url.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(template) => ProxyEndpoint::parse(template)
                .map(Some)
                .map_err(|e| ConfigError::Invalid(format!("proxy_url: {}", e))),
        }
    }

    /// Builds the category resolver described by `[categories]`.
    pub fn category_resolver(&self) -> Result<CategoryResolver, ConfigError> {
        let default = match &self.categories.default {
            Some(name) => parse_category(name, "categories.default")?,
            None => Category::Other,
        };

        let mut resolver = CategoryResolver::new(default);
        for rule in &self.categories.mapping {
            let category = parse_category(&rule.category, "categories.mapping")?;
            resolver = match rule.subgroup.as_deref() {
                Some(subgroup) if !subgroup.trim().is_empty() => {
                    resolver.map_pair(&rule.group, subgroup, category)
                }
                _ => resolver.map_group(&rule.group, category),
            };
        }

        if self.categories.builtin_keywords {
            resolver = resolver.with_builtin_keywords();
        }
        Ok(resolver)
    }

    pub fn fetch_options(&self) -> Result<FetchOptions, ConfigError> {
        Ok(FetchOptions {
            timeout: Some(self.fetch_timeout()),
            proxy: self.proxy_endpoint()?,
            proxy_api_key: self.proxy_api_key(),
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            fetch_timeout: self.fetch_timeout(),
            max_concurrent_fetches: self.max_concurrent_fetches,
            parse: ParseOptions {
                summary_max_chars: self.summary_max_chars,
                max_age_days: self.max_age_days,
            },
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Taxonomy location: the configured path (relative to `config_dir` when
    /// not absolute), or `feeds.opml` in `config_dir`.
    pub fn taxonomy_file(&self, config_dir: &Path) -> PathBuf {
        match &self.taxonomy_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => config_dir.join(path),
            None => config_dir.join("feeds.opml"),
        }
    }
}

fn parse_category(name: &str, key: &str) -> Result<Category, ConfigError> {
    name.parse::<Category>()
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", key, e)))
}

fn warn_unknown_keys(raw: &toml::Table) {
    const KNOWN_KEYS: [&str; 9] = [
        "taxonomy_path",
        "fetch_timeout_secs",
        "max_concurrent_fetches",
        "page_size",
        "summary_max_chars",
        "max_age_days",
        "proxy_url",
        "proxy_api_key",
        "categories",
    ];
    const KNOWN_CATEGORY_KEYS: [&str; 3] = ["default", "builtin_keywords", "mapping"];

    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    if let Some(toml::Value::Table(categories)) = raw.get("categories") {
        for key in categories.keys() {
            if !KNOWN_CATEGORY_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %format!("categories.{}", key), "Unknown key in config file, ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
