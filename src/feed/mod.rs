//! Feed acquisition: taxonomy, categories, retrieval, and parsing.
//!
//! - [`taxonomy`] - OPML taxonomy parsing into group/subgroup/feed nodes
//! - [`category`] - the closed [`Category`] set and the [`CategoryResolver`]
//! - [`fetcher`] - the [`FeedFetcher`] seam and its HTTP/proxy implementation
//! - [`parser`] - RSS/Atom/JSON Feed normalization into [`Article`]s
//!
//! # Example
//!
//! ```ignore
//! use secwire::feed::{taxonomy, CategoryResolver, FeedSource};
//!
//! let nodes = taxonomy::load(&opml)?;
//! let resolver = CategoryResolver::default().with_builtin_keywords();
//! let sources: Vec<FeedSource> = nodes.iter().map(|n| FeedSource::resolve(n, &resolver)).collect();
//! ```

mod article;
pub mod category;
pub mod fetcher;
pub mod parser;
pub mod taxonomy;

pub use article::{article_id, newest_first, Article};
pub use category::{Category, CategoryResolver, UnknownCategory};
pub use fetcher::{FeedFetcher, FetchError, FetchOptions, HttpFetcher, ProxyEndpoint};
pub use parser::{parse_feed, ParseError, ParseOptions, ParseResult};
pub use taxonomy::{TaxonomyError, TaxonomyNode};

use std::sync::Arc;
use thiserror::Error;

/// A feed as seen by one aggregation run: taxonomy node plus the category
/// it resolved to when the run started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: String,
    pub name: Arc<str>,
    pub group: String,
    pub subgroup: String,
    pub category: Category,
}

impl FeedSource {
    pub fn resolve(node: &TaxonomyNode, resolver: &CategoryResolver) -> Self {
        Self {
            url: node.feed_url.clone(),
            name: Arc::from(node.title.as_str()),
            group: node.group.clone(),
            subgroup: node.subgroup.clone(),
            category: resolver.resolve(&node.group, &node.subgroup),
        }
    }
}

/// Per-feed failure, attributable to one feed URL. Never fatal to a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Failed to fetch {feed_url}: {cause}")]
    Fetch {
        feed_url: String,
        #[source]
        cause: FetchError,
    },
    #[error("Failed to parse {feed_url}: {reason}")]
    Parse { feed_url: String, reason: String },
    /// The run task died before this feed reported back.
    #[error("Run ended before {feed_url} finished")]
    Interrupted { feed_url: String },
}

impl FeedError {
    pub fn feed_url(&self) -> &str {
        match self {
            FeedError::Fetch { feed_url, .. }
            | FeedError::Parse { feed_url, .. }
            | FeedError::Interrupted { feed_url } => feed_url,
        }
    }
}
