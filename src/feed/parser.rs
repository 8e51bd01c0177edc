use chrono::{Duration, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use std::sync::Arc;
use thiserror::Error;

use super::article::{article_id, Article};
use super::category::Category;
use crate::util::{clamp_chars, normalize_link, strip_control_chars, strip_markup, validate_url};

/// Default cap on summary length, in characters.
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 2000;

/// The document as a whole could not be read as RSS, Atom, or JSON Feed.
#[derive(Debug, Clone, Error)]
#[error("Feed document could not be parsed: {0}")]
pub struct ParseError(pub String);

/// Knobs for entry normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Summaries longer than this (in characters) are cut.
    pub summary_max_chars: usize,
    /// Dated entries older than this many days are dropped. 0 keeps all.
    pub max_age_days: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            max_age_days: 0,
        }
    }
}

/// Parsed entries in document order, plus counts of what was dropped.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub articles: Vec<Article>,
    /// Entries without a usable link.
    pub skipped: usize,
    /// Entries dated before the `max_age_days` window.
    pub expired: usize,
}

/// Parses a raw feed document into normalized articles.
///
/// Best effort per entry: an entry with no link, or a link that fails URL
/// validation, is skipped and counted instead of failing the feed. Missing
/// titles become empty strings and missing dates stay `None`.
///
/// # Errors
///
/// Returns [`ParseError`] only when the document itself is unreadable.
pub fn parse_feed(
    raw: &str,
    source_name: &str,
    category: Category,
    options: &ParseOptions,
) -> Result<ParseResult, ParseError> {
    let feed = parser::parse(raw.as_bytes()).map_err(|e| ParseError(e.to_string()))?;

    // A window reaching past the earliest representable date keeps everything
    let cutoff = (options.max_age_days > 0)
        .then(|| Utc::now().checked_sub_signed(Duration::days(i64::from(options.max_age_days))))
        .flatten();
    let source_name: Arc<str> = Arc::from(strip_control_chars(source_name.trim()));

    let mut result = ParseResult::default();
    for entry in feed.entries {
        let Some(article) = normalize_entry(entry, &source_name, category, options) else {
            result.skipped += 1;
            continue;
        };
        if let (Some(cutoff), Some(published)) = (cutoff, article.published_at) {
            if published < cutoff {
                result.expired += 1;
                continue;
            }
        }
        result.articles.push(article);
    }

    Ok(result)
}

fn normalize_entry(
    entry: Entry,
    source_name: &Arc<str>,
    category: Category,
    options: &ParseOptions,
) -> Option<Article> {
    // Prefer the alternate (human-facing) link; Atom often lists `self` first
    let href = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())?;

    if let Err(e) = validate_url(&href) {
        tracing::debug!(link = %href, error = %e, "Skipping entry with invalid link");
        return None;
    }

    let title = entry
        .title
        .map(|t| {
            if t.content_type.essence().to_string() == "text/html" {
                strip_markup(&t.content)
            } else {
                t.content.split_whitespace().collect::<Vec<_>>().join(" ")
            }
        })
        .unwrap_or_default();

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|html| strip_markup(&html))
        .unwrap_or_default();
    let summary = strip_control_chars(&summary);
    let summary = clamp_chars(&summary, options.summary_max_chars);

    Some(Article {
        id: article_id(&href),
        title: Arc::from(strip_control_chars(&title)),
        summary: Arc::from(&*summary),
        link: Arc::from(normalize_link(&href)),
        published_at: entry.published.or(entry.updated),
        source_name: Arc::clone(source_name),
        category,
    })
}
