use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::sync::Arc;

use super::category::Category;
use crate::util::normalize_link;

/// A normalized feed entry.
///
/// PERF-010: String fields use `Arc<str>` so query results and pages can be
/// cloned out of the index without copying article text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    /// Hex SHA-256 of the normalized link; the deduplication key.
    pub id: String,
    /// Plain text; empty when the entry had none.
    pub title: Arc<str>,
    /// Plain text with markup stripped, bounded in length.
    pub summary: Arc<str>,
    pub link: Arc<str>,
    /// `None` when the feed gave no usable date. Undated articles sort last.
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: Arc<str>,
    pub category: Category,
}

impl Article {
    /// True when `self` should replace `existing` (same id) in the index.
    ///
    /// A strictly later date wins, and a date beats no date. When the dates
    /// tie (or both are missing) the lesser [`Article::merge_key`] wins, so
    /// the surviving duplicate does not depend on arrival order.
    pub fn supersedes(&self, existing: &Article) -> bool {
        match (self.published_at, existing.published_at) {
            (Some(new), Some(old)) if new != old => new > old,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            _ => self.merge_key() < existing.merge_key(),
        }
    }

    fn merge_key(&self) -> (&str, &str, &str, &str, &str) {
        (
            &*self.source_name,
            self.category.slug(),
            &*self.title,
            &*self.summary,
            &*self.link,
        )
    }
}

/// Derives the stable article id from its link.
///
/// Trailing slashes and surrounding whitespace are not significant, so
/// `https://a/post/` and `https://a/post` share an id.
pub fn article_id(link: &str) -> String {
    let hash = Sha256::digest(normalize_link(link).as_bytes());
    format!("{:x}", hash)
}

/// Reverse-chronological order with undated articles last. Ties break on id
/// so the order is total and independent of insertion order.
pub fn newest_first(a: &Article, b: &Article) -> Ordering {
    let by_date = match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date.then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(link: &str, published: Option<(i32, u32, u32)>) -> Article {
        Article {
            id: article_id(link),
            title: Arc::from("t"),
            summary: Arc::from(""),
            link: Arc::from(link),
            published_at: published.map(|(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()),
            source_name: Arc::from("src"),
            category: Category::Other,
        }
    }

    #[test]
    fn test_id_ignores_trailing_slash() {
        assert_eq!(
            article_id("https://example.com/post/"),
            article_id("https://example.com/post")
        );
        assert_ne!(
            article_id("https://example.com/a"),
            article_id("https://example.com/b")
        );
        assert_eq!(article_id("https://example.com/a").len(), 64);
    }

    #[test]
    fn test_newest_first_puts_undated_last() {
        let mut items = vec![
            article("https://e.com/1", Some((2024, 3, 1))),
            article("https://e.com/2", None),
            article("https://e.com/3", Some((2024, 1, 1))),
        ];
        items.sort_by(newest_first);
        let links: Vec<&str> = items.iter().map(|a| &*a.link).collect();
        assert_eq!(links, vec!["https://e.com/1", "https://e.com/3", "https://e.com/2"]);
    }

    #[test]
    fn test_supersedes_by_date() {
        let old = article("https://e.com/x", Some((2024, 1, 1)));
        let new = article("https://e.com/x", Some((2024, 2, 1)));
        let undated = article("https://e.com/x", None);

        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
        assert!(!old.supersedes(&old));
        assert!(old.supersedes(&undated));
        assert!(!undated.supersedes(&old));
        assert!(!undated.supersedes(&undated));
    }

    #[test]
    fn test_supersedes_tie_is_symmetric() {
        let mut from_a = article("https://e.com/x", None);
        from_a.source_name = Arc::from("A");
        from_a.category = Category::Malware;
        let mut from_b = article("https://e.com/x", None);
        from_b.source_name = Arc::from("B");
        from_b.category = Category::Crypto;

        // Exactly one direction wins, whichever arrives first
        assert!(from_a.supersedes(&from_b));
        assert!(!from_b.supersedes(&from_a));

        let mut dated_b = from_b.clone();
        dated_b.published_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut dated_a = from_a.clone();
        dated_a.published_at = dated_b.published_at;
        assert!(dated_a.supersedes(&dated_b));
        assert!(!dated_b.supersedes(&dated_a));
    }
}
