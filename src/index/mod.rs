//! In-memory article index with category filtering and substring search.
//!
//! The index is owned by a single writer (the aggregation engine) and is
//! read by the page cursor. Query results are ordered newest first with
//! undated articles last.

mod cursor;

pub use cursor::{Page, PageCursor};

use std::collections::{BTreeMap, HashMap};

use crate::feed::{newest_first, Article, Category};

/// Category predicate of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    pub fn matches(self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(wanted) => wanted == category,
        }
    }
}

impl From<Option<Category>> for CategoryFilter {
    fn from(category: Option<Category>) -> Self {
        category.map_or(CategoryFilter::All, CategoryFilter::Only)
    }
}

/// What the UI is currently looking at. A change of either field
/// invalidates the scroll position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryState {
    pub category: CategoryFilter,
    pub search_text: String,
}

impl QueryState {
    pub fn new(category: CategoryFilter, search_text: impl Into<String>) -> Self {
        Self {
            category,
            search_text: search_text.into(),
        }
    }
}

/// Result of [`QueryIndex::insert_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An entry with the same id existed and the incoming one superseded it.
    Replaced,
    /// An entry with the same id existed and was kept.
    Kept,
}

struct Entry {
    article: Article,
    /// PERF: lowercased title/summary/source/category, built once per insert
    /// instead of once per query.
    haystack: String,
}

impl Entry {
    fn new(article: Article) -> Self {
        let haystack = format!(
            "{}\n{}\n{}\n{}",
            article.title,
            article.summary,
            article.source_name,
            article.category.label()
        )
        .to_lowercase();
        Self { article, haystack }
    }
}

/// Deduplicated article collection keyed by article id.
#[derive(Default)]
pub struct QueryIndex {
    entries: HashMap<String, Entry>,
}

impl QueryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an article, or replaces the entry with the same id when the
    /// incoming article supersedes it (see [`Article::supersedes`]). Never
    /// holds two entries per id, and the survivor is independent of the
    /// order duplicates arrive in.
    pub fn insert_or_update(&mut self, article: Article) -> InsertOutcome {
        match self.entries.get_mut(&article.id) {
            Some(existing) if article.supersedes(&existing.article) => {
                *existing = Entry::new(article);
                InsertOutcome::Replaced
            }
            Some(_) => InsertOutcome::Kept,
            None => {
                self.entries.insert(article.id.clone(), Entry::new(article));
                InsertOutcome::Inserted
            }
        }
    }

    /// Articles matching both the category filter and the search text,
    /// newest first, undated last.
    ///
    /// Search is a case-insensitive substring test over title, summary,
    /// source name, and category label. Blank search text matches all.
    pub fn query(&self, filter: CategoryFilter, search_text: &str) -> Vec<Article> {
        let needle = search_text.trim().to_lowercase();

        let mut hits: Vec<Article> = self
            .entries
            .values()
            .filter(|e| filter.matches(e.article.category))
            .filter(|e| needle.is_empty() || e.haystack.contains(&needle))
            .map(|e| e.article.clone())
            .collect();
        hits.sort_by(newest_first);
        hits
    }

    /// Convenience for [`QueryIndex::query`] with a [`QueryState`].
    pub fn query_state(&self, state: &QueryState) -> Vec<Article> {
        self.query(state.category, &state.search_text)
    }

    pub fn get(&self, id: &str) -> Option<&Article> {
        self.entries.get(id).map(|e| &e.article)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Article count per category, for filter badges.
    pub fn category_counts(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.article.category).or_insert(0) += 1;
        }
        counts
    }
}
