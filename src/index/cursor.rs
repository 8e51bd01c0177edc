use crate::feed::Article;

use super::{QueryIndex, QueryState};

/// One slice of query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Zero-based page number since the last query change.
    pub number: usize,
    pub articles: Vec<Article>,
    /// More results exist past this page at the time it was cut.
    pub has_more: bool,
    /// Total matches for the query at the time the page was cut.
    pub total: usize,
}

/// Pull-based pagination over [`QueryIndex`] results.
///
/// The cursor remembers the query it last served. Asking for a page with a
/// different query starts over at page 0. Results are re-queried on every
/// call, so articles that landed since the previous page are visible.
#[derive(Debug, Default)]
pub struct PageCursor {
    query: Option<QueryState>,
    next_page: usize,
    /// Articles handed out so far under `query`.
    offset: usize,
}

impl PageCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next page for `query`. A `page_size` of 0 is treated as 1.
    pub fn next_page(&mut self, index: &QueryIndex, query: &QueryState, page_size: usize) -> Page {
        if self.query.as_ref() != Some(query) {
            self.query = Some(query.clone());
            self.next_page = 0;
            self.offset = 0;
        }

        let page_size = page_size.max(1);
        let results = index.query_state(query);
        let total = results.len();
        let start = self.offset.min(total);
        let end = start.saturating_add(page_size).min(total);
        let articles = results[start..end].to_vec();

        let number = self.next_page;
        self.next_page += 1;
        self.offset = end;

        Page {
            number,
            articles,
            has_more: end < total,
            total,
        }
    }

    /// Everything handed out so far under the current query, re-read from
    /// the index. Lets a renderer redraw its visible list after an update
    /// without advancing the cursor.
    pub fn delivered(&self, index: &QueryIndex) -> Vec<Article> {
        match &self.query {
            Some(query) => {
                let mut results = index.query_state(query);
                results.truncate(self.offset);
                results
            }
            None => Vec::new(),
        }
    }

    /// Pages handed out under the current query.
    pub fn pages_delivered(&self) -> usize {
        self.next_page
    }

    /// Forgets the current query; the next call starts at page 0.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Category;
    use crate::index::tests::article;
    use crate::index::CategoryFilter;
    use pretty_assertions::assert_eq;

    fn index_with(n: usize) -> QueryIndex {
        let mut index = QueryIndex::new();
        for i in 0..n {
            let day = (i % 28) as u32 + 1;
            let month = (i / 28) as u32 + 1;
            index.insert_or_update(article(
                &format!("https://e.com/{}", i),
                &format!("Item {}", i),
                Category::Malware,
                Some((2024, month, day)),
            ));
        }
        index
    }

    #[test]
    fn test_paging_25_by_10() {
        let index = index_with(25);
        let query = QueryState::default();
        let mut cursor = PageCursor::new();

        let p0 = cursor.next_page(&index, &query, 10);
        let p1 = cursor.next_page(&index, &query, 10);
        let p2 = cursor.next_page(&index, &query, 10);

        assert_eq!((p0.number, p0.articles.len(), p0.has_more), (0, 10, true));
        assert_eq!((p1.number, p1.articles.len(), p1.has_more), (1, 10, true));
        assert_eq!((p2.number, p2.articles.len(), p2.has_more), (2, 5, false));
        assert_eq!(p2.total, 25);
        assert_eq!(cursor.delivered(&index).len(), 25);
    }

    #[test]
    fn test_pages_do_not_overlap() {
        let index = index_with(25);
        let query = QueryState::default();
        let mut cursor = PageCursor::new();

        let mut seen = Vec::new();
        loop {
            let page = cursor.next_page(&index, &query, 7);
            seen.extend(page.articles.into_iter().map(|a| a.id));
            if !page.has_more {
                break;
            }
        }
        let expected: Vec<String> = index.query_state(&query).into_iter().map(|a| a.id).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_search_change_resets_to_first_page() {
        let index = index_with(25);
        let mut cursor = PageCursor::new();
        let all = QueryState::default();

        cursor.next_page(&index, &all, 10);
        cursor.next_page(&index, &all, 10);

        let narrowed = QueryState::new(CategoryFilter::All, "item 1");
        let page = cursor.next_page(&index, &narrowed, 10);
        assert_eq!(page.number, 0);
        assert_eq!(page.articles, index.query_state(&narrowed)[..10].to_vec());
    }

    #[test]
    fn test_category_change_resets_to_first_page() {
        let index = index_with(12);
        let mut cursor = PageCursor::new();

        cursor.next_page(&index, &QueryState::default(), 5);
        let page = cursor.next_page(
            &index,
            &QueryState::new(CategoryFilter::Only(Category::Malware), ""),
            5,
        );
        assert_eq!(page.number, 0);
        assert_eq!(cursor.pages_delivered(), 1);
    }

    #[test]
    fn test_zero_page_size_treated_as_one() {
        let index = index_with(3);
        let mut cursor = PageCursor::new();

        let page = cursor.next_page(&index, &QueryState::default(), 0);
        assert_eq!(page.articles.len(), 1);
        assert!(page.has_more);
    }

    #[test]
    fn test_past_end_returns_empty_page() {
        let index = index_with(2);
        let query = QueryState::default();
        let mut cursor = PageCursor::new();

        cursor.next_page(&index, &query, 10);
        let page = cursor.next_page(&index, &query, 10);
        assert!(page.articles.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.number, 1);
    }

    #[test]
    fn test_new_articles_visible_on_next_page() {
        let mut index = index_with(3);
        let query = QueryState::default();
        let mut cursor = PageCursor::new();

        let first = cursor.next_page(&index, &query, 3);
        assert!(!first.has_more);

        // Older than everything so it sorts after the delivered slice
        index.insert_or_update(article("https://e.com/late", "Late", Category::Malware, None));
        let second = cursor.next_page(&index, &query, 3);
        assert_eq!(second.articles.len(), 1);
        assert_eq!(&*second.articles[0].title, "Late");
    }

    #[test]
    fn test_reset_and_empty_delivered() {
        let index = index_with(5);
        let mut cursor = PageCursor::new();
        assert!(cursor.delivered(&index).is_empty());

        cursor.next_page(&index, &QueryState::default(), 2);
        cursor.reset();
        assert!(cursor.delivered(&index).is_empty());
        assert_eq!(cursor.next_page(&index, &QueryState::default(), 2).number, 0);
    }
}
