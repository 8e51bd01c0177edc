//! The render/query surface handed to a front end.
//!
//! A [`FeedSession`] owns the aggregation engine, the taxonomy it runs over,
//! and the front end's view state (query plus page cursor). The front end
//! registers observers with [`FeedSession::on_update`], drives the session
//! with [`FeedSession::pump`], and pulls pages whenever it wants to redraw.

use crate::engine::{AggregationEngine, AggregationEvent, FeedStatus, RunSummary};
use crate::feed::{Article, TaxonomyNode};
use crate::index::{CategoryFilter, Page, PageCursor, QueryIndex, QueryState};

/// Default number of articles per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Observer invoked once per feed completion and once per run completion.
pub type UpdateListener = Box<dyn FnMut(&AggregationEvent) + Send>;

pub struct FeedSession {
    engine: AggregationEngine,
    taxonomy: Vec<TaxonomyNode>,
    query: QueryState,
    cursor: PageCursor,
    page_size: usize,
    listeners: Vec<UpdateListener>,
}

impl FeedSession {
    /// Creates an idle session. Nothing is fetched until
    /// [`FeedSession::trigger_refresh`] is called.
    pub fn new(engine: AggregationEngine, taxonomy: Vec<TaxonomyNode>, page_size: usize) -> Self {
        Self {
            engine,
            taxonomy,
            query: QueryState::default(),
            cursor: PageCursor::new(),
            page_size: page_size.max(1),
            listeners: Vec::new(),
        }
    }

    /// Replaces the current query. The next page requested starts over at
    /// page 0 if anything changed.
    pub fn set_query(&mut self, category: CategoryFilter, search_text: impl Into<String>) {
        let query = QueryState::new(category, search_text);
        if query != self.query {
            tracing::debug!(category = ?query.category, search = %query.search_text, "Query changed");
            self.query = query;
            self.cursor.reset();
        }
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    /// Next page of the current query against whatever has landed so far.
    pub fn request_next_page(&mut self) -> Page {
        self.cursor.next_page(self.engine.index(), &self.query, self.page_size)
    }

    /// All articles handed out under the current query, re-read from the
    /// index so late arrivals slot in at their sorted position.
    pub fn visible_articles(&self) -> Vec<Article> {
        self.cursor.delivered(self.engine.index())
    }

    /// Registers an observer. Observers are called in registration order.
    pub fn on_update<F>(&mut self, listener: F)
    where
        F: FnMut(&AggregationEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Starts a new aggregation run over the taxonomy and returns its id.
    /// Any run in flight is superseded and the page cursor starts over.
    pub fn trigger_refresh(&mut self) -> u64 {
        self.cursor.reset();
        self.engine.start_run(&self.taxonomy)
    }

    /// Waits for the next engine event and dispatches it to every observer.
    ///
    /// Returns `None` when the current run has nothing more to report.
    pub async fn pump(&mut self) -> Option<AggregationEvent> {
        let event = self.engine.next_event().await?;
        for listener in &mut self.listeners {
            listener(&event);
        }
        Some(event)
    }

    /// Pumps until the current run completes and returns its summary.
    pub async fn run_to_completion(&mut self) -> Option<RunSummary> {
        let mut summary = None;
        while let Some(event) = self.pump().await {
            if let AggregationEvent::RunCompleted(s) = event {
                summary = Some(s);
            }
        }
        summary
    }

    pub fn feed_states(&self) -> &[FeedStatus] {
        self.engine.feed_states()
    }

    pub fn index(&self) -> &QueryIndex {
        self.engine.index()
    }

    pub fn taxonomy(&self) -> &[TaxonomyNode] {
        &self.taxonomy
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }
}
