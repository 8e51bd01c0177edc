//! Concurrent aggregation of every taxonomy feed into one [`QueryIndex`].
//!
//! A run fans out one fetch+parse future per feed on a spawned task, bounded
//! by `max_concurrent_fetches`. Each completion travels back over the run's
//! own mpsc channel and is applied by the engine, which is the only writer of
//! the index. Messages carry the run id they were spawned under; anything
//! from a superseded run is dropped on arrival. If the run task dies early,
//! its channel closes and the feeds still outstanding are failed.

use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::feed::{
    parse_feed, Article, CategoryResolver, FeedError, FeedFetcher, FeedSource, FetchError,
    ParseOptions, TaxonomyNode,
};
use crate::feed::fetcher::DEFAULT_FETCH_TIMEOUT;
use crate::index::QueryIndex;

/// Default bound on simultaneous in-flight fetches.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 16;

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on one feed's fetch. Applied by the engine around any
    /// [`FeedFetcher`], so a fetcher that never resolves still fails.
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub parse: ParseOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            parse: ParseOptions::default(),
        }
    }
}

/// Where one feed stands in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFetchState {
    Pending,
    InFlight,
    /// Number of articles the feed contributed after parsing.
    Succeeded { articles: usize },
    Failed(FeedError),
}

impl FeedFetchState {
    pub fn is_finished(&self) -> bool {
        matches!(self, FeedFetchState::Succeeded { .. } | FeedFetchState::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStatus {
    pub source: FeedSource,
    pub state: FeedFetchState,
}

/// One feed finished, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUpdate {
    pub run_id: u64,
    pub feed_url: String,
    pub source_name: Arc<str>,
    /// Articles parsed from the feed, or why it failed.
    pub outcome: Result<usize, FeedError>,
    /// Feeds finished so far in this run, this one included.
    pub completed: usize,
    pub total: usize,
}

/// Every feed of a run has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: u64,
    /// Feed URLs that produced a parseable document, in taxonomy order.
    pub succeeded: Vec<String>,
    /// Per-feed failures, in taxonomy order.
    pub failed: Vec<FeedError>,
    /// Index size once the run settled.
    pub total_articles: usize,
}

/// Typed payload handed to update observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationEvent {
    FeedCompleted(FeedUpdate),
    RunCompleted(RunSummary),
}

impl AggregationEvent {
    pub fn run_id(&self) -> u64 {
        match self {
            AggregationEvent::FeedCompleted(update) => update.run_id,
            AggregationEvent::RunCompleted(summary) => summary.run_id,
        }
    }
}

/// Messages from a run task back to the engine.
#[derive(Debug)]
enum RunMessage {
    Started {
        run_id: u64,
        slot: usize,
    },
    Finished {
        run_id: u64,
        slot: usize,
        result: Result<Vec<Article>, FeedError>,
    },
}

impl RunMessage {
    fn run_id(&self) -> u64 {
        match self {
            RunMessage::Started { run_id, .. } | RunMessage::Finished { run_id, .. } => *run_id,
        }
    }
}

/// Owns the article index and drives aggregation runs.
pub struct AggregationEngine {
    fetcher: Arc<dyn FeedFetcher>,
    resolver: CategoryResolver,
    options: EngineOptions,
    index: QueryIndex,
    feeds: Vec<FeedStatus>,
    /// Incremented per run. Completions tagged with an older id are stale.
    run_id: u64,
    completed: usize,
    running: bool,
    task: Option<JoinHandle<()>>,
    /// Receiving end of the current run's channel. The run task holds the
    /// only sender.
    rx: Option<mpsc::Receiver<RunMessage>>,
    pending: VecDeque<AggregationEvent>,
}

impl AggregationEngine {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, resolver: CategoryResolver, options: EngineOptions) -> Self {
        Self {
            fetcher,
            resolver,
            options,
            index: QueryIndex::new(),
            feeds: Vec::new(),
            run_id: 0,
            completed: 0,
            running: false,
            task: None,
            rx: None,
            pending: VecDeque::new(),
        }
    }

    /// Starts a new run over `nodes` and returns its id.
    ///
    /// Any run still in flight is aborted and its channel dropped along with
    /// whatever completions it had queued. The index is cleared so the new run starts from a fresh view.
    /// Must be called from within a Tokio runtime.
    pub fn start_run(&mut self, nodes: &[TaxonomyNode]) -> u64 {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(run_id = self.run_id, "Aborted superseded run");
        }

        self.run_id += 1;
        let run_id = self.run_id;
        self.index.clear();
        self.pending.clear();
        self.rx = None;
        self.completed = 0;
        self.feeds = nodes
            .iter()
            .map(|node| FeedStatus {
                source: FeedSource::resolve(node, &self.resolver),
                state: FeedFetchState::Pending,
            })
            .collect();

        tracing::info!(run_id, feeds = self.feeds.len(), "Starting aggregation run");

        if self.feeds.is_empty() {
            self.running = false;
            self.pending.push_back(AggregationEvent::RunCompleted(self.summary()));
            return run_id;
        }

        self.running = true;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.rx = Some(rx);
        let sources: Vec<FeedSource> = self.feeds.iter().map(|f| f.source.clone()).collect();
        self.task = Some(tokio::spawn(drive_run(
            run_id,
            sources,
            Arc::clone(&self.fetcher),
            self.options.clone(),
            tx,
        )));

        run_id
    }

    /// Waits for the next event of the current run.
    ///
    /// Returns `None` once the run has completed and its events have been
    /// drained, or when no run was ever started.
    pub async fn next_event(&mut self) -> Option<AggregationEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if !self.running {
                return None;
            }
            let message = match self.rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => None,
            };
            match message {
                Some(message) => self.apply(message),
                // Every sender is gone with feeds still outstanding
                None => self.interrupt_run(),
            }
        }
    }

    /// Fails every unfinished feed of the current run after its task ended
    /// without reporting them (a panic in a fetcher, for instance). Emits the
    /// usual per-feed events and the run completion.
    fn interrupt_run(&mut self) {
        let run_id = self.run_id;
        tracing::error!(run_id, "Run task ended with feeds outstanding");
        self.rx = None;

        let outstanding: Vec<(usize, String)> = self
            .feeds
            .iter()
            .enumerate()
            .filter(|(_, feed)| !feed.state.is_finished())
            .map(|(slot, feed)| (slot, feed.source.url.clone()))
            .collect();
        for (slot, feed_url) in outstanding {
            self.apply(RunMessage::Finished {
                run_id,
                slot,
                result: Err(FeedError::Interrupted { feed_url }),
            });
        }

        if self.running {
            self.running = false;
            self.task = None;
            self.pending.push_back(AggregationEvent::RunCompleted(self.summary()));
        }
    }

    fn apply(&mut self, message: RunMessage) {
        if message.run_id() != self.run_id {
            tracing::debug!(
                expected = self.run_id,
                got = message.run_id(),
                "Ignoring stale run completion (run id mismatch)"
            );
            return;
        }

        match message {
            RunMessage::Started { slot, .. } => {
                if let Some(feed) = self.feeds.get_mut(slot) {
                    feed.state = FeedFetchState::InFlight;
                }
            }
            RunMessage::Finished { run_id, slot, result } => {
                let total = self.feeds.len();
                let Some(feed) = self.feeds.get_mut(slot) else {
                    return;
                };
                if feed.state.is_finished() {
                    return;
                }

                let outcome = match result {
                    Ok(articles) => {
                        let count = articles.len();
                        for article in articles {
                            self.index.insert_or_update(article);
                        }
                        feed.state = FeedFetchState::Succeeded { articles: count };
                        tracing::debug!(run_id, feed = %feed.source.url, articles = count, "Feed merged");
                        Ok(count)
                    }
                    Err(e) => {
                        tracing::warn!(run_id, feed = %feed.source.url, error = %e, "Feed failed");
                        feed.state = FeedFetchState::Failed(e.clone());
                        Err(e)
                    }
                };

                self.completed += 1;
                let update = FeedUpdate {
                    run_id,
                    feed_url: feed.source.url.clone(),
                    source_name: Arc::clone(&feed.source.name),
                    outcome,
                    completed: self.completed,
                    total,
                };
                self.pending.push_back(AggregationEvent::FeedCompleted(update));

                if self.completed == total {
                    self.running = false;
                    self.task = None;
                    self.rx = None;
                    let summary = self.summary();
                    tracing::info!(
                        run_id,
                        succeeded = summary.succeeded.len(),
                        failed = summary.failed.len(),
                        articles = summary.total_articles,
                        "Aggregation run complete"
                    );
                    self.pending.push_back(AggregationEvent::RunCompleted(summary));
                }
            }
        }
    }

    fn summary(&self) -> RunSummary {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for feed in &self.feeds {
            match &feed.state {
                FeedFetchState::Succeeded { .. } => succeeded.push(feed.source.url.clone()),
                FeedFetchState::Failed(e) => failed.push(e.clone()),
                FeedFetchState::Pending | FeedFetchState::InFlight => {}
            }
        }
        RunSummary {
            run_id: self.run_id,
            succeeded,
            failed,
            total_articles: self.index.len(),
        }
    }

    pub fn index(&self) -> &QueryIndex {
        &self.index
    }

    pub fn feed_states(&self) -> &[FeedStatus] {
        &self.feeds
    }

    /// Id of the most recently started run; 0 before the first.
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// True while the current run still has feeds outstanding.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

impl Drop for AggregationEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Body of the spawned run task.
async fn drive_run(
    run_id: u64,
    sources: Vec<FeedSource>,
    fetcher: Arc<dyn FeedFetcher>,
    options: EngineOptions,
    tx: mpsc::Sender<RunMessage>,
) {
    let limit = options.max_concurrent_fetches.max(1);

    let mut completions = stream::iter(sources.into_iter().enumerate())
        .map(|(slot, source)| {
            let fetcher = Arc::clone(&fetcher);
            let tx = tx.clone();
            let options = &options;

            async move {
                if tx.send(RunMessage::Started { run_id, slot }).await.is_err() {
                    tracing::debug!(run_id, "Engine dropped; abandoning fetch");
                }
                let result = fetch_and_parse(fetcher.as_ref(), &source, options).await;
                RunMessage::Finished { run_id, slot, result }
            }
        })
        .buffer_unordered(limit);

    while let Some(message) = completions.next().await {
        if let Err(e) = tx.send(message).await {
            tracing::warn!(run_id, error = %e, "Run channel send failed (receiver dropped)");
            return;
        }
    }
}

async fn fetch_and_parse(
    fetcher: &dyn FeedFetcher,
    source: &FeedSource,
    options: &EngineOptions,
) -> Result<Vec<Article>, FeedError> {
    let raw = match tokio::time::timeout(options.fetch_timeout, fetcher.fetch(&source.url)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(cause)) => {
            return Err(FeedError::Fetch {
                feed_url: source.url.clone(),
                cause,
            })
        }
        Err(_) => {
            return Err(FeedError::Fetch {
                feed_url: source.url.clone(),
                cause: FetchError::Timeout,
            })
        }
    };

    let parsed = parse_feed(&raw, &source.name, source.category, &options.parse).map_err(|e| {
        FeedError::Parse {
            feed_url: source.url.clone(),
            reason: e.0,
        }
    })?;

    if parsed.skipped > 0 || parsed.expired > 0 {
        tracing::debug!(
            feed = %source.url,
            skipped = parsed.skipped,
            expired = parsed.expired,
            "Dropped entries while parsing"
        );
    }

    Ok(parsed.articles)
}
