//! End-to-end aggregation: taxonomy → proxy fetch → parse → index → pages.
//!
//! A wiremock server stands in for the retrieval proxy. Feed URLs point at
//! public-looking hosts that are never contacted directly; every request
//! goes through the proxy template.

use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use secwire::config::Config;
use secwire::engine::{AggregationEngine, AggregationEvent, EngineOptions, FeedFetchState};
use secwire::export::{write_snapshot, NewsSnapshot};
use secwire::feed::{taxonomy, Category, FeedError, FetchError, HttpFetcher};
use secwire::index::CategoryFilter;
use secwire::session::FeedSession;

const TAXONOMY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Security feeds</title></head>
  <body>
    <outline text="Malware">
      <outline text="Research" title="Lab Blog" xmlUrl="https://lab.example.com/feed"/>
      <outline text="Analysis">
        <outline text="Reversing Weekly" xmlUrl="https://rev.example.com/atom"/>
      </outline>
    </outline>
    <outline text="Vulnerabilities">
      <outline text="Down Tracker" xmlUrl="https://down.example.com/rss"/>
    </outline>
  </body>
</opml>"#;

const LAB_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Lab</title>
  <item>
    <title>New loader spotted</title>
    <link>https://lab.example.com/posts/loader/</link>
    <description><![CDATA[<p>A <b>loader</b> drops stealers.</p>]]></description>
    <pubDate>Fri, 01 Mar 2024 10:00:00 GMT</pubDate>
  </item>
  <item><title>No link, skipped</title></item>
  <item>
    <title>Botnet takedown</title>
    <link>https://lab.example.com/posts/botnet</link>
    <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
  </item>
</channel></rss>"#;

const REV_ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Reversing</title><id>urn:rev</id><updated>2024-02-01T00:00:00Z</updated>
  <entry>
    <title>Unpacking a loader</title><id>urn:rev:1</id>
    <link rel="alternate" href="https://rev.example.com/unpacking"/>
    <updated>2024-02-01T00:00:00Z</updated>
    <summary>Step by step.</summary>
  </entry>
</feed>"#;

async fn proxy_with_feeds() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .and(query_param("url", "https://lab.example.com/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LAB_RSS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .and(query_param("url", "https://rev.example.com/atom"))
        .respond_with(ResponseTemplate::new(200).set_body_string(REV_ATOM))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .and(query_param("url", "https://down.example.com/rss"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    server
}

fn config_for(server: &MockServer) -> Config {
    let toml = format!(
        r#"
fetch_timeout_secs = 5
proxy_url = "{}/raw?url={{url}}"

[[categories.mapping]]
group = "Malware"
category = "malware"

[[categories.mapping]]
group = "Malware"
subgroup = "Analysis"
category = "malware_analysis"

[[categories.mapping]]
group = "Vulnerabilities"
category = "vulns"
"#,
        server.uri()
    );
    Config::from_toml(&toml).unwrap()
}

fn session_for(config: &Config, page_size: usize) -> FeedSession {
    let nodes = taxonomy::load(TAXONOMY).unwrap();
    let fetcher = HttpFetcher::new(config.fetch_options().unwrap()).unwrap();
    let engine = AggregationEngine::new(
        Arc::new(fetcher),
        config.category_resolver().unwrap(),
        config.engine_options(),
    );
    FeedSession::new(engine, nodes, page_size)
}

#[tokio::test]
async fn test_full_run_through_proxy() {
    let server = proxy_with_feeds().await;
    let mut session = session_for(&config_for(&server), 10);

    let events = Arc::new(Mutex::new(Vec::<AggregationEvent>::new()));
    let sink = Arc::clone(&events);
    session.on_update(move |event| sink.lock().unwrap().push(event.clone()));

    session.trigger_refresh();
    let summary = session.run_to_completion().await.unwrap();

    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(
        summary.failed,
        vec![FeedError::Fetch {
            feed_url: "https://down.example.com/rss".to_string(),
            cause: FetchError::HttpStatus(503),
        }]
    );
    assert_eq!(summary.total_articles, 3);
    // One event per feed plus the run completion
    assert_eq!(events.lock().unwrap().len(), 4);

    let page = session.request_next_page();
    let titles: Vec<&str> = page.articles.iter().map(|a| &*a.title).collect();
    assert_eq!(
        titles,
        vec!["New loader spotted", "Unpacking a loader", "Botnet takedown"]
    );
    assert!(!page.has_more);

    let loader = &page.articles[0];
    assert_eq!(&*loader.link, "https://lab.example.com/posts/loader");
    assert_eq!(&*loader.summary, "A loader drops stealers.");
    assert_eq!(&*loader.source_name, "Lab Blog");
    assert_eq!(loader.category, Category::Malware);
    assert_eq!(page.articles[1].category, Category::MalwareAnalysis);
}

#[tokio::test]
async fn test_filters_and_search_after_run() {
    let server = proxy_with_feeds().await;
    let mut session = session_for(&config_for(&server), 10);
    session.trigger_refresh();
    session.run_to_completion().await;

    session.set_query(CategoryFilter::Only(Category::MalwareAnalysis), "");
    let page = session.request_next_page();
    assert_eq!(page.total, 1);
    assert_eq!(&*page.articles[0].title, "Unpacking a loader");

    session.set_query(CategoryFilter::All, "LOADER");
    assert_eq!(session.request_next_page().total, 2);

    session.set_query(CategoryFilter::Only(Category::Vulns), "");
    let page = session.request_next_page();
    assert!(page.articles.is_empty());
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_failed_feed_state_is_visible() {
    let server = proxy_with_feeds().await;
    let mut session = session_for(&config_for(&server), 10);
    session.trigger_refresh();
    session.run_to_completion().await;

    let states: Vec<(&str, &FeedFetchState)> = session
        .feed_states()
        .iter()
        .map(|s| (s.source.url.as_str(), &s.state))
        .collect();
    assert_eq!(states[0], ("https://lab.example.com/feed", &FeedFetchState::Succeeded { articles: 2 }));
    assert_eq!(states[1], ("https://rev.example.com/atom", &FeedFetchState::Succeeded { articles: 1 }));
    assert!(matches!(states[2].1, FeedFetchState::Failed(_)));
}

#[tokio::test]
async fn test_slow_proxy_times_out_without_blocking_others() {
    let server = proxy_with_feeds().await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .and(query_param("url", "https://slow.example.com/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LAB_RSS).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let fetcher = HttpFetcher::new(config.fetch_options().unwrap()).unwrap();
    let engine = AggregationEngine::new(
        Arc::new(fetcher),
        config.category_resolver().unwrap(),
        EngineOptions {
            fetch_timeout: Duration::from_millis(300),
            ..config.engine_options()
        },
    );
    let mut nodes = taxonomy::load(TAXONOMY).unwrap();
    for (title, url) in [
        ("Slow", "https://slow.example.com/feed"),
        // No mock for this one; wiremock answers 404
        ("Unknown", "https://unknown.example.com/feed"),
    ] {
        nodes.push(taxonomy::TaxonomyNode {
            group: "Malware".to_string(),
            subgroup: String::new(),
            title: title.to_string(),
            feed_url: url.to_string(),
        });
    }
    let mut session = FeedSession::new(engine, nodes, 10);

    session.trigger_refresh();
    let summary = session.run_to_completion().await.unwrap();
    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(summary.failed.len(), 3);
    assert!(summary.failed.contains(&FeedError::Fetch {
        feed_url: "https://slow.example.com/feed".to_string(),
        cause: FetchError::Timeout,
    }));
    assert!(summary.failed.contains(&FeedError::Fetch {
        feed_url: "https://unknown.example.com/feed".to_string(),
        cause: FetchError::HttpStatus(404),
    }));
    assert_eq!(session.index().len(), 3);
}

#[tokio::test]
async fn test_export_snapshot_after_run() {
    let server = proxy_with_feeds().await;
    let mut session = session_for(&config_for(&server), 10);
    session.trigger_refresh();
    session.run_to_completion().await;

    let path = std::env::temp_dir().join("secwire_it_snapshot.json");
    let snapshot = NewsSnapshot::from_index(session.index(), 30);
    write_snapshot(&snapshot, &path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["total_items"], 3);
    assert_eq!(value["days_back"], 30);
    assert_eq!(value["items"][0]["title"], "New loader spotted");
    assert_eq!(value["items"][0]["category"], "malware");
    assert_eq!(value["items"][0]["source"], "Lab Blog");

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_refresh_replaces_previous_run() {
    let server = proxy_with_feeds().await;
    let mut session = session_for(&config_for(&server), 2);

    let first = session.trigger_refresh();
    // Superseded before any completion is applied
    let second = session.trigger_refresh();
    assert!(second > first);

    let summary = session.run_to_completion().await.unwrap();
    assert_eq!(summary.run_id, second);
    assert_eq!(session.index().len(), 3);

    let page = session.request_next_page();
    assert_eq!((page.number, page.articles.len(), page.has_more), (0, 2, true));
}
