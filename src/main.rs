use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use secwire::config::Config;
use secwire::engine::{AggregationEngine, AggregationEvent, FeedUpdate, RunSummary};
use secwire::export::{write_snapshot, NewsSnapshot};
use secwire::feed::{taxonomy, Article, Category, HttpFetcher};
use secwire::index::{CategoryFilter, Page};
use secwire::session::FeedSession;
use secwire::util::{display_width, truncate_to_width};

const DEFAULT_TERMINAL_WIDTH: usize = 100;

/// Get the config directory path (~/.config/secwire/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("secwire");
    Ok(config_dir)
}

/// Terminal width from $COLUMNS, for trimming titles.
fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.trim().parse::<usize>().ok())
        .filter(|w| *w >= 40)
        .unwrap_or(DEFAULT_TERMINAL_WIDTH)
}

#[derive(Parser, Debug)]
#[command(name = "secwire", about = "Security news aggregator for OPML feed taxonomies")]
struct Args {
    /// Config file (default: ~/.config/secwire/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// OPML taxonomy file (overrides taxonomy_path from config)
    #[arg(long, value_name = "FILE")]
    taxonomy: Option<PathBuf>,

    /// Only show one category (slug or label, e.g. "threat_intel")
    #[arg(long, value_name = "CATEGORY")]
    category: Option<Category>,

    /// Case-insensitive text filter over title, summary, source and category
    #[arg(long, value_name = "TEXT", default_value = "")]
    search: String,

    /// Articles per page (overrides page_size from config)
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,

    /// Pages to print; 0 prints everything
    #[arg(long, value_name = "N", default_value_t = 1)]
    pages: usize,

    /// Write every aggregated article to a JSON snapshot
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Print the category list and exit
    #[arg(long)]
    list_categories: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for the article listing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.list_categories {
        for category in Category::ALL {
            println!("{:<18} {}", category.slug(), category.label());
        }
        return Ok(());
    }

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Effective configuration");

    let taxonomy_path = args
        .taxonomy
        .clone()
        .unwrap_or_else(|| config.taxonomy_file(&config_dir));
    if !taxonomy_path.exists() {
        eprintln!("Error: No taxonomy file found at {}", taxonomy_path.display());
        eprintln!();
        eprintln!("Point secwire at an OPML outline of your feeds:");
        eprintln!("  secwire --taxonomy /path/to/feeds.opml");
        eprintln!();
        eprintln!("Or set taxonomy_path in {}.", config_path.display());
        std::process::exit(1);
    }

    let nodes = taxonomy::load_file(&taxonomy_path)
        .await
        .with_context(|| format!("Failed to load taxonomy {}", taxonomy_path.display()))?;
    eprintln!("Loaded {} feeds from {}", nodes.len(), taxonomy_path.display());

    let fetcher = HttpFetcher::new(config.fetch_options()?).context("Failed to create HTTP client")?;
    let engine = AggregationEngine::new(
        Arc::new(fetcher),
        config.category_resolver()?,
        config.engine_options(),
    );
    let page_size = args.page_size.unwrap_or(config.page_size);
    let mut session = FeedSession::new(engine, nodes, page_size);
    session.set_query(CategoryFilter::from(args.category), args.search.clone());

    session.on_update(|event| {
        if let AggregationEvent::FeedCompleted(update) = event {
            eprintln!("{}", progress_line(update));
        }
    });

    session.trigger_refresh();
    let summary = session
        .run_to_completion()
        .await
        .context("Aggregation run ended without a summary")?;
    eprintln!("{}", summary_line(&summary));

    let width = terminal_width();
    let mut printed = 0;
    loop {
        let page = session.request_next_page();
        if page.number == 0 && page.articles.is_empty() {
            println!("No matching articles.");
            break;
        }
        print_page(&page, width);
        printed += 1;
        if !page.has_more || (args.pages > 0 && printed >= args.pages) {
            break;
        }
    }

    if let Some(path) = &args.export {
        let snapshot = NewsSnapshot::from_index(session.index(), config.max_age_days);
        write_snapshot(&snapshot, path)
            .with_context(|| format!("Failed to export snapshot to {}", path.display()))?;
        eprintln!("Exported {} articles to {}", snapshot.total_items, path.display());
    }

    Ok(())
}

fn progress_line(update: &FeedUpdate) -> String {
    match &update.outcome {
        Ok(count) => format!(
            "[{}/{}] {}: {} articles",
            update.completed, update.total, update.source_name, count
        ),
        Err(e) => format!("[{}/{}] {}: {}", update.completed, update.total, update.source_name, e),
    }
}

fn summary_line(summary: &RunSummary) -> String {
    let total = summary.succeeded.len() + summary.failed.len();
    if summary.failed.is_empty() {
        format!("{} articles from {} sources", summary.total_articles, total)
    } else {
        format!(
            "{} articles; {} of {} sources unavailable",
            summary.total_articles,
            summary.failed.len(),
            total
        )
    }
}

fn print_page(page: &Page, width: usize) {
    println!(
        "-- page {} ({} of {} matches) --",
        page.number + 1,
        page.articles.len(),
        page.total
    );
    for article in &page.articles {
        print_article(article, width);
    }
}

fn print_article(article: &Article, width: usize) {
    let date = article
        .published_at
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "----------".to_string());
    let prefix = format!("{}  {:<16} ", date, article.category.label());
    let title = if article.title.is_empty() {
        "(untitled)"
    } else {
        &*article.title
    };
    let room = width.saturating_sub(display_width(&prefix));
    println!("{}{}", prefix, truncate_to_width(title, room));
    println!("{:>12}{}", "", truncate_to_width(&article.link, width.saturating_sub(12)));
}
