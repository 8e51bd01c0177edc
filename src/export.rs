//! One-shot JSON snapshot of the aggregated articles.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::feed::{Article, Category};
use crate::index::{CategoryFilter, QueryIndex};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write snapshot to '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything in the index at one point in time, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct NewsSnapshot {
    pub generated_at: DateTime<Utc>,
    /// Age window the articles were filtered with; 0 when unbounded.
    pub days_back: u32,
    pub total_items: usize,
    pub items: Vec<SnapshotItem>,
}

/// One article as written to the snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotItem {
    pub title: Arc<str>,
    pub link: Arc<str>,
    pub summary: Arc<str>,
    #[serde(rename = "source")]
    pub source_name: Arc<str>,
    pub category: Category,
    #[serde(rename = "published")]
    pub published_at: Option<DateTime<Utc>>,
}

impl From<Article> for SnapshotItem {
    fn from(article: Article) -> Self {
        Self {
            title: article.title,
            link: article.link,
            summary: article.summary,
            source_name: article.source_name,
            category: article.category,
            published_at: article.published_at,
        }
    }
}

impl NewsSnapshot {
    pub fn from_index(index: &QueryIndex, days_back: u32) -> Self {
        let items: Vec<SnapshotItem> = index
            .query(CategoryFilter::All, "")
            .into_iter()
            .map(SnapshotItem::from)
            .collect();
        Self {
            generated_at: Utc::now(),
            days_back,
            total_items: items.len(),
            items,
        }
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Writes the snapshot as pretty JSON, replacing `path` atomically.
pub fn write_snapshot(snapshot: &NewsSnapshot, path: &Path) -> Result<(), ExportError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = snapshot.to_json()?;

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(|e| io_error(&temp_path, e))?;

    let written = std::io::Write::write_all(&mut file, content.as_bytes()).and_then(|()| file.sync_all());
    drop(file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_error(&temp_path, e));
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_error(path, e));
    }

    tracing::info!(path = %path.display(), items = snapshot.total_items, "Snapshot written");
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.display().to_string(),
        source,
    }
}
