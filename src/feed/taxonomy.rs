use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::util::validate_url;

/// SEC-003: Maximum allowed nesting depth for outline elements.
/// Prevents resource exhaustion from maliciously deep taxonomy documents.
const MAX_TAXONOMY_DEPTH: usize = 50;

/// Separator used when a feed sits below more than two folder levels.
const SUBGROUP_SEPARATOR: &str = " / ";

/// Errors that make a taxonomy document unusable. Any of these is fatal to
/// startup: without a taxonomy there is nothing to aggregate.
#[derive(Debug, Error)]
pub enum TaxonomyError {
    /// SEC-003: Outline nesting depth exceeds safety limit.
    #[error("Taxonomy nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// The document is not well-formed XML.
    #[error("Taxonomy XML parse error: {0}")]
    XmlParse(String),

    /// Well-formed, but no outline carried a usable feed URL.
    #[error("Taxonomy contains no feed entries")]
    Empty,

    #[error("Failed to read taxonomy file: {0}")]
    Io(#[from] std::io::Error),
}

/// One feed from the taxonomy, with the folder path it was filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyNode {
    /// Outermost folder label; empty for feeds at the top level.
    pub group: String,
    /// Remaining folder labels joined with `" / "`; empty when the feed sits
    /// directly inside its group.
    pub subgroup: String,
    /// Feed display name: `title`, then `text`, then the feed URL.
    pub title: String,
    pub feed_url: String,
}

/// Reads and parses a taxonomy file from disk.
pub async fn load_file(path: &Path) -> Result<Vec<TaxonomyNode>, TaxonomyError> {
    let content = tokio::fs::read_to_string(path).await?;
    load(&content)
}

/// Parses an OPML taxonomy into feed nodes.
///
/// Outlines without `xmlUrl` are folders; their labels form the group and
/// subgroup of every feed beneath them. Feed URLs are validated and
/// duplicates are dropped (first occurrence wins).
///
/// # Errors
///
/// - [`TaxonomyError::XmlParse`] for malformed XML, including outlines left
///   open at end of document
/// - [`TaxonomyError::MaxDepthExceeded`] past 50 levels of nesting
/// - [`TaxonomyError::Empty`] when no feed survives validation
///
/// # Security
///
/// SEC-002: quick-xml (0.37) never expands `<!ENTITY>` declarations; custom
/// entity references fail in `decode_and_unescape_value()` instead of
/// resolving, so XXE payloads cannot leak into titles or URLs.
pub fn load(document: &str) -> Result<Vec<TaxonomyNode>, TaxonomyError> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut nodes = Vec::new();
    let mut seen = HashSet::new();
    let mut buf = Vec::new();
    // One entry per open <outline>: Some(label) for folders, None for feeds
    let mut open: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                if open.len() >= MAX_TAXONOMY_DEPTH {
                    return Err(TaxonomyError::MaxDepthExceeded(MAX_TAXONOMY_DEPTH));
                }
                let outline = read_outline(&e, &reader)?;
                match outline.xml_url {
                    Some(url) => {
                        push_feed(&mut nodes, &mut seen, &open, outline.title, url);
                        open.push(None);
                    }
                    None => open.push(Some(outline.label.unwrap_or_default())),
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = read_outline(&e, &reader)?;
                if let Some(url) = outline.xml_url {
                    push_feed(&mut nodes, &mut seen, &open, outline.title, url);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                open.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(TaxonomyError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !open.is_empty() {
        return Err(TaxonomyError::XmlParse(format!(
            "{} outline element(s) not closed",
            open.len()
        )));
    }
    if nodes.is_empty() {
        return Err(TaxonomyError::Empty);
    }

    tracing::debug!(feeds = nodes.len(), "Parsed taxonomy");
    Ok(nodes)
}

struct Outline {
    xml_url: Option<String>,
    /// `title` falling back to `text`, used for feed names.
    title: Option<String>,
    /// `text` falling back to `title`, used for folder labels.
    label: Option<String>,
}

fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, TaxonomyError> {
    let mut xml_url = None;
    let mut title = None;
    let mut text = None;
    let decoder = reader.decoder();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed outline attribute");
                continue;
            }
        };
        let slot = match attr.key.as_ref() {
            b"xmlUrl" => &mut xml_url,
            b"title" => &mut title,
            b"text" => &mut text,
            _ => continue,
        };
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| TaxonomyError::XmlParse(e.to_string()))?;
        let value = value.trim();
        if !value.is_empty() {
            *slot = Some(value.to_string());
        }
    }

    Ok(Outline {
        xml_url,
        label: text.clone().or_else(|| title.clone()),
        title: title.or(text),
    })
}

fn push_feed(
    nodes: &mut Vec<TaxonomyNode>,
    seen: &mut HashSet<String>,
    open: &[Option<String>],
    title: Option<String>,
    url: String,
) {
    if let Err(e) = validate_url(&url) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        return;
    }
    if !seen.insert(url.clone()) {
        tracing::debug!(url = %url, "Skipping duplicate feed URL");
        return;
    }

    // Feed outlines nested inside other feed outlines contribute no label
    let mut folders = open.iter().flatten().map(String::as_str);
    let group = folders.next().unwrap_or_default().to_string();
    let subgroup = folders.collect::<Vec<_>>().join(SUBGROUP_SEPARATOR);

    nodes.push(TaxonomyNode {
        group,
        subgroup,
        title: title.unwrap_or_else(|| url.clone()),
        feed_url: url,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TAXONOMY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Security feeds</title></head>
  <body>
    <outline text="Malware" title="Malware">
      <outline text="Ransomware">
        <outline type="rss" text="Ransom Watch" xmlUrl="https://ransom.example.com/feed"/>
      </outline>
      <outline type="rss" title="Malware Blog" text="mb" xmlUrl="https://malware.example.com/rss"/>
    </outline>
    <outline type="rss" text="Loose Feed" xmlUrl="https://loose.example.com/atom"/>
  </body>
</opml>"#;

    #[test]
    fn test_groups_and_subgroups() {
        let nodes = load(TAXONOMY).unwrap();
        assert_eq!(
            nodes,
            vec![
                TaxonomyNode {
                    group: "Malware".into(),
                    subgroup: "Ransomware".into(),
                    title: "Ransom Watch".into(),
                    feed_url: "https://ransom.example.com/feed".into(),
                },
                TaxonomyNode {
                    group: "Malware".into(),
                    subgroup: String::new(),
                    title: "Malware Blog".into(),
                    feed_url: "https://malware.example.com/rss".into(),
                },
                TaxonomyNode {
                    group: String::new(),
                    subgroup: String::new(),
                    title: "Loose Feed".into(),
                    feed_url: "https://loose.example.com/atom".into(),
                },
            ]
        );
    }

    #[test]
    fn test_deep_folders_join_into_subgroup() {
        let doc = r#"<opml version="2.0"><body>
            <outline text="Intel"><outline text="APT"><outline text="China">
                <outline xmlUrl="https://apt.example.com/feed"/>
            </outline></outline></outline>
        </body></opml>"#;
        let nodes = load(doc).unwrap();
        assert_eq!(nodes[0].group, "Intel");
        assert_eq!(nodes[0].subgroup, "APT / China");
        assert_eq!(nodes[0].title, "https://apt.example.com/feed");
    }

    #[test]
    fn test_feed_outline_with_children_is_not_a_folder() {
        let doc = r#"<opml version="2.0"><body><outline text="News">
            <outline text="Parent" xmlUrl="https://parent.example.com/feed">
                <outline text="Child" xmlUrl="https://child.example.com/feed"/>
            </outline>
        </outline></body></opml>"#;
        let nodes = load(doc).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].group, "News");
        assert_eq!(nodes[1].subgroup, "");
    }

    #[test]
    fn test_duplicate_and_invalid_urls_skipped() {
        let doc = r#"<opml version="2.0"><body>
            <outline text="A" xmlUrl="https://valid.example.com/feed"/>
            <outline text="B" xmlUrl="https://valid.example.com/feed"/>
            <outline text="C" xmlUrl="http://192.168.1.1/feed"/>
            <outline text="D" xmlUrl="file:///etc/passwd"/>
        </body></opml>"#;
        let nodes = load(doc).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].title, "A");
    }

    #[test]
    fn test_no_feeds_is_an_error() {
        let doc = r#"<opml version="2.0"><body><outline text="Empty folder"/></body></opml>"#;
        assert!(matches!(load(doc), Err(TaxonomyError::Empty)));

        let doc = r#"<opml version="2.0"><body>
            <outline text="Bad" xmlUrl="http://localhost/feed"/>
        </body></opml>"#;
        assert!(matches!(load(doc), Err(TaxonomyError::Empty)));
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(load("<not valid xml").is_err());
        assert!(matches!(
            load("<opml><body><outline text=\"a\"></body></opml>"),
            Err(TaxonomyError::XmlParse(_))
        ));
    }

    #[test]
    fn test_unclosed_outline_is_an_error() {
        let doc = r#"<opml><body><outline text="Open">
            <outline xmlUrl="https://example.com/feed"/>"#;
        assert!(matches!(load(doc), Err(TaxonomyError::XmlParse(_))));
    }

    #[test]
    fn test_deeply_nested_rejected() {
        let mut doc = String::from(r#"<opml version="2.0"><body>"#);
        for _ in 0..100 {
            doc.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            doc.push_str("</outline>");
        }
        doc.push_str("</body></opml>");

        let err = load(&doc).unwrap_err();
        assert!(matches!(err, TaxonomyError::MaxDepthExceeded(50)));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn test_xxe_entity_not_expanded() {
        let doc = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml version="2.0"><body>
    <outline text="&xxe;" xmlUrl="https://example.com/feed.xml"/>
</body></opml>"#;

        // Rejection is the expected outcome; a literal title is tolerable
        if let Ok(nodes) = load(doc) {
            for node in nodes {
                assert!(!node.title.contains("root:"));
            }
        }
    }

    #[tokio::test]
    async fn test_load_file_missing_is_io_error() {
        let result = load_file(Path::new("/nonexistent/secwire/feeds.opml")).await;
        assert!(matches!(result, Err(TaxonomyError::Io(_))));
    }
}
