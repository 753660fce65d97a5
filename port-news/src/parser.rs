use crate::types::{NewsError, Result};
use crate::utils::url::resolve_link;
use feed_rs::parser;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub guid: Option<String>,
    pub link: String,
    pub title: String,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

/// RSS/Atom parsing on top of `feed-rs`, dropping repeated GUIDs and links.
pub struct FeedParser {
    seen_guids: HashSet<String>,
    seen_urls: HashSet<String>,
}

impl FeedParser {
    pub fn new() -> Self {
        Self {
            seen_guids: HashSet::new(),
            seen_urls: HashSet::new(),
        }
    }

    pub fn parse_feed(&mut self, content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| NewsError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let entries: Vec<ParsedEntry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();

        info!("Parsed feed with {} entries", entries.len());
        Ok(ParsedFeed { title, entries })
    }

    fn parse_entry(&mut self, entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())?;
        let link = entry.links.first()?.href.clone();

        let guid = (!entry.id.is_empty()).then(|| entry.id.clone());
        if let Some(ref guid) = guid {
            if !self.seen_guids.insert(guid.clone()) {
                debug!("Skipping duplicate entry with GUID: {}", guid);
                return None;
            }
        }
        if !self.seen_urls.insert(link.clone()) {
            debug!("Skipping duplicate entry with URL: {}", link);
            return None;
        }

        let summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|s| strip_markup(&s))
            .filter(|s| !s.is_empty());

        Some(ParsedEntry {
            guid,
            link,
            title,
            summary,
        })
    }

    pub fn is_valid_feed_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();
        content_lower.contains("<rss")
            || content_lower.contains("<feed")
            || content_lower.contains("<rdf:rdf")
            || content_lower.contains("<channel")
    }
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Text content of an HTML fragment, whitespace collapsed.
pub fn strip_markup(fragment: &str) -> String {
    if !fragment.contains('<') {
        return crate::utils::text::collapse_whitespace(fragment);
    }
    let html = Html::parse_fragment(fragment);
    crate::utils::text::collapse_whitespace(&html.root_element().text().collect::<Vec<_>>().join(" "))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    pub title: String,
    pub link: String,
}

/// Anchors matched by `selectors` on a listing page, resolved against
/// `base_url`. Links without text and repeated links are skipped.
pub fn extract_links(html: &str, base_url: &str, selectors: &str, limit: usize) -> Result<Vec<PageLink>> {
    let selector = Selector::parse(selectors)
        .map_err(|e| NewsError::Parse(format!("invalid selector {:?}: {:?}", selectors, e)))?;
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        if links.len() >= limit {
            break;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(link) = resolve_link(base_url, href) else {
            continue;
        };
        let title = crate::utils::text::collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
        if title.is_empty() || !seen.insert(link.clone()) {
            continue;
        }
        links.push(PageLink { title, link });
    }
    Ok(links)
}

/// Readable body text of an article page: paragraph text, falling back to
/// the whole body.
pub fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text_of = |css: &str| -> String {
        match Selector::parse(css) {
            Ok(selector) => document
                .select(&selector)
                .map(|el| el.text().collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>()
                .join(" "),
            Err(e) => {
                warn!("Invalid selector {}: {:?}", css, e);
                String::new()
            }
        }
    };

    let paragraphs = crate::utils::text::collapse_whitespace(&text_of("article p, main p, p"));
    if !paragraphs.is_empty() {
        return paragraphs;
    }
    crate::utils::text::collapse_whitespace(&text_of("body"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Portos e Navios</title>
    <link>https://www.portosenavios.com.br</link>
    <description>Notícias</description>
    <item>
      <title>Porto de Itaqui bate recorde</title>
      <link>https://www.portosenavios.com.br/noticias/itaqui-recorde</link>
      <guid>itaqui-1</guid>
      <description><![CDATA[<p>Aumento de <b>15%</b> na carga</p>]]></description>
    </item>
    <item>
      <title>Porto de Itaqui bate recorde</title>
      <link>https://www.portosenavios.com.br/noticias/itaqui-recorde</link>
      <guid>itaqui-1</guid>
    </item>
    <item>
      <title>Suape amplia terminal</title>
      <link>https://www.portosenavios.com.br/noticias/suape</link>
      <guid>suape-1</guid>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_and_drops_repeated_entries() {
        let mut parser = FeedParser::new();
        let feed = parser.parse_feed(RSS).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Portos e Navios"));
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].summary.as_deref(), Some("Aumento de 15% na carga"));
        assert!(feed.entries[1].summary.is_none());
        assert!(FeedParser::is_valid_feed_content(RSS));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let mut parser = FeedParser::new();
        assert!(matches!(parser.parse_feed("not a feed"), Err(NewsError::Parse(_))));
    }

    #[test]
    fn extracts_resolved_links_from_listing() {
        let html = r#"<html><body>
            <h2 class="entry-title"><a href="/noticias/pecem">Pecém recebe navio</a></h2>
            <h2 class="entry-title"><a href="javascript:void(0)">Menu</a></h2>
            <h2 class="entry-title"><a href="/noticias/pecem">Pecém recebe navio</a></h2>
            <h2><a href="https://outro.com/x">  Terminal   de carga </a></h2>
            <h2><a href="/vazio"></a></h2>
        </body></html>"#;
        let links = extract_links(html, "https://www.portosenavios.com.br/noticias/", "h2 a", 30).unwrap();
        assert_eq!(
            links,
            vec![
                PageLink {
                    title: "Pecém recebe navio".to_string(),
                    link: "https://www.portosenavios.com.br/noticias/pecem".to_string(),
                },
                PageLink {
                    title: "Terminal de carga".to_string(),
                    link: "https://outro.com/x".to_string(),
                },
            ]
        );
        assert_eq!(extract_links(html, "https://www.portosenavios.com.br/", "h2 a", 1).unwrap().len(), 1);
    }

    #[test]
    fn article_text_prefers_paragraphs() {
        let html = "<html><body><nav>Menu</nav><p>Primeiro parágrafo.</p><p>Segundo.</p></body></html>";
        assert_eq!(extract_article_text(html), "Primeiro parágrafo. Segundo.");
    }
}
