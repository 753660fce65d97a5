use crate::fetcher::{CacheValidators, Fetcher};
use crate::parser::{extract_article_text, extract_links, FeedParser};
use crate::sources::{is_maritime_title, ScrapeSite};
use crate::types::{ArticleOrigin, RawArticle, Result};
use crate::utils::text::{clean_summary, extract_sentences, smart_truncate};
use crate::utils::url::extract_domain;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const MAX_FEED_ENTRIES: usize = 20;
pub const MAX_SCRAPE_LINKS: usize = 30;
pub const SUMMARY_MAX_CHARS: usize = 300;

/// A source of raw articles for one pipeline run.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self) -> Result<Vec<RawArticle>>;
}

/// Pulls the configured RSS/Atom feeds.
pub struct RssCollector {
    fetcher: Arc<Fetcher>,
    feeds: Vec<String>,
    max_entries: usize,
    validators: RwLock<HashMap<String, CacheValidators>>,
}

impl RssCollector {
    pub fn new(fetcher: Arc<Fetcher>, feeds: Vec<String>) -> Self {
        Self {
            fetcher,
            feeds,
            max_entries: MAX_FEED_ENTRIES,
            validators: RwLock::new(HashMap::new()),
        }
    }

    async fn collect_feed(&self, url: &str) -> Result<Vec<RawArticle>> {
        let previous = self.validators.read().await.get(url).cloned();
        let page = self.fetcher.fetch(url, previous.as_ref()).await?;
        self.validators
            .write()
            .await
            .insert(url.to_string(), page.validators.clone());

        let Some(content) = page.content else {
            debug!("Feed unchanged since last run: {}", url);
            return Ok(Vec::new());
        };
        if !FeedParser::is_valid_feed_content(&content) {
            warn!("Response from {} does not look like a feed", url);
        }

        let mut parser = FeedParser::new();
        let feed = parser.parse_feed(&content)?;
        let source = extract_domain(url).unwrap_or_else(|| url.to_string());
        let total = feed.entries.len();

        let articles: Vec<RawArticle> = feed
            .entries
            .into_iter()
            .take(self.max_entries)
            .filter(|entry| is_maritime_title(&entry.title))
            .map(|entry| {
                let summary = entry
                    .summary
                    .unwrap_or_else(|| format!("Leia mais sobre {}.", entry.title));
                RawArticle::new(
                    entry.title,
                    entry.link,
                    smart_truncate(&clean_summary(&summary), SUMMARY_MAX_CHARS),
                    source.clone(),
                )
            })
            .collect();

        info!("[RSS] {} entries, {} collected from {}", total, articles.len(), url);
        Ok(articles)
    }
}

#[async_trait]
impl Collector for RssCollector {
    fn name(&self) -> &str {
        "rss"
    }

    async fn collect(&self) -> Result<Vec<RawArticle>> {
        let mut articles = Vec::new();
        for url in &self.feeds {
            match self.collect_feed(url).await {
                Ok(mut found) => articles.append(&mut found),
                Err(e) => warn!("[RSS] {} failed: {}", url, e),
            }
        }
        info!("[RSS] total collected: {}", articles.len());
        Ok(articles)
    }
}

/// Scrapes headline links from news listing pages.
pub struct ScrapeCollector {
    fetcher: Arc<Fetcher>,
    sites: Vec<ScrapeSite>,
    max_links: usize,
    fetch_bodies: bool,
}

impl ScrapeCollector {
    pub fn new(fetcher: Arc<Fetcher>, sites: Vec<ScrapeSite>) -> Self {
        Self {
            fetcher,
            sites,
            max_links: MAX_SCRAPE_LINKS,
            fetch_bodies: true,
        }
    }

    /// Use the headline as the summary instead of fetching each article.
    pub fn without_article_bodies(mut self) -> Self {
        self.fetch_bodies = false;
        self
    }

    async fn article_summary(&self, link: &str, title: &str) -> String {
        if !self.fetch_bodies {
            return title.to_string();
        }
        match self.fetcher.fetch(link, None).await {
            Ok(page) => {
                let text = page.content.map(|html| extract_article_text(&html)).unwrap_or_default();
                let summary = extract_sentences(&clean_summary(&text), 3);
                if summary.is_empty() {
                    title.to_string()
                } else {
                    smart_truncate(&summary, SUMMARY_MAX_CHARS)
                }
            }
            Err(e) => {
                debug!("Could not fetch article body {}: {}", link, e);
                title.to_string()
            }
        }
    }

    async fn collect_site(&self, site: &ScrapeSite) -> Result<Vec<RawArticle>> {
        let page = self.fetcher.fetch(&site.url, None).await?;
        let html = page.content.unwrap_or_default();
        let links = extract_links(&html, &site.url, &site.selectors, self.max_links)?;
        let source = extract_domain(&site.url).unwrap_or_else(|| site.url.clone());
        let found = links.len();

        let mut articles = Vec::new();
        for link in links.into_iter().filter(|l| is_maritime_title(&l.title)) {
            let summary = self.article_summary(&link.link, &link.title).await;
            articles.push(
                RawArticle::new(link.title, link.link, summary, source.clone()).with_origin(ArticleOrigin::Scrape),
            );
        }

        info!("[SCRAPE] {} links, {} collected from {}", found, articles.len(), site.url);
        Ok(articles)
    }
}

#[async_trait]
impl Collector for ScrapeCollector {
    fn name(&self) -> &str {
        "scrape"
    }

    async fn collect(&self) -> Result<Vec<RawArticle>> {
        let mut articles = Vec::new();
        for site in &self.sites {
            match self.collect_site(site).await {
                Ok(mut found) => articles.append(&mut found),
                Err(e) => warn!("[SCRAPE] {} failed: {}", site.url, e),
            }
        }
        info!("[SCRAPE] total collected: {}", articles.len());
        Ok(articles)
    }
}

/// Hands out a fixed list of articles, e.g. loaded from a JSON file.
pub struct StaticCollector {
    name: String,
    articles: Vec<RawArticle>,
}

impl StaticCollector {
    pub fn new(name: impl Into<String>, articles: Vec<RawArticle>) -> Self {
        Self {
            name: name.into(),
            articles,
        }
    }

    /// Read a JSON array of `{title, link, summary, source}` objects.
    pub async fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let entries: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;
        let field = |v: &serde_json::Value, key: &str| v.get(key).and_then(|x| x.as_str()).unwrap_or_default().to_string();

        let articles = entries
            .iter()
            .map(|v| {
                let link = field(v, "link");
                let article = RawArticle::new(field(v, "title"), link.clone(), field(v, "summary"), field(v, "source"));
                if link.trim().is_empty() {
                    article.with_origin(ArticleOrigin::Discovered)
                } else {
                    article
                }
            })
            .collect();
        Ok(Self::new(path.display().to_string(), articles))
    }
}

#[async_trait]
impl Collector for StaticCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Vec<RawArticle>> {
        Ok(self.articles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_collector_reads_json_and_marks_linkless_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        tokio::fs::write(
            &path,
            r#"[
                {"title": "Porto de Itaqui", "link": "https://a/1", "summary": "carga", "source": "a"},
                {"title": "Navio encalha no Pará", "summary": "descoberto pela busca", "source": "busca"}
            ]"#,
        )
        .await
        .unwrap();

        let collector = StaticCollector::from_json_file(&path).await.unwrap();
        let articles = collector.collect().await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].origin, ArticleOrigin::Feed);
        assert_eq!(articles[1].origin, ArticleOrigin::Discovered);
        assert!(articles[1].link.is_empty());
    }

    #[tokio::test]
    async fn unreachable_feed_yields_empty_list() {
        let fetcher = Arc::new(
            Fetcher::new(crate::types::FetchConfig {
                max_retries: 0,
                timeout_seconds: 1,
                ..Default::default()
            })
            .unwrap(),
        );
        let collector = RssCollector::new(fetcher, vec!["http://127.0.0.1:9/feed".to_string()]);
        assert!(collector.collect().await.unwrap().is_empty());
    }
}
