//! Default news sources.

pub const RSS_FEEDS: &[&str] = &[
    "https://www.portosenavios.com.br/feed",
    "https://www.gov.br/antaq/pt-br/rss.xml",
    "https://www.marinha.mil.br/rss.xml",
    "https://www.gov.br/mdic/pt-br/rss.xml",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeSite {
    pub url: String,
    /// CSS selector group for the headline anchors on the listing page.
    pub selectors: String,
}

impl ScrapeSite {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let selectors = default_selectors(&url).to_string();
        Self { url, selectors }
    }

    pub fn with_selectors(url: impl Into<String>, selectors: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selectors: selectors.into(),
        }
    }
}

pub const SCRAPE_SITES: &[&str] = &[
    "https://www.portosenavios.com.br/noticias/",
    "https://www.gov.br/antaq/pt-br/central-de-conteudos/noticias",
    "https://www.marinha.mil.br/secirm/noticias",
];

fn default_selectors(url: &str) -> &'static str {
    if url.contains("portosenavios") {
        ".entry-title a, .post a, h2 a"
    } else if url.contains("gov.br") {
        "a[href*='/noticias/'], h3 a, .noticia a"
    } else {
        ".post a, .news a, h2 a"
    }
}

pub fn default_scrape_sites() -> Vec<ScrapeSite> {
    SCRAPE_SITES.iter().map(|url| ScrapeSite::new(*url)).collect()
}

pub fn default_rss_feeds() -> Vec<String> {
    RSS_FEEDS.iter().map(|s| s.to_string()).collect()
}

/// Broad maritime vocabulary a headline must contain to be collected at all.
pub const MARITIME_TITLE_TERMS: &[&str] = &[
    "porto",
    "navio",
    "marítimo",
    "shipping",
    "carga",
    "terminal",
    "logística",
    "offshore",
    "regulamentação",
    "marinha",
    "antaq",
];

pub fn is_maritime_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    MARITIME_TITLE_TERMS.iter().any(|term| lower.contains(term))
}
