use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How urgent an approved article is for the daily digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = NewsError;

    /// Accepts both the English labels and the Portuguese ones the judge
    /// rubric asks for (BAIXA/MEDIA/ALTA, with or without accents).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "LOW" | "BAIXA" => Ok(Urgency::Low),
            "MEDIUM" | "MEDIA" | "MÉDIA" => Ok(Urgency::Medium),
            "HIGH" | "ALTA" => Ok(Urgency::High),
            other => Err(NewsError::Parse(format!("unknown urgency: {}", other))),
        }
    }
}

/// Where an article came from. Discovered articles have no source link and
/// are keyed by a synthetic identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleOrigin {
    Feed,
    Scrape,
    Discovered,
}

impl ArticleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleOrigin::Feed => "feed",
            ArticleOrigin::Scrape => "scrape",
            ArticleOrigin::Discovered => "discovered",
        }
    }
}

impl FromStr for ArticleOrigin {
    type Err = NewsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "feed" => Ok(ArticleOrigin::Feed),
            "scrape" => Ok(ArticleOrigin::Scrape),
            "discovered" => Ok(ArticleOrigin::Discovered),
            other => Err(NewsError::Parse(format!("unknown article origin: {}", other))),
        }
    }
}

/// Structured relevance judgment for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub relevant: bool,
    /// 0-100
    pub confidence: u8,
    pub reason: String,
    pub urgency: Urgency,
}

/// An item as handed over by a collector, before any filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub title: String,
    /// Empty for discovered articles.
    pub link: String,
    pub summary: String,
    pub source: String,
    pub origin: ArticleOrigin,
}

impl RawArticle {
    pub fn new(title: impl Into<String>, link: impl Into<String>, summary: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            summary: summary.into(),
            source: source.into(),
            origin: ArticleOrigin::Feed,
        }
    }

    pub fn with_origin(mut self, origin: ArticleOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// The link when there is one, otherwise a key derived from the title
    /// and the collection date.
    pub fn identity_key(&self, collected_on: NaiveDate) -> String {
        let link = self.link.trim();
        if link.is_empty() {
            crate::identity::synthetic_key(&self.title, collected_on)
        } else {
            link.to_string()
        }
    }

    pub fn combined_text(&self) -> String {
        format!("{} {}", self.title, self.summary)
    }
}

/// An approved article as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    /// Identity key: the source link, or a synthetic key for discovered items.
    pub link: String,
    pub summary: String,
    pub source: String,
    pub origin: ArticleOrigin,
    pub collected_at: DateTime<Utc>,
    pub urgency: Urgency,
    pub confidence: u8,
    /// The judge's verdict, when the judge ran for this article.
    pub verdict: Option<Verdict>,
}

/// A human reviewer's reaction to a published article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub title: String,
    pub summary: String,
    pub relevant: bool,
    pub created_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.summary)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: i64,
    pub relevant_count: i64,
    pub irrelevant_count: i64,
}

/// Articles collected on one day, split by urgency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub total: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_page_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; PortNews/0.1)".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 1,
            max_page_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NewsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A pipeline run is already in progress")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, NewsError>;
