use crate::types::{Article, ArticleOrigin, DailySummary, FeedbackRecord, FeedbackStats, Result, Urgency, Verdict};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ARTICLES: usize = 200;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        link TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        summary TEXT NOT NULL,
        source TEXT NOT NULL,
        origin TEXT NOT NULL,
        collected_at TEXT NOT NULL,
        urgency TEXT NOT NULL,
        confidence INTEGER NOT NULL,
        verdict TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_articles_collected_at ON articles (collected_at)",
    r#"
    CREATE TABLE IF NOT EXISTS feedback (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        summary TEXT NOT NULL,
        relevant INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

/// Durable store for approved articles and reviewer feedback.
///
/// Articles are unique on their identity key and pruned to the newest
/// `max_articles` by insertion order. Feedback is append-only.
#[derive(Clone)]
pub struct ArticleStore {
    db: SqlitePool,
    max_articles: usize,
}

impl ArticleStore {
    pub async fn connect(database_url: &str, max_articles: usize) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let filename = options.clone().get_filename();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let store = Self { db, max_articles };
        store.init_schema().await?;
        info!("Article store ready at {}", database_url);
        Ok(store)
    }

    /// A private in-memory database. One connection, so every query sees
    /// the same data.
    pub async fn in_memory(max_articles: usize) -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { db, max_articles };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db).await?;
        }
        Ok(())
    }

    pub fn max_articles(&self) -> usize {
        self.max_articles
    }

    /// Insert an article unless its identity key is already stored.
    /// Returns whether a row was written.
    pub async fn save_article(&self, article: &Article) -> Result<bool> {
        let verdict = article.verdict.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO articles (link, title, summary, source, origin, collected_at, urgency, confidence, verdict)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (link) DO NOTHING
            "#,
        )
        .bind(&article.link)
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&article.source)
        .bind(article.origin.as_str())
        .bind(article.collected_at)
        .bind(article.urgency.as_str())
        .bind(article.confidence as i64)
        .bind(verdict)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Article already stored: {}", article.link);
            return Ok(false);
        }

        self.prune().await?;
        Ok(true)
    }

    /// Keep only the newest `max_articles` rows by insertion order.
    pub async fn prune(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM articles
            WHERE id NOT IN (SELECT id FROM articles ORDER BY id DESC LIMIT ?)
            "#,
        )
        .bind(self.max_articles as i64)
        .execute(&self.db)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!("Pruned {} old article(s)", removed);
        }
        Ok(removed)
    }

    pub async fn contains(&self, link: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM articles WHERE link = ?")
            .bind(link)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    pub async fn count_articles(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM articles").fetch_one(&self.db).await?;
        Ok(row.try_get("n")?)
    }

    /// Most recently collected first.
    pub async fn get_recent(&self, limit: usize) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT link, title, summary, source, origin, collected_at, urgency, confidence, verdict
            FROM articles
            ORDER BY collected_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_article).collect()
    }

    /// Case-insensitive substring search over title, summary and source.
    pub async fn search_articles(&self, query: &str, limit: usize) -> Result<Vec<Article>> {
        let needle = query.trim().to_lowercase();
        let articles = self.get_recent(self.max_articles.max(limit)).await?;
        Ok(articles
            .into_iter()
            .filter(|a| {
                needle.is_empty()
                    || a.title.to_lowercase().contains(&needle)
                    || a.summary.to_lowercase().contains(&needle)
                    || a.source.to_lowercase().contains(&needle)
            })
            .take(limit)
            .collect())
    }

    /// Articles collected on `date` (UTC), split by urgency.
    pub async fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let Some(start) = date.and_hms_opt(0, 0, 0).map(|t| t.and_utc()) else {
            return Ok(DailySummary::default());
        };
        let end = start + chrono::Duration::days(1);

        let rows = sqlx::query(
            r#"
            SELECT urgency, COUNT(*) AS n FROM articles
            WHERE collected_at >= ? AND collected_at < ?
            GROUP BY urgency
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;

        let mut summary = DailySummary::default();
        for row in rows {
            let label: String = row.try_get("urgency")?;
            let count: i64 = row.try_get("n")?;
            summary.total += count;
            match label.parse::<Urgency>() {
                Ok(Urgency::High) => summary.high += count,
                Ok(Urgency::Medium) => summary.medium += count,
                Ok(Urgency::Low) => summary.low += count,
                Err(_) => warn!("Unknown urgency label in store: {}", label),
            }
        }
        Ok(summary)
    }

    pub async fn save_feedback(&self, title: &str, summary: &str, relevant: bool) -> Result<bool> {
        let result = sqlx::query("INSERT INTO feedback (title, summary, relevant, created_at) VALUES (?, ?, ?, ?)")
            .bind(title)
            .bind(summary)
            .bind(relevant)
            .bind(Utc::now())
            .execute(&self.db)
            .await?;
        info!("Recorded feedback (relevant={}) for: {}", relevant, title);
        Ok(result.rows_affected() == 1)
    }

    /// The whole feedback log in insertion order.
    pub async fn all_feedback(&self) -> Result<Vec<FeedbackRecord>> {
        let rows = sqlx::query("SELECT title, summary, relevant, created_at FROM feedback ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(FeedbackRecord {
                    title: row.try_get("title")?,
                    summary: row.try_get("summary")?,
                    relevant: row.try_get("relevant")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn feedback_stats(&self) -> Result<FeedbackStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN relevant THEN 1 ELSE 0 END), 0) AS relevant_count
            FROM feedback
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let total: i64 = row.try_get("total")?;
        let relevant_count: i64 = row.try_get("relevant_count")?;
        Ok(FeedbackStats {
            total,
            relevant_count,
            irrelevant_count: total - relevant_count,
        })
    }
}

fn row_to_article(row: &SqliteRow) -> Result<Article> {
    let origin: String = row.try_get("origin")?;
    let urgency: String = row.try_get("urgency")?;
    let confidence: i64 = row.try_get("confidence")?;
    let verdict: Option<String> = row.try_get("verdict")?;
    let collected_at: DateTime<Utc> = row.try_get("collected_at")?;

    Ok(Article {
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        summary: row.try_get("summary")?,
        source: row.try_get("source")?,
        origin: origin.parse::<ArticleOrigin>()?,
        collected_at,
        urgency: urgency.parse()?,
        confidence: confidence.clamp(0, 100) as u8,
        verdict: verdict.map(|v| serde_json::from_str::<Verdict>(&v)).transpose()?,
    })
}
