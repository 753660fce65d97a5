use crate::types::{FetchConfig, NewsError, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Validators from a previous response, sent back as conditional headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    /// `None` when the server answered 304 Not Modified.
    pub content: Option<String>,
    pub validators: CacheValidators,
    pub response_time_ms: u64,
}

impl FetchedPage {
    pub fn not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }
}

/// HTTP GET with retries, per-host spacing and a response size cap.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
    min_host_interval: Duration,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
            min_host_interval: Duration::from_secs(1),
        })
    }

    pub fn with_host_interval(mut self, interval: Duration) -> Self {
        self.min_host_interval = interval;
        self
    }

    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let initial = Duration::from_secs(self.config.retry_delay_seconds);
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            max_interval: initial * 32,
            multiplier: 2.0,
            max_elapsed_time: Some(initial * 60),
            ..Default::default()
        }
    }

    /// Fetch `url`, retrying transport errors and non-success statuses with
    /// exponential backoff. Fails once the retries are spent.
    pub async fn fetch(&self, url: &str, validators: Option<&CacheValidators>) -> Result<FetchedPage> {
        let start_time = Instant::now();
        debug!("Fetching {}", url);

        self.apply_rate_limit(url).await?;

        let mut backoff = self.backoff();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.send(url, validators).await {
                Ok(response) => {
                    let status = response.status();
                    let response_time_ms = start_time.elapsed().as_millis() as u64;

                    if status == StatusCode::NOT_MODIFIED {
                        debug!("Not modified: {}", url);
                        return Ok(FetchedPage {
                            url: url.to_string(),
                            status: status.as_u16(),
                            content: None,
                            validators: validators.cloned().unwrap_or_default(),
                            response_time_ms,
                        });
                    }

                    if status.is_success() {
                        return self.read_body(url, response, response_time_ms).await;
                    }

                    last_error = Some(NewsError::General(format!(
                        "HTTP {}: {}",
                        status,
                        status.canonical_reason().unwrap_or("Unknown")
                    )));
                }
                Err(e) => last_error = Some(e),
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            break;
        }

        error!("Failed to fetch {} after {} attempts", url, self.config.max_retries + 1);
        Err(last_error.unwrap_or_else(|| NewsError::General(format!("fetch failed: {}", url))))
    }

    async fn read_body(&self, url: &str, response: Response, response_time_ms: u64) -> Result<FetchedPage> {
        let status = response.status().as_u16();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let validators = CacheValidators {
            etag: header("etag"),
            last_modified: header("last-modified"),
        };

        let max_bytes = self.config.max_page_size_mb * 1024 * 1024;
        if let Some(length) = response.content_length() {
            if length as usize > max_bytes {
                return Err(NewsError::General(format!(
                    "{} is too large: {}MB",
                    url,
                    length as usize / (1024 * 1024)
                )));
            }
        }

        let content = response.text().await?;
        if content.len() > max_bytes {
            return Err(NewsError::General(format!("{} exceeded the size cap", url)));
        }

        info!("Fetched {} ({} bytes)", url, content.len());
        Ok(FetchedPage {
            url: url.to_string(),
            status,
            content: Some(content),
            validators,
            response_time_ms,
        })
    }

    async fn send(&self, url: &str, validators: Option<&CacheValidators>) -> Result<Response> {
        let mut request = self.client.get(url);

        if let Some(v) = validators {
            if let Some(etag) = &v.etag {
                request = request.header("If-None-Match", etag);
            }
            if let Some(last_modified) = &v.last_modified {
                request = request.header("If-Modified-Since", last_modified);
            }
        }

        Ok(request.send().await?)
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();

        let mut rate_limiter = self.rate_limiter.write().await;
        let now = Instant::now();
        if let Some(last_request) = rate_limiter.get(&host) {
            let elapsed = now.duration_since(*last_request);
            if elapsed < self.min_host_interval {
                let wait_time = self.min_host_interval - elapsed;
                debug!("Rate limiting {}: waiting {:?}", host, wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        rate_limiter.insert(host, Instant::now());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_urls_before_sending() {
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher.fetch("not a url", None).await.unwrap_err();
        assert!(matches!(err, NewsError::InvalidUrl(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_requests_to_the_same_host() {
        let fetcher = Fetcher::new(FetchConfig::default())
            .unwrap()
            .with_host_interval(Duration::from_secs(2));
        let start = Instant::now();
        fetcher.apply_rate_limit("https://www.gov.br/antaq/a").await.unwrap();
        fetcher.apply_rate_limit("https://www.gov.br/antaq/b").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));

        let before = Instant::now();
        fetcher.apply_rate_limit("https://portosenavios.com.br/").await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
