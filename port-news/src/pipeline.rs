use crate::classifier::{RelevanceClassifier, TrainingConfig, DEFAULT_ACCEPT_THRESHOLD};
use crate::collector::{Collector, RssCollector, ScrapeCollector};
use crate::config::AppConfig;
use crate::digest::DigestGenerator;
use crate::fetcher::Fetcher;
use crate::judge::RelevanceJudge;
use crate::keywords::KeywordFilter;
use crate::llm_adapter::{LlmBackend, LlmBackendRegistry};
use crate::processing::{preprocess, Candidate, ClassifierStage, FilterStage, JudgeStage, KeywordStage, StageDecision};
use crate::sources::{default_rss_feeds, default_scrape_sites};
use crate::store::ArticleStore;
use crate::types::{NewsError, RawArticle, Result};
use crate::utils::text::preview;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rejection bucket for linkless items that have no title to key on.
pub const UNTITLED: &str = "untitled";

/// What one pipeline run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub collected: usize,
    /// Repeated within the batch or already stored.
    pub duplicates: usize,
    /// Rejections keyed by stage name.
    pub rejected: BTreeMap<String, usize>,
    pub persisted: usize,
    pub store_errors: usize,
}

impl RunReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            collected: 0,
            duplicates: 0,
            rejected: BTreeMap::new(),
            persisted: 0,
            store_errors: 0,
        }
    }

    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedbackOutcome {
    pub saved: bool,
    pub retrained: bool,
}

/// Collect, filter, persist and summarise maritime news.
pub struct Pipeline {
    collectors: Vec<Box<dyn Collector>>,
    stages: Vec<Box<dyn FilterStage>>,
    store: ArticleStore,
    classifier: Arc<RelevanceClassifier>,
    digest: DigestGenerator,
    run_guard: Mutex<()>,
}

impl Pipeline {
    pub fn store(&self) -> &ArticleStore {
        &self.store
    }

    pub fn classifier(&self) -> &Arc<RelevanceClassifier> {
        &self.classifier
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.stage_name()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.run_guard.try_lock().is_err()
    }

    /// One full run. Fails with `AlreadyRunning` if another run is in
    /// progress; otherwise only individual articles can fail, and those are
    /// counted in the report.
    pub async fn run(&self) -> Result<RunReport> {
        let _guard = self.run_guard.try_lock().map_err(|_| NewsError::AlreadyRunning)?;
        let mut report = RunReport::new();
        info!("Pipeline run {} started", report.run_id);

        let mut raw = Vec::new();
        for collector in &self.collectors {
            match collector.collect().await {
                Ok(mut found) => {
                    debug!("Collector {} returned {} items", collector.name(), found.len());
                    raw.append(&mut found);
                }
                Err(e) => warn!("Collector {} failed: {}", collector.name(), e),
            }
        }
        report.collected = raw.len();

        self.process_batch(raw, &mut report).await;

        info!(
            "Pipeline run {} finished: {} collected, {} duplicates, {} rejected, {} persisted, {} store errors",
            report.run_id,
            report.collected,
            report.duplicates,
            report.total_rejected(),
            report.persisted,
            report.store_errors
        );
        Ok(report)
    }

    async fn process_batch(&self, raw: Vec<RawArticle>, report: &mut RunReport) {
        let collected_at = Utc::now();
        let mut seen = HashSet::new();

        for item in raw {
            // Without a link the title is the identity; untitled items would all collide.
            if item.link.trim().is_empty() && item.title.trim().is_empty() {
                debug!("Dropping linkless item without a title from {}", item.source);
                *report.rejected.entry(UNTITLED.to_string()).or_insert(0) += 1;
                continue;
            }
            let mut candidate = Candidate::new(preprocess(item), collected_at);

            if !seen.insert(candidate.identity_key.clone()) {
                report.duplicates += 1;
                continue;
            }
            match self.store.contains(&candidate.identity_key).await {
                Ok(true) => {
                    report.duplicates += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!("Could not check store for {}: {}", candidate.identity_key, e),
            }

            if let Some((stage, reason)) = self.first_rejection(&mut candidate).await {
                debug!("Rejected by {} ({}): {}", stage, reason, preview(&candidate.raw.title, 80));
                *report.rejected.entry(stage).or_insert(0) += 1;
                continue;
            }

            let article = candidate.into_article(collected_at);
            match self.store.save_article(&article).await {
                Ok(true) => {
                    info!("Approved [{}] {}", article.urgency, preview(&article.title, 80));
                    report.persisted += 1;
                }
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    error!("Failed to store {}: {}", article.link, e);
                    report.store_errors += 1;
                }
            }
        }
    }

    async fn first_rejection(&self, candidate: &mut Candidate) -> Option<(String, String)> {
        for stage in &self.stages {
            if let StageDecision::Reject(reason) = stage.evaluate(candidate).await {
                return Some((stage.stage_name(), reason));
            }
        }
        None
    }

    /// Record a reviewer's verdict and retrain once enough feedback exists.
    pub async fn submit_feedback(&self, title: &str, summary: &str, relevant: bool) -> Result<FeedbackOutcome> {
        let saved = self.store.save_feedback(title, summary, relevant).await?;
        let stats = self.store.feedback_stats().await?;

        let retrained = if stats.total >= self.classifier.min_records() as i64 {
            match self.retrain().await {
                Ok(done) => done,
                Err(e) => {
                    error!("Classifier retraining failed: {}", e);
                    false
                }
            }
        } else {
            debug!("{} feedback records, classifier needs {}", stats.total, self.classifier.min_records());
            false
        };

        Ok(FeedbackOutcome { saved, retrained })
    }

    pub async fn retrain(&self) -> Result<bool> {
        let records = self.store.all_feedback().await?;
        self.classifier.retrain(&records).await
    }

    /// Digest text for the `limit` most recent articles.
    pub async fn digest(&self, limit: usize) -> Result<String> {
        let articles = self.store.get_recent(limit).await?;
        Ok(self.digest.generate(&articles).await)
    }

    pub async fn write_digest(&self, limit: usize, dir: &Path) -> Result<PathBuf> {
        let text = self.digest(limit).await?;
        DigestGenerator::write(dir, Local::now().date_naive(), &text).await
    }
}

/// Assembles a [`Pipeline`]. Stages always run in the order keyword,
/// classifier, judge; the judge stage is only added when a judge is set.
pub struct PipelineBuilder {
    store: ArticleStore,
    collectors: Vec<Box<dyn Collector>>,
    keywords: KeywordFilter,
    classifier: Option<Arc<RelevanceClassifier>>,
    judge: Option<Arc<RelevanceJudge>>,
    digest_backend: Option<Arc<dyn LlmBackend>>,
}

impl PipelineBuilder {
    pub fn new(store: ArticleStore) -> Self {
        Self {
            store,
            collectors: Vec::new(),
            keywords: KeywordFilter::default(),
            classifier: None,
            judge: None,
            digest_backend: None,
        }
    }

    /// Everything wired from configuration: SQLite store, persisted
    /// classifier, AI backends with credentials, default RSS and scrape
    /// sources.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        info!("Connecting to database: {}", config.redacted_database_url());
        let store = ArticleStore::connect(&config.database_url, config.max_articles).await?;

        let training = TrainingConfig {
            min_records: config.min_feedback_records,
            ..TrainingConfig::default()
        };
        let classifier = RelevanceClassifier::open(&config.model_path, training, config.classifier_threshold).await?;

        let registry = LlmBackendRegistry::from_config(config)?;
        let judge = RelevanceJudge::from_registry(&registry, config.judge_fallback);

        let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);

        Ok(Self::new(store)
            .with_collector(Box::new(RssCollector::new(fetcher.clone(), default_rss_feeds())))
            .with_collector(Box::new(ScrapeCollector::new(fetcher, default_scrape_sites())))
            .with_keyword_filter(KeywordFilter::default().with_threshold(config.keyword_threshold))
            .with_classifier(Arc::new(classifier))
            .with_judge(Arc::new(judge))
            .with_digest_backend(registry.default_backend()))
    }

    pub fn with_collector(mut self, collector: Box<dyn Collector>) -> Self {
        info!("Adding collector to pipeline: {}", collector.name());
        self.collectors.push(collector);
        self
    }

    /// Drop the collectors configured so far.
    pub fn clear_collectors(mut self) -> Self {
        self.collectors.clear();
        self
    }

    pub fn with_keyword_filter(mut self, filter: KeywordFilter) -> Self {
        self.keywords = filter;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<RelevanceClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_judge(mut self, judge: Arc<RelevanceJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_digest_backend(mut self, backend: Option<Arc<dyn LlmBackend>>) -> Self {
        self.digest_backend = backend;
        self
    }

    pub fn build(self) -> Pipeline {
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(RelevanceClassifier::in_memory(TrainingConfig::default(), DEFAULT_ACCEPT_THRESHOLD)));

        let mut stages: Vec<Box<dyn FilterStage>> = vec![
            Box::new(KeywordStage::new(self.keywords)),
            Box::new(ClassifierStage::new(classifier.clone())),
        ];
        if let Some(judge) = self.judge {
            stages.push(Box::new(JudgeStage::new(judge)));
        }

        Pipeline {
            collectors: self.collectors,
            stages,
            store: self.store,
            classifier,
            digest: DigestGenerator::new(self.digest_backend),
            run_guard: Mutex::new(()),
        }
    }
}
