use crate::classifier::{ClassifierDecision, RelevanceClassifier};
use crate::judge::RelevanceJudge;
use crate::keywords::KeywordFilter;
use crate::types::{Article, RawArticle, Urgency, Verdict};
use crate::utils::text::{clean_summary, collapse_whitespace};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

const MIN_SUMMARY_CHARS: usize = 20;

/// Normalise a collected item before it is filtered.
pub fn preprocess(raw: RawArticle) -> RawArticle {
    let title = collapse_whitespace(&raw.title);
    let title = if title.is_empty() { "No Title".to_string() } else { title };

    let summary = clean_summary(&raw.summary);
    let summary = if summary.chars().count() < MIN_SUMMARY_CHARS {
        title.clone()
    } else {
        summary
    };

    let source = collapse_whitespace(&raw.source);
    let source = if source.is_empty() { "Unknown".to_string() } else { source };

    RawArticle {
        title,
        link: raw.link.trim().to_string(),
        summary,
        source,
        origin: raw.origin,
    }
}

/// An article moving through the filter stages, with what each stage
/// learned about it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub raw: RawArticle,
    pub identity_key: String,
    pub keyword_score: Option<i32>,
    pub classifier_probability: Option<f64>,
    pub verdict: Option<Verdict>,
}

impl Candidate {
    pub fn new(raw: RawArticle, collected_at: DateTime<Utc>) -> Self {
        let identity_key = raw.identity_key(collected_at.date_naive());
        Self {
            raw,
            identity_key,
            keyword_score: None,
            classifier_probability: None,
            verdict: None,
        }
    }

    /// Without a verdict the article is stored with neutral defaults.
    pub fn into_article(self, collected_at: DateTime<Utc>) -> Article {
        let (urgency, confidence) = match &self.verdict {
            Some(v) => (v.urgency, v.confidence),
            None => (Urgency::Low, 50),
        };
        Article {
            title: self.raw.title,
            link: self.identity_key,
            summary: self.raw.summary,
            source: self.raw.source,
            origin: self.raw.origin,
            collected_at,
            urgency,
            confidence,
            verdict: self.verdict,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageDecision {
    Accept,
    Reject(String),
}

/// One gate in the relevance pipeline.
#[async_trait]
pub trait FilterStage: Send + Sync {
    fn stage_name(&self) -> String;

    async fn evaluate(&self, candidate: &mut Candidate) -> StageDecision;
}

pub struct KeywordStage {
    filter: KeywordFilter,
}

impl KeywordStage {
    pub fn new(filter: KeywordFilter) -> Self {
        Self { filter }
    }
}

#[async_trait]
impl FilterStage for KeywordStage {
    fn stage_name(&self) -> String {
        "keywords".to_string()
    }

    async fn evaluate(&self, candidate: &mut Candidate) -> StageDecision {
        let score = self.filter.score(&candidate.raw.title, &candidate.raw.summary);
        candidate.keyword_score = Some(score);
        if score >= self.filter.threshold() {
            StageDecision::Accept
        } else {
            StageDecision::Reject(format!("keyword score {} below {}", score, self.filter.threshold()))
        }
    }
}

pub struct ClassifierStage {
    classifier: Arc<RelevanceClassifier>,
}

impl ClassifierStage {
    pub fn new(classifier: Arc<RelevanceClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl FilterStage for ClassifierStage {
    fn stage_name(&self) -> String {
        "classifier".to_string()
    }

    async fn evaluate(&self, candidate: &mut Candidate) -> StageDecision {
        match self.classifier.decide(&candidate.raw.combined_text()).await {
            ClassifierDecision::PassThrough => StageDecision::Accept,
            ClassifierDecision::Accepted(p) => {
                candidate.classifier_probability = Some(p.probability);
                StageDecision::Accept
            }
            ClassifierDecision::Rejected(p) => {
                candidate.classifier_probability = Some(p.probability);
                StageDecision::Reject(format!("classifier probability {:.2}", p.probability))
            }
        }
    }
}

pub struct JudgeStage {
    judge: Arc<RelevanceJudge>,
}

impl JudgeStage {
    pub fn new(judge: Arc<RelevanceJudge>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl FilterStage for JudgeStage {
    fn stage_name(&self) -> String {
        "judge".to_string()
    }

    async fn evaluate(&self, candidate: &mut Candidate) -> StageDecision {
        if !self.judge.has_backends() {
            debug!("No judge backend configured, skipping");
            return StageDecision::Accept;
        }
        let verdict = self.judge.judge(&candidate.raw.title, &candidate.raw.summary).await;
        let decision = if verdict.relevant {
            StageDecision::Accept
        } else {
            StageDecision::Reject(format!("judge: {}", verdict.reason))
        };
        candidate.verdict = Some(verdict);
        decision
    }
}
