//! Feedback-trained text classifier used as a fast pre-AI filter.
//!
//! Features are TF-IDF weights over a bounded lexical vocabulary; the model is
//! a binary logistic regression fitted with batch gradient descent. The whole
//! artifact is serialized as JSON and fully replaced on every retrain.

use crate::types::{FeedbackRecord, NewsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const MIN_TRAINING_RECORDS: usize = 5;
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub min_records: usize,
    pub max_features: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_records: MIN_TRAINING_RECORDS,
            max_features: 1000,
            epochs: 400,
            learning_rate: 1.0,
            l2: 0.001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierModel {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
    weights: Vec<f64>,
    bias: f64,
    pub trained_on: usize,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub relevant: bool,
    /// Probability of the relevant class.
    pub probability: f64,
}

impl Prediction {
    pub fn accepted(&self, threshold: f64) -> bool {
        self.relevant && self.probability > threshold
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "o", "as", "os", "de", "da", "do", "das", "dos", "e", "em", "no", "na", "nos", "nas",
    "um", "uma", "para", "por", "com", "que", "se", "ao", "à", "é", "the", "and", "or", "of",
    "to", "in", "on", "for", "with", "is", "are", "was", "an", "by", "at",
];

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Sparse, L2-normalised TF-IDF vector as (feature index, weight) pairs.
fn vectorize(vocabulary: &BTreeMap<String, usize>, idf: &[f64], text: &str) -> Vec<(usize, f64)> {
    let mut counts: HashMap<usize, f64> = HashMap::new();
    for token in tokenize(text) {
        if let Some(&idx) = vocabulary.get(&token) {
            *counts.entry(idx).or_insert(0.0) += 1.0;
        }
    }
    let mut features: Vec<(usize, f64)> = counts
        .into_iter()
        .filter_map(|(idx, tf)| idf.get(idx).map(|w| (idx, tf * w)))
        .collect();
    let norm = features.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, v) in features.iter_mut() {
            *v /= norm;
        }
    }
    features.sort_by_key(|(idx, _)| *idx);
    features
}

impl ClassifierModel {
    /// Fit a model on the feedback log. Returns `None` when there are fewer
    /// than `config.min_records` records or only one label is present.
    pub fn train(records: &[FeedbackRecord], config: &TrainingConfig) -> Option<Self> {
        if records.len() < config.min_records {
            info!(
                "Not enough feedback to train classifier ({} < {})",
                records.len(),
                config.min_records
            );
            return None;
        }
        let positives = records.iter().filter(|r| r.relevant).count();
        if positives == 0 || positives == records.len() {
            warn!("Feedback log has a single label; classifier not trained");
            return None;
        }

        let documents: Vec<Vec<String>> = records.iter().map(|r| tokenize(&r.text())).collect();

        // Document frequencies, then keep the most frequent terms.
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &documents {
            let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }
        let mut terms: Vec<(&str, usize)> = doc_freq.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        terms.truncate(config.max_features);
        terms.sort_by(|a, b| a.0.cmp(b.0));

        let n_docs = documents.len() as f64;
        let mut vocabulary = BTreeMap::new();
        let mut idf = Vec::with_capacity(terms.len());
        for (idx, (term, df)) in terms.iter().enumerate() {
            vocabulary.insert(term.to_string(), idx);
            idf.push(((1.0 + n_docs) / (1.0 + *df as f64)).ln() + 1.0);
        }

        let samples: Vec<(Vec<(usize, f64)>, f64)> = records
            .iter()
            .map(|r| {
                let x = vectorize(&vocabulary, &idf, &r.text());
                (x, if r.relevant { 1.0 } else { 0.0 })
            })
            .collect();

        let mut weights = vec![0.0; vocabulary.len()];
        let mut bias = 0.0;
        for _ in 0..config.epochs {
            let mut grad_w = vec![0.0; weights.len()];
            let mut grad_b = 0.0;
            for (x, y) in &samples {
                let z = bias + x.iter().map(|(i, v)| weights[*i] * v).sum::<f64>();
                let err = sigmoid(z) - y;
                for (i, v) in x {
                    grad_w[*i] += err * v;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(grad_w) {
                *w -= config.learning_rate * (g / n_docs + config.l2 * *w);
            }
            bias -= config.learning_rate * grad_b / n_docs;
        }

        info!(
            "Trained classifier on {} feedback records ({} features)",
            records.len(),
            vocabulary.len()
        );

        Some(Self {
            vocabulary,
            idf,
            weights,
            bias,
            trained_on: records.len(),
            trained_at: Utc::now(),
        })
    }

    pub fn predict(&self, text: &str) -> Prediction {
        let x = vectorize(&self.vocabulary, &self.idf, text);
        let z = self.bias
            + x.iter()
                .map(|(i, v)| self.weights.get(*i).copied().unwrap_or(0.0) * v)
                .sum::<f64>();
        let probability = sigmoid(z);
        Prediction {
            relevant: probability >= 0.5,
            probability,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.vocabulary.len()
    }

    /// Vocabulary, idf and weights must describe the same feature space.
    fn validate(&self) -> Result<()> {
        let n = self.vocabulary.len();
        if self.idf.len() != n || self.weights.len() != n {
            return Err(NewsError::Parse(format!(
                "classifier artifact is inconsistent: {} terms, {} idf values, {} weights",
                n,
                self.idf.len(),
                self.weights.len()
            )));
        }
        if let Some((term, idx)) = self.vocabulary.iter().find(|(_, idx)| **idx >= n) {
            return Err(NewsError::Parse(format!(
                "classifier artifact maps {:?} to feature {} of {}",
                term, idx, n
            )));
        }
        let mut values = self.idf.iter().chain(&self.weights).chain(std::iter::once(&self.bias));
        if values.any(|v| !v.is_finite()) {
            return Err(NewsError::Parse("classifier artifact has non-finite values".to_string()));
        }
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let model: Self = serde_json::from_slice(&bytes)?;
                model.validate()?;
                Ok(Some(model))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file and rename over the previous artifact.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(self)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Outcome of the classifier stage for one article.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifierDecision {
    /// No model trained yet; the stage does not block.
    PassThrough,
    Accepted(Prediction),
    Rejected(Prediction),
}

/// Holds the current model and its on-disk location.
pub struct RelevanceClassifier {
    model: RwLock<Option<ClassifierModel>>,
    model_path: Option<PathBuf>,
    training: TrainingConfig,
    accept_threshold: f64,
}

impl RelevanceClassifier {
    /// Classifier without durable storage. Used by tests and dry runs.
    pub fn in_memory(training: TrainingConfig, accept_threshold: f64) -> Self {
        Self {
            model: RwLock::new(None),
            model_path: None,
            training,
            accept_threshold,
        }
    }

    /// Reload the previously trained model from `path`, if any.
    pub async fn open(path: impl Into<PathBuf>, training: TrainingConfig, accept_threshold: f64) -> Result<Self> {
        let path = path.into();
        let model = match ClassifierModel::load(&path).await {
            Ok(model) => {
                if let Some(ref m) = model {
                    info!("Loaded classifier trained on {} records from {}", m.trained_on, path.display());
                }
                model
            }
            Err(e) => {
                warn!("Ignoring unreadable classifier at {}: {}", path.display(), e);
                None
            }
        };
        Ok(Self {
            model: RwLock::new(model),
            model_path: Some(path),
            training,
            accept_threshold,
        })
    }

    pub fn min_records(&self) -> usize {
        self.training.min_records
    }

    pub async fn is_trained(&self) -> bool {
        self.model.read().await.is_some()
    }

    pub async fn predict(&self, text: &str) -> Option<Prediction> {
        self.model.read().await.as_ref().map(|m| m.predict(text))
    }

    pub async fn decide(&self, text: &str) -> ClassifierDecision {
        match self.predict(text).await {
            None => ClassifierDecision::PassThrough,
            Some(p) if p.accepted(self.accept_threshold) => ClassifierDecision::Accepted(p),
            Some(p) => ClassifierDecision::Rejected(p),
        }
    }

    /// Retrain from the full feedback log and replace the current model.
    /// Returns whether a model was produced. With too little data the
    /// previous model, if any, is kept.
    pub async fn retrain(&self, records: &[FeedbackRecord]) -> Result<bool> {
        let Some(model) = ClassifierModel::train(records, &self.training) else {
            return Ok(false);
        };
        if let Some(ref path) = self.model_path {
            model.save(path).await?;
            debug!("Saved classifier to {}", path.display());
        }
        *self.model.write().await = Some(model);
        Ok(true)
    }
}
