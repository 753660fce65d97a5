//! Cheap keyword scoring that runs before any classifier or AI call.

use tracing::debug;

/// Place names, regulators, ports and marine-insurance terms for the
/// North/Northeast port business.
pub const DEFAULT_POSITIVE: &[&str] = &[
    "brasil",
    "brasileiro",
    "portos brasileiros",
    "são luís",
    "fortaleza",
    "macapá",
    "belém",
    "manaus",
    "recife",
    "salvador",
    "natal",
    "maranhão",
    "ceará",
    "amapá",
    "pará",
    "pernambuco",
    "bahia",
    "norte",
    "nordeste",
    "antaq",
    "marinha do brasil",
    "capitania dos portos",
    "ministério dos transportes",
    "porto de itaqui",
    "itaqui",
    "porto do pecém",
    "pecém",
    "porto de suape",
    "suape",
    "vila do conde",
    "navio brasileiro",
    "carga marítima",
    "seguro marítimo",
    "sinistro naval",
    "avaria",
    "p&i",
    "regulamentação portuária",
    "despacho aduaneiro",
    "taxa portuária",
    "alfândega",
    "cabotagem",
    "offshore",
    "hidrovia",
    "praticagem",
];

/// Tourism, international and entertainment terms.
pub const DEFAULT_NEGATIVE: &[&str] = &[
    "global",
    "internacional",
    "eua",
    "china",
    "europa",
    "histórico",
    "antigo",
    "turismo",
    "cruzeiro",
    "pesca esportiva",
    "entretenimento",
    "show",
    "festival",
];

pub const DEFAULT_THRESHOLD: i32 = 2;

#[derive(Debug, Clone)]
pub struct KeywordFilter {
    positive: Vec<String>,
    negative: Vec<String>,
    threshold: i32,
}

impl KeywordFilter {
    pub fn new<P, N>(positive: P, negative: N, threshold: i32) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        Self {
            positive: positive.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
            negative: negative.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
            threshold,
        }
    }

    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Number of positive keywords present, minus twice the number of
    /// negative keywords present. Matching is a case-insensitive substring
    /// test; each keyword counts at most once.
    pub fn score(&self, title: &str, summary: &str) -> i32 {
        let text = format!("{} {}", title, summary).to_lowercase();
        let positive = self.positive.iter().filter(|kw| text.contains(kw.as_str())).count() as i32;
        let negative = self.negative.iter().filter(|kw| text.contains(kw.as_str())).count() as i32;
        positive - 2 * negative
    }

    pub fn passes(&self, title: &str, summary: &str) -> bool {
        let score = self.score(title, summary);
        debug!("Keyword score {} (threshold {})", score, self.threshold);
        score >= self.threshold
    }
}

impl Default for KeywordFilter {
    fn default() -> Self {
        Self::new(DEFAULT_POSITIVE, DEFAULT_NEGATIVE, DEFAULT_THRESHOLD)
    }
}
