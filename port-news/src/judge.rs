//! AI relevance judge with multi-backend failover.

use crate::llm_adapter::{LlmBackend, LlmBackendRegistry};
use crate::rate_limit::RateLimiter;
use crate::types::{NewsError, Urgency, Verdict};
use rand::seq::SliceRandom;
use regex::Regex;
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

/// What the judge answers when it cannot get a usable verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Let the article through: relevant, confidence 50, medium urgency.
    Permissive,
    /// Drop the article: not relevant, confidence 10, low urgency.
    Conservative,
}

impl FallbackPolicy {
    pub fn verdict(&self) -> Verdict {
        match self {
            FallbackPolicy::Permissive => Verdict {
                relevant: true,
                confidence: 50,
                reason: "Análise automática - sistema de fallback".to_string(),
                urgency: Urgency::Medium,
            },
            FallbackPolicy::Conservative => Verdict {
                relevant: false,
                confidence: 10,
                reason: "Análise indisponível - rejeitado por segurança".to_string(),
                urgency: Urgency::Low,
            },
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = NewsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "permissive" => Ok(FallbackPolicy::Permissive),
            "conservative" => Ok(FallbackPolicy::Conservative),
            other => Err(NewsError::Config(format!("unknown fallback policy: {}", other))),
        }
    }
}

pub fn build_prompt(title: &str, summary: &str) -> String {
    format!(
        r#"VOCÊ É O FILTRO DE NOTÍCIAS DA BRAZMAR MARINE SERVICES
(seguros marítimos e consultoria portuária no Norte/Nordeste do Brasil).

TÍTULO: {title}
RESUMO: {summary}

ACEITAR somente notícias sobre:
- Seguros marítimos, sinistros navais, avarias
- Portos do Norte/Nordeste (Itaqui, Pecém, Suape, Belém, Vila do Conde, Macapá, Manaus, Salvador)
- ANTAQ, Marinha do Brasil, regulamentação portuária
- Acidentes ou incidentes em portos ou navios
- Cabotagem e navegação interior

REJEITAR:
- Turismo, cruzeiros, pesca esportiva
- Notícias internacionais sem impacto no Brasil
- Entretenimento, cultura, eventos
- Portos e regiões fora do Norte/Nordeste

Responda APENAS com JSON:
{{
    "relevante": true/false,
    "confianca": 0-100,
    "motivo": "explicação curta",
    "urgencia": "BAIXA/MEDIA/ALTA"
}}"#
    )
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{[^}]*\}").expect("static regex"))
}

fn field<'a>(object: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name))
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "sim" => Some(true),
            "false" | "não" | "nao" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_confidence(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok()?,
        _ => return None,
    };
    if raw.is_finite() {
        Some(raw.round().clamp(0.0, 100.0) as u8)
    } else {
        None
    }
}

/// Extract a verdict from free-form model output.
///
/// Code fences are stripped and the first brace-delimited object is parsed.
/// `relevante` and `confianca` are required; a missing or unknown urgency
/// reads as medium. Returns `None` for anything else.
pub fn parse_verdict(response: &str) -> Option<Verdict> {
    let cleaned = response.replace("```json", "").replace("```", "");
    let candidate = json_object_pattern().find(cleaned.trim())?;
    let object: Value = serde_json::from_str(candidate.as_str()).ok()?;

    let relevant = as_bool(field(&object, &["relevante", "relevant"])?)?;
    let confidence = as_confidence(field(&object, &["confianca", "confiança", "confidence"])?)?;
    let reason = field(&object, &["motivo", "reason"])
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let urgency = field(&object, &["urgencia", "urgência", "urgency"])
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(Urgency::Medium);

    Some(Verdict {
        relevant,
        confidence,
        reason,
        urgency,
    })
}

struct BackendSlot {
    backend: Arc<dyn LlmBackend>,
    limiter: RateLimiter,
}

struct JudgeState {
    /// Indexes into `slots` that have not failed yet.
    active: Vec<usize>,
    /// Last backend that answered.
    current: Option<usize>,
}

pub struct RelevanceJudge {
    slots: Vec<BackendSlot>,
    state: Mutex<JudgeState>,
    fallback: FallbackPolicy,
}

impl RelevanceJudge {
    pub fn new(backends: Vec<Arc<dyn LlmBackend>>, fallback: FallbackPolicy) -> Self {
        let slots: Vec<BackendSlot> = backends
            .into_iter()
            .map(|backend| BackendSlot {
                limiter: RateLimiter::new(backend.rate_limit()),
                backend,
            })
            .collect();
        let active = (0..slots.len()).collect();
        info!("Relevance judge initialised with {} backend(s), {:?} fallback", slots.len(), fallback);
        Self {
            slots,
            state: Mutex::new(JudgeState { active, current: None }),
            fallback,
        }
    }

    pub fn from_registry(registry: &LlmBackendRegistry, fallback: FallbackPolicy) -> Self {
        Self::new(registry.backends().to_vec(), fallback)
    }

    /// Whether any backend was configured at all, failed or not.
    pub fn has_backends(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        self.fallback
    }

    pub fn current_backend(&self) -> Option<String> {
        let state = self.state.lock().ok()?;
        state.current.map(|idx| self.slots[idx].backend.name().to_string())
    }

    /// Names of the backends still eligible for calls.
    pub fn active_backends(&self) -> Vec<String> {
        match self.state.lock() {
            Ok(state) => state
                .active
                .iter()
                .map(|idx| self.slots[*idx].backend.name().to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// The last successful backend if it is still active, else a random one.
    fn pick(&self) -> Option<usize> {
        let state = self.state.lock().ok()?;
        if let Some(current) = state.current {
            if state.active.contains(&current) {
                return Some(current);
            }
        }
        state.active.choose(&mut rand::thread_rng()).copied()
    }

    fn retire(&self, idx: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.active.retain(|i| *i != idx);
            if state.current == Some(idx) {
                state.current = None;
            }
        }
    }

    fn mark_success(&self, idx: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.current = Some(idx);
        }
    }

    /// Judge one article. Never fails: transport errors move on to the next
    /// backend, and unparseable answers or an exhausted backend set yield
    /// the fallback verdict.
    pub async fn judge(&self, title: &str, summary: &str) -> Verdict {
        let prompt = build_prompt(title, summary);

        // Each failed iteration retires one backend, so this runs at most
        // `slots.len()` times.
        loop {
            let Some(idx) = self.pick() else {
                warn!("No AI backend available, applying {:?} fallback", self.fallback);
                return self.fallback.verdict();
            };
            let slot = &self.slots[idx];
            let name = slot.backend.name();

            slot.limiter.acquire().await;
            debug!("Judging with {}: {}", name, crate::utils::text::preview(title, 60));

            match slot.backend.complete(&prompt).await {
                Ok(text) => {
                    self.mark_success(idx);
                    return match parse_verdict(&text) {
                        Some(verdict) => verdict,
                        None => {
                            warn!(
                                "Unparseable verdict from {}, applying fallback: {}",
                                name,
                                crate::utils::text::preview(&text, 120)
                            );
                            self.fallback.verdict()
                        }
                    };
                }
                Err(e) => {
                    warn!("Backend {} failed and is removed for this process: {}", name, e);
                    self.retire(idx);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_with_noise() {
        let text = "Claro! Segue:\n```json\n{\"relevante\": true, \"confianca\": 85, \"motivo\": \"Porto de Itaqui\", \"urgencia\": \"ALTA\"}\n```\nObrigado.";
        let verdict = parse_verdict(text).unwrap();
        assert!(verdict.relevant);
        assert_eq!(verdict.confidence, 85);
        assert_eq!(verdict.urgency, Urgency::High);
        assert_eq!(verdict.reason, "Porto de Itaqui");
    }

    #[test]
    fn missing_mandatory_field_is_rejected() {
        assert!(parse_verdict(r#"{"relevante": true, "motivo": "x"}"#).is_none());
        assert!(parse_verdict(r#"{"confianca": 90}"#).is_none());
        assert!(parse_verdict("sem json aqui").is_none());
        assert!(parse_verdict("{ quebrado: }").is_none());
    }

    #[test]
    fn urgency_defaults_to_medium_and_confidence_is_clamped() {
        let verdict = parse_verdict(r#"{"relevante": "false", "confianca": 140}"#).unwrap();
        assert!(!verdict.relevant);
        assert_eq!(verdict.confidence, 100);
        assert_eq!(verdict.urgency, Urgency::Medium);
    }

    #[test]
    fn fallback_policies_are_distinct() {
        let permissive = FallbackPolicy::Permissive.verdict();
        assert!(permissive.relevant);
        assert_eq!((permissive.confidence, permissive.urgency), (50, Urgency::Medium));

        let conservative = FallbackPolicy::Conservative.verdict();
        assert!(!conservative.relevant);
        assert_eq!((conservative.confidence, conservative.urgency), (10, Urgency::Low));

        assert_eq!("Permissive".parse::<FallbackPolicy>().unwrap(), FallbackPolicy::Permissive);
        assert!("lenient".parse::<FallbackPolicy>().is_err());
    }

    #[test]
    fn prompt_carries_article_text() {
        let prompt = build_prompt("Porto do Pecém", "Nova linha de cabotagem");
        assert!(prompt.contains("TÍTULO: Porto do Pecém"));
        assert!(prompt.contains("RESUMO: Nova linha de cabotagem"));
        assert!(prompt.contains("\"relevante\""));
    }
}
