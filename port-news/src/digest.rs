use crate::llm_adapter::LlmBackend;
use crate::types::{Article, ArticleOrigin, Result};
use chrono::{Local, NaiveDate};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

pub const NOTHING_TO_REPORT: &str = "📭 SEM NOTÍCIAS RELEVANTES HOJE - Nada a reportar para o Norte/Nordeste";

const EXPERT_PROFILE: &str = r#"VOCÊ É ESPECIALISTA EM CIRCULARES DA BRAZMAR MARINE SERVICES

PERFIL:
- Apoio marítimo e portuário exclusivamente no Norte/Nordeste
- Portos: Itaqui (MA), Pecém (CE), Suape (PE), São Luís, Fortaleza
- Clientes: seguradoras em Londres, trading companies em Xangai, investidores em Nova York

FOCO:
- Apenas operações nos portos do Norte/Nordeste
- Apenas impactos operacionais reais
- Linguagem profissional para executivos"#;

/// Most urgent first, newest first within the same urgency.
fn ordered(articles: &[Article]) -> Vec<&Article> {
    let mut sorted: Vec<&Article> = articles.iter().collect();
    sorted.sort_by(|a, b| b.urgency.cmp(&a.urgency).then_with(|| b.collected_at.cmp(&a.collected_at)));
    sorted
}

pub fn build_prompt(articles: &[Article], date: NaiveDate) -> String {
    let discovered = articles.iter().filter(|a| a.origin == ArticleOrigin::Discovered).count();
    let traditional = articles.len() - discovered;

    let listing: Vec<_> = ordered(articles)
        .into_iter()
        .map(|a| {
            json!({
                "titulo": a.title,
                "resumo": a.summary,
                "fonte": a.source,
                "link": if a.origin == ArticleOrigin::Discovered { "" } else { a.link.as_str() },
                "urgencia": a.urgency.as_str(),
                "confianca": a.confidence,
            })
        })
        .collect();
    let listing = serde_json::to_string_pretty(&listing).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"{profile}

RESUMO DAS NOTÍCIAS:
- Notícias encontradas ativamente: {discovered}
- Notícias de fontes tradicionais: {traditional}
- Total: {total} notícias relevantes

NOTÍCIAS RELEVANTES DO DIA:
{listing}

CRIE UMA CIRCULAR PROFISSIONAL:

BRAZMAR MARINE SERVICES - CIRCULAR DIÁRIA
Data: {date}
Fontes: {discovered} buscas ativas + {traditional} fontes tradicionais

RESUMO EXECUTIVO:
[Os 3 pontos mais importantes do dia]

IMPACTOS OPERACIONAIS:
• [Impactos reais nas operações]

RECOMENDAÇÕES PARA CLIENTES:
• [Ações práticas para seguradoras e trading companies]

DESTAQUES POR PORTO/REGIÃO:
[Resumo organizado por localização]

ALERTAS E RISCOS:
• [Riscos específicos identificados]

Use linguagem concisa e profissional, com foco em informação acionável."#,
        profile = EXPERT_PROFILE,
        discovered = discovered,
        traditional = traditional,
        total = articles.len(),
        listing = listing,
        date = date.format("%d/%m/%Y"),
    )
}

/// Plain listing used when no text-generation backend is configured.
pub fn render_plain(articles: &[Article], date: NaiveDate) -> String {
    let mut out = format!("BRAZMAR MARINE SERVICES - CIRCULAR DIÁRIA\nData: {}\n\n", date.format("%d/%m/%Y"));
    for article in ordered(articles) {
        out.push_str(&format!("[{}] {} ({})\n", article.urgency, article.title, article.source));
        out.push_str(&format!("    {}\n", article.summary));
        if article.origin != ArticleOrigin::Discovered {
            out.push_str(&format!("    {}\n", article.link));
        }
        out.push('\n');
    }
    out
}

pub struct DigestGenerator {
    backend: Option<Arc<dyn LlmBackend>>,
}

impl DigestGenerator {
    pub fn new(backend: Option<Arc<dyn LlmBackend>>) -> Self {
        Self { backend }
    }

    /// Digest text for `articles`. The result may be an inline error
    /// message when the backend fails.
    pub async fn generate(&self, articles: &[Article]) -> String {
        if articles.is_empty() {
            return NOTHING_TO_REPORT.to_string();
        }
        let today = Local::now().date_naive();

        let Some(backend) = &self.backend else {
            return render_plain(articles, today);
        };

        info!("Generating digest for {} articles with {}", articles.len(), backend.name());
        match backend.complete(&build_prompt(articles, today)).await {
            Ok(text) => text,
            Err(e) => {
                error!("Digest generation failed: {}", e);
                format!("❌ Erro gerando circular: {}", e)
            }
        }
    }

    /// Write `text` to `digest-YYYY-MM-DD.md` in `dir`, replacing any
    /// digest already written for that date.
    pub async fn write(dir: &Path, date: NaiveDate, text: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("digest-{}.md", date.format("%Y-%m-%d")));
        tokio::fs::write(&path, text).await?;
        info!("Digest written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_adapter::{MockLlmBackend, MockReply};
    use crate::types::Urgency;
    use chrono::Utc;

    fn article(title: &str, urgency: Urgency, origin: ArticleOrigin) -> Article {
        Article {
            title: title.to_string(),
            link: format!("https://x/{}", title),
            summary: "resumo".to_string(),
            source: "x".to_string(),
            origin,
            collected_at: Utc::now(),
            urgency,
            confidence: 80,
            verdict: None,
        }
    }

    #[tokio::test]
    async fn empty_input_returns_sentinel_without_backend_call() {
        let mock = Arc::new(MockLlmBackend::replying("m", "circular"));
        let generator = DigestGenerator::new(Some(mock.clone() as Arc<dyn LlmBackend>));
        assert_eq!(generator.generate(&[]).await, NOTHING_TO_REPORT);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn backend_failure_is_inline_text() {
        let mock = Arc::new(MockLlmBackend::new("m").then(MockReply::Fail("quota".to_string())));
        let generator = DigestGenerator::new(Some(mock as Arc<dyn LlmBackend>));
        let text = generator.generate(&[article("Pecém", Urgency::High, ArticleOrigin::Feed)]).await;
        assert!(text.starts_with("❌ Erro gerando circular:"));
        assert!(text.contains("quota"));
    }

    #[test]
    fn prompt_counts_sources_and_orders_by_urgency() {
        let articles = vec![
            article("baixa", Urgency::Low, ArticleOrigin::Feed),
            article("alta", Urgency::High, ArticleOrigin::Discovered),
            article("media", Urgency::Medium, ArticleOrigin::Scrape),
        ];
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let prompt = build_prompt(&articles, date);
        assert!(prompt.contains("Notícias encontradas ativamente: 1"));
        assert!(prompt.contains("Notícias de fontes tradicionais: 2"));
        assert!(prompt.contains("Data: 04/03/2024"));
        let high = prompt.find("\"alta\"").unwrap();
        let low = prompt.find("\"baixa\"").unwrap();
        assert!(high < low);

        let plain = render_plain(&articles, date);
        assert!(plain.find("alta").unwrap() < plain.find("baixa").unwrap());
    }

    #[tokio::test]
    async fn writes_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let path = DigestGenerator::write(dir.path(), date, "circular").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "digest-2024-03-04.md");
        assert_eq!(tokio::fs::read_to_string(path).await.unwrap(), "circular");
    }
}
