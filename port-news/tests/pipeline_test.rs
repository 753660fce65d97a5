use async_trait::async_trait;
use port_news::classifier::{RelevanceClassifier, TrainingConfig};
use port_news::collector::{Collector, StaticCollector};
use port_news::digest::NOTHING_TO_REPORT;
use port_news::judge::{FallbackPolicy, RelevanceJudge};
use port_news::llm_adapter::{LlmBackend, MockLlmBackend};
use port_news::pipeline::{Pipeline, PipelineBuilder};
use port_news::store::ArticleStore;
use port_news::types::*;
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

const ITAQUI_VERDICT: &str = r#"{"relevante": true, "confianca": 80, "urgencia": "MEDIA"}"#;

fn itaqui() -> RawArticle {
    RawArticle::new(
        "Porto de Itaqui bate recorde de movimentação",
        "https://www.portosenavios.com.br/noticias/itaqui-recorde",
        "Aumento de 15% na carga",
        "portosenavios.com.br",
    )
}

fn judge(mock: &Arc<MockLlmBackend>, policy: FallbackPolicy) -> Arc<RelevanceJudge> {
    let backend: Arc<dyn LlmBackend> = mock.clone();
    Arc::new(RelevanceJudge::new(vec![backend], policy))
}

async fn pipeline_with(articles: Vec<RawArticle>, mock: &Arc<MockLlmBackend>) -> Result<Pipeline> {
    let store = ArticleStore::in_memory(200).await?;
    Ok(PipelineBuilder::new(store)
        .with_collector(Box::new(StaticCollector::new("fixed", articles)))
        .with_judge(judge(mock, FallbackPolicy::Conservative))
        .build())
}

#[tokio::test]
async fn itaqui_article_is_approved_and_stored() -> Result<()> {
    init_tracing();
    let mock = Arc::new(MockLlmBackend::replying("stub", ITAQUI_VERDICT));
    let pipeline = pipeline_with(vec![itaqui()], &mock).await?;

    let report = pipeline.run().await?;
    assert_eq!(report.collected, 1);
    assert_eq!(report.persisted, 1);
    assert_eq!(report.total_rejected(), 0);
    assert_eq!(mock.calls(), 1);

    let recent = pipeline.store().get_recent(1).await?;
    assert_eq!(recent.len(), 1);
    let stored = &recent[0];
    assert_eq!(stored.title, "Porto de Itaqui bate recorde de movimentação");
    assert_eq!(stored.urgency, Urgency::Medium);
    assert_eq!(stored.confidence, 80);
    assert!(stored.verdict.as_ref().is_some_and(|v| v.relevant));
    Ok(())
}

#[tokio::test]
async fn each_stage_rejects_before_the_next_runs() -> Result<()> {
    init_tracing();
    let mock = Arc::new(MockLlmBackend::replying(
        "stub",
        r#"{"relevante": false, "confianca": 90, "motivo": "fora da região", "urgencia": "BAIXA"}"#,
    ));
    let tourism = RawArticle::new(
        "Festival de cruzeiro no Caribe",
        "https://example.com/cruzeiro",
        "Turismo internacional em alta temporada",
        "example.com",
    );
    let santos = RawArticle::new(
        "Porto de Santos e ANTAQ discutem tarifa no Brasil",
        "https://example.com/santos",
        "Regulamentação portuária em debate",
        "example.com",
    );
    let pipeline = pipeline_with(vec![tourism, santos], &mock).await?;

    let report = pipeline.run().await?;
    assert_eq!(report.rejected.get("keywords"), Some(&1));
    assert_eq!(report.rejected.get("judge"), Some(&1));
    assert_eq!(report.persisted, 0);
    // Only the article that passed the keyword stage reached the AI.
    assert_eq!(mock.calls(), 1);
    assert_eq!(pipeline.store().count_articles().await?, 0);
    Ok(())
}

#[tokio::test]
async fn already_stored_articles_skip_the_judge() -> Result<()> {
    init_tracing();
    let mock = Arc::new(MockLlmBackend::replying("stub", ITAQUI_VERDICT));
    let pipeline = pipeline_with(vec![itaqui()], &mock).await?;

    pipeline.run().await?;
    let second = pipeline.run().await?;
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.persisted, 0);
    assert_eq!(mock.calls(), 1);
    assert_eq!(pipeline.store().count_articles().await?, 1);
    Ok(())
}

#[tokio::test]
async fn discovered_articles_dedupe_on_normalised_title() -> Result<()> {
    init_tracing();
    let mock = Arc::new(MockLlmBackend::replying("stub", ITAQUI_VERDICT));
    let found = |title: &str| {
        RawArticle::new(title, "", "Navio encalhado no canal de acesso ao porto de Itaqui", "busca ativa")
            .with_origin(ArticleOrigin::Discovered)
    };
    let pipeline = pipeline_with(
        vec![
            found("Navio encalha em Itaqui, Maranhão"),
            found("navio ENCALHA em itaqui maranhão!"),
        ],
        &mock,
    )
    .await?;

    let report = pipeline.run().await?;
    assert_eq!(report.persisted, 1);
    assert_eq!(report.duplicates, 1);

    let stored = pipeline.store().get_recent(5).await?;
    assert!(stored[0].link.starts_with("discovered:"));
    assert_eq!(stored[0].origin, ArticleOrigin::Discovered);
    Ok(())
}

#[tokio::test]
async fn no_judge_backend_means_no_fallback_rejections() -> Result<()> {
    init_tracing();
    let store = ArticleStore::in_memory(200).await?;
    let pipeline = PipelineBuilder::new(store)
        .with_collector(Box::new(StaticCollector::new("fixed", vec![itaqui()])))
        .with_judge(Arc::new(RelevanceJudge::new(Vec::new(), FallbackPolicy::Conservative)))
        .build();

    let report = pipeline.run().await?;
    assert_eq!(report.persisted, 1);
    let stored = pipeline.store().get_recent(1).await?;
    assert!(stored[0].verdict.is_none());
    assert_eq!(stored[0].confidence, 50);
    Ok(())
}

struct SlowCollector;

#[async_trait]
impl Collector for SlowCollector {
    fn name(&self) -> &str {
        "slow"
    }

    async fn collect(&self) -> Result<Vec<RawArticle>> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Vec::new())
    }
}

struct BrokenCollector;

#[async_trait]
impl Collector for BrokenCollector {
    fn name(&self) -> &str {
        "broken"
    }

    async fn collect(&self) -> Result<Vec<RawArticle>> {
        Err(NewsError::General("site down".to_string()))
    }
}

#[tokio::test]
async fn overlapping_runs_are_refused() -> Result<()> {
    init_tracing();
    let store = ArticleStore::in_memory(200).await?;
    let pipeline = Arc::new(PipelineBuilder::new(store).with_collector(Box::new(SlowCollector)).build());

    let background = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.is_running());
    assert!(matches!(pipeline.run().await, Err(NewsError::AlreadyRunning)));

    let first = background.await.map_err(|e| NewsError::General(e.to_string()))?;
    assert!(first.is_ok());
    assert!(!pipeline.is_running());
    Ok(())
}

#[tokio::test]
async fn failing_collector_does_not_abort_the_run() -> Result<()> {
    init_tracing();
    let mock = Arc::new(MockLlmBackend::replying("stub", ITAQUI_VERDICT));
    let store = ArticleStore::in_memory(200).await?;
    let pipeline = PipelineBuilder::new(store)
        .with_collector(Box::new(BrokenCollector))
        .with_collector(Box::new(StaticCollector::new("fixed", vec![itaqui()])))
        .with_judge(judge(&mock, FallbackPolicy::Conservative))
        .build();

    let report = pipeline.run().await?;
    assert_eq!(report.collected, 1);
    assert_eq!(report.persisted, 1);
    Ok(())
}

#[tokio::test]
async fn feedback_trains_the_classifier_at_the_threshold() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let model_path = dir.path().join("relevance_model.json");
    let classifier = Arc::new(RelevanceClassifier::open(&model_path, TrainingConfig::default(), 0.6).await?);
    let store = ArticleStore::in_memory(200).await?;
    let pipeline = PipelineBuilder::new(store).with_classifier(classifier.clone()).build();

    let feedback = [
        ("Porto de Itaqui bate recorde", "movimentação de carga no Maranhão", true),
        ("Festival de verão em Salvador", "shows e turismo", false),
        ("ANTAQ aprova arrendamento em Suape", "terminal de contêineres", true),
        ("Cruzeiro internacional chega ao Caribe", "turismo de luxo", false),
    ];
    for (title, summary, relevant) in feedback {
        let outcome = pipeline.submit_feedback(title, summary, relevant).await?;
        assert!(outcome.saved);
        assert!(!outcome.retrained);
    }
    assert!(!classifier.is_trained().await);

    let outcome = pipeline
        .submit_feedback("Sinistro naval no Pecém", "avaria em navio graneleiro", true)
        .await?;
    assert!(outcome.retrained);
    assert!(classifier.is_trained().await);
    assert!(model_path.exists());

    let stats = pipeline.store().feedback_stats().await?;
    assert_eq!((stats.total, stats.relevant_count, stats.irrelevant_count), (5, 3, 2));
    Ok(())
}

#[tokio::test]
async fn empty_store_digest_is_the_sentinel() -> Result<()> {
    init_tracing();
    let mock = Arc::new(MockLlmBackend::replying("writer", "CIRCULAR"));
    let store = ArticleStore::in_memory(200).await?;
    let pipeline = PipelineBuilder::new(store)
        .with_digest_backend(Some(mock.clone() as Arc<dyn LlmBackend>))
        .build();

    assert_eq!(pipeline.digest(20).await?, NOTHING_TO_REPORT);
    assert_eq!(mock.calls(), 0);

    let dir = tempfile::tempdir()?;
    let path = pipeline.write_digest(20, dir.path()).await?;
    assert_eq!(tokio::fs::read_to_string(&path).await?, NOTHING_TO_REPORT);
    Ok(())
}

#[tokio::test]
async fn digest_uses_the_backend_for_stored_articles() -> Result<()> {
    init_tracing();
    let judge_mock = Arc::new(MockLlmBackend::replying("stub", ITAQUI_VERDICT));
    let writer = Arc::new(MockLlmBackend::replying("writer", "BRAZMAR MARINE SERVICES - CIRCULAR DIÁRIA"));
    let store = ArticleStore::in_memory(200).await?;
    let pipeline = PipelineBuilder::new(store)
        .with_collector(Box::new(StaticCollector::new("fixed", vec![itaqui()])))
        .with_judge(judge(&judge_mock, FallbackPolicy::Conservative))
        .with_digest_backend(Some(writer.clone() as Arc<dyn LlmBackend>))
        .build();

    pipeline.run().await?;
    let text = pipeline.digest(20).await?;
    assert!(text.contains("CIRCULAR DIÁRIA"));
    assert_eq!(writer.calls(), 1);
    Ok(())
}
