use chrono::{Duration, TimeZone, Utc};
use port_news::store::ArticleStore;
use port_news::types::*;
use std::sync::Once;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn article(n: usize) -> Article {
    let base = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
    Article {
        title: format!("Porto de Itaqui boletim {}", n),
        link: format!("https://www.portosenavios.com.br/noticias/{}", n),
        summary: "Movimentação de carga no Maranhão".to_string(),
        source: "portosenavios.com.br".to_string(),
        origin: ArticleOrigin::Feed,
        collected_at: base + Duration::seconds(n as i64),
        urgency: Urgency::Medium,
        confidence: 75,
        verdict: None,
    }
}

#[tokio::test]
async fn saving_twice_leaves_one_record() -> Result<()> {
    init_tracing();
    let store = ArticleStore::in_memory(200).await?;

    let first = article(1);
    let mut second = article(1);
    second.title = "Título alterado".to_string();

    assert!(store.save_article(&first).await?);
    assert!(!store.save_article(&second).await?);
    assert_eq!(store.count_articles().await?, 1);

    let stored = store.get_recent(10).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, first.title);
    Ok(())
}

#[tokio::test]
async fn retention_keeps_the_200_most_recent() -> Result<()> {
    init_tracing();
    let store = ArticleStore::in_memory(200).await?;

    for n in 0..250 {
        assert!(store.save_article(&article(n)).await?);
    }

    assert_eq!(store.count_articles().await?, 200);
    let recent = store.get_recent(500).await?;
    assert_eq!(recent.len(), 200);
    assert_eq!(recent.first().map(|a| a.link.as_str()), Some("https://www.portosenavios.com.br/noticias/249"));
    assert_eq!(recent.last().map(|a| a.link.as_str()), Some("https://www.portosenavios.com.br/noticias/50"));
    assert!(!store.contains(&article(49).link).await?);
    Ok(())
}

#[tokio::test]
async fn recent_articles_are_ordered_by_collection_time() -> Result<()> {
    init_tracing();
    let store = ArticleStore::in_memory(200).await?;

    // Insert out of chronological order.
    for n in [5, 1, 9, 3] {
        store.save_article(&article(n)).await?;
    }

    let recent = store.get_recent(3).await?;
    let links: Vec<_> = recent.iter().map(|a| a.link.rsplit('/').next().unwrap_or_default().to_string()).collect();
    assert_eq!(links, vec!["9", "5", "3"]);
    Ok(())
}

#[tokio::test]
async fn pruning_follows_insertion_order_not_collection_time() -> Result<()> {
    init_tracing();
    let store = ArticleStore::in_memory(3).await?;

    // Article 5 is the second newest by time but the oldest insertion.
    for n in [5, 1, 9, 3] {
        store.save_article(&article(n)).await?;
    }

    assert_eq!(store.count_articles().await?, 3);
    assert!(!store.contains(&article(5).link).await?);
    let recent = store.get_recent(10).await?;
    let links: Vec<_> = recent.iter().map(|a| a.link.rsplit('/').next().unwrap_or_default().to_string()).collect();
    assert_eq!(links, vec!["9", "3", "1"]);
    Ok(())
}

#[tokio::test]
async fn file_backed_store_survives_reopen() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("db").join("news.db").display());

    {
        let store = ArticleStore::connect(&url, 200).await?;
        store.save_article(&article(7)).await?;
        store.save_feedback("Porto de Suape", "terminal", true).await?;
    }

    let reopened = ArticleStore::connect(&url, 200).await?;
    assert!(reopened.contains(&article(7).link).await?);
    assert_eq!(reopened.feedback_stats().await?.total, 1);
    Ok(())
}
