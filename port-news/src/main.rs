use anyhow::Context;
use clap::{Parser, Subcommand};
use port_news::collector::StaticCollector;
use port_news::{AppConfig, PipelineBuilder, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "port-news", about = "Maritime and port news collection, filtering and daily digests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline now and at the scheduled times until Ctrl-C
    Serve,
    /// Run the pipeline once
    Run {
        /// Read articles from a JSON file instead of the configured sources
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Print the digest for the most recent articles
    Digest {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Also write digest-YYYY-MM-DD.md to the digest directory
        #[arg(long)]
        write: bool,
    },
    /// Record reviewer feedback for an article
    Feedback {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        summary: String,
        /// Mark the article as not relevant
        #[arg(long)]
        irrelevant: bool,
    },
    /// Retrain the classifier from the feedback log
    Train,
    /// Feedback counts and today's articles by urgency
    Stats,
    /// Search stored articles
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;

    let mut builder = PipelineBuilder::from_config(&config)
        .await
        .with_context(|| format!("failed to open store at {}", config.redacted_database_url()))?;

    if let Command::Run { input: Some(path) } = &cli.command {
        let collector = StaticCollector::from_json_file(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        builder = builder.clear_collectors().with_collector(Box::new(collector));
    }
    let pipeline = Arc::new(builder.build());

    match cli.command {
        Command::Serve => {
            info!("Starting scheduler at {:?}", config.schedule_times);
            let handle = Scheduler::new(config.schedule_times.clone(), config.schedule_poll).spawn(pipeline.clone());
            tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
            info!("Shutting down");
            handle.stop().await;
        }
        Command::Run { .. } => match pipeline.run().await {
            Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            Err(e) => {
                error!("Pipeline run failed: {}", e);
                println!("{}", serde_json::json!({ "status": "error", "message": e.to_string() }));
            }
        },
        Command::Digest { limit, write } => {
            if write {
                let path = pipeline.write_digest(limit, &config.digest_dir).await?;
                println!("{}", path.display());
            } else {
                println!("{}", pipeline.digest(limit).await?);
            }
        }
        Command::Feedback {
            title,
            summary,
            irrelevant,
        } => {
            let outcome = pipeline.submit_feedback(&title, &summary, !irrelevant).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Train => {
            if pipeline.retrain().await? {
                println!("Classifier retrained and saved to {}", config.model_path.display());
            } else {
                println!(
                    "Not enough labelled feedback to train (need at least {} records with both labels)",
                    config.min_feedback_records
                );
            }
        }
        Command::Stats => {
            let feedback = pipeline.store().feedback_stats().await?;
            let today = pipeline.store().daily_summary(chrono::Utc::now().date_naive()).await?;
            let stored = pipeline.store().count_articles().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "articles_stored": stored,
                    "today": today,
                    "feedback": feedback,
                    "classifier_trained": pipeline.classifier().is_trained().await,
                }))?
            );
        }
        Command::Search { query, limit } => {
            for article in pipeline.store().search_articles(&query, limit).await? {
                println!("[{}] {} ({})\n    {}", article.urgency, article.title, article.source, article.link);
            }
        }
    }

    Ok(())
}
