pub mod types;
pub mod config;
pub mod identity;
pub mod utils;
pub mod keywords;
pub mod classifier;
pub mod rate_limit;
pub mod llm_adapter;
pub mod judge;
pub mod store;
pub mod digest;
pub mod fetcher;
pub mod parser;
pub mod sources;
pub mod collector;
pub mod processing;
pub mod pipeline;
pub mod scheduler;

pub use types::*;
pub use config::AppConfig;
pub use keywords::KeywordFilter;
pub use classifier::{ClassifierModel, RelevanceClassifier, TrainingConfig};
pub use llm_adapter::{LlmBackend, LlmBackendRegistry, MockLlmBackend, MockReply};
pub use judge::{FallbackPolicy, RelevanceJudge};
pub use store::ArticleStore;
pub use digest::DigestGenerator;
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use collector::{Collector, RssCollector, ScrapeCollector, StaticCollector};
pub use pipeline::{Pipeline, PipelineBuilder, RunReport};
pub use scheduler::{ScheduledTask, Scheduler, SchedulerHandle};
