use crate::config::AppConfig;
use crate::rate_limit::RateLimit;
use crate::types::{NewsError, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// A text-in, text-out language model service.
///
/// Backends only move prompts and completions; interpreting the text is up
/// to the caller. Any `Err` is treated as a transport failure.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Call budget the judge should honour for this backend.
    fn rate_limit(&self) -> RateLimit {
        RateLimit::standard()
    }
}

fn backend_error(backend: &str, message: impl Into<String>) -> NewsError {
    NewsError::Backend {
        backend: backend.to_string(),
        message: message.into(),
    }
}

fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

#[derive(Debug, Clone)]
enum AuthStyle {
    Bearer,
    /// Azure OpenAI sends the key in an `api-key` header and picks the
    /// model through the deployment path.
    AzureKey { endpoint: String, api_version: String },
}

/// Chat-completions client for Groq, Together and Azure OpenAI.
pub struct OpenAiCompatibleBackend {
    name: String,
    client: Client,
    url: String,
    api_key: String,
    models: Vec<String>,
    auth: AuthStyle,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiCompatibleBackend {
    pub fn new(name: impl Into<String>, url: impl Into<String>, api_key: impl Into<String>, models: Vec<String>, timeout: Duration) -> Result<Self> {
        if models.is_empty() {
            return Err(NewsError::Config("a chat backend needs at least one model".to_string()));
        }
        Ok(Self {
            name: name.into(),
            client: http_client(timeout)?,
            url: url.into(),
            api_key: api_key.into(),
            models,
            auth: AuthStyle::Bearer,
            temperature: 0.1,
            max_tokens: 500,
        })
    }

    pub fn groq(api_key: &str, timeout: Duration) -> Result<Self> {
        Self::new(
            "groq",
            "https://api.groq.com/openai/v1/chat/completions",
            api_key,
            vec!["llama3-70b-8192".to_string(), "mixtral-8x7b-32768".to_string()],
            timeout,
        )
    }

    pub fn together(api_key: &str, timeout: Duration) -> Result<Self> {
        Self::new(
            "together",
            "https://api.together.xyz/v1/chat/completions",
            api_key,
            vec![
                "meta-llama/Llama-3-70b-chat-hf".to_string(),
                "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
            ],
            timeout,
        )
    }

    pub fn azure(api_key: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        let mut backend = Self::new("azure", String::new(), api_key, vec!["gpt-4".to_string()], timeout)?;
        backend.auth = AuthStyle::AzureKey {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: "2023-12-01-preview".to_string(),
        };
        Ok(backend)
    }

    fn pick_model(&self) -> &str {
        self.models
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let model = self.pick_model();
        debug!("Calling {} with model {}", self.name, model);

        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let request = match &self.auth {
            AuthStyle::Bearer => self.client.post(&self.url).bearer_auth(&self.api_key),
            AuthStyle::AzureKey { endpoint, api_version } => {
                let url = format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    endpoint, model, api_version
                );
                self.client.post(url).header("api-key", &self.api_key)
            }
        };

        let response = request.json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(backend_error(&self.name, format!("HTTP {}: {}", status, crate::utils::text::preview(&detail, 200))));
        }

        let payload: Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| backend_error(&self.name, "response has no message content"))
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.to_string(),
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
        })
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(backend_error("gemini", format!("HTTP {}", status)));
        }

        let payload: Value = response.json().await?;
        payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| backend_error("gemini", "response has no candidate text"))
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit::gemini()
    }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
}

/// Scripted backend for development and tests.
///
/// Replies are consumed in order; once the script runs out every call gets
/// the fallback reply.
pub struct MockLlmBackend {
    name: String,
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    calls: AtomicUsize,
    limit: RateLimit,
}

impl MockLlmBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: MockReply::Text(
                r#"{"relevante": true, "confianca": 70, "motivo": "mock", "urgencia": "MEDIA"}"#.to_string(),
            ),
            calls: AtomicUsize::new(0),
            limit: RateLimit::unlimited(),
        }
    }

    /// Always answer with `text`.
    pub fn replying(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut mock = Self::new(name);
        mock.fallback = MockReply::Text(text.into());
        mock
    }

    /// Every call fails with a transport error.
    pub fn failing(name: impl Into<String>) -> Self {
        let mut mock = Self::new(name);
        mock.fallback = MockReply::Fail("connection refused".to_string());
        mock
    }

    pub fn then(self, reply: MockReply) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted.unwrap_or_else(|| self.fallback.clone()) {
            MockReply::Text(text) => Ok(text),
            MockReply::Fail(message) => Err(backend_error(&self.name, message)),
        }
    }

    fn rate_limit(&self) -> RateLimit {
        self.limit
    }
}

/// Ordered set of configured backends. The first registered one is the
/// default used for digest generation.
#[derive(Default, Clone)]
pub struct LlmBackendRegistry {
    backends: Vec<Arc<dyn LlmBackend>>,
}

impl LlmBackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every backend whose credentials are present in `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let timeout = config.backend_timeout;
        let keys = &config.backends;
        let mut registry = Self::new();

        if let Some(key) = &keys.groq_api_key {
            registry.register(Arc::new(OpenAiCompatibleBackend::groq(key, timeout)?));
        }
        if let Some(key) = &keys.together_api_key {
            registry.register(Arc::new(OpenAiCompatibleBackend::together(key, timeout)?));
        }
        if let (Some(key), Some(endpoint)) = (&keys.azure_openai_key, &keys.azure_endpoint) {
            registry.register(Arc::new(OpenAiCompatibleBackend::azure(key, endpoint, timeout)?));
        }
        if let Some(key) = &keys.gemini_api_key {
            registry.register(Arc::new(GeminiBackend::new(key, timeout)?));
        }

        if registry.is_empty() {
            info!("No AI backend credentials configured");
        }
        Ok(registry)
    }

    pub fn register(&mut self, backend: Arc<dyn LlmBackend>) {
        info!("Registering AI backend: {}", backend.name());
        self.backends.retain(|b| b.name() != backend.name());
        self.backends.push(backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmBackend>> {
        self.backends.iter().find(|b| b.name() == name).cloned()
    }

    pub fn default_backend(&self) -> Option<Arc<dyn LlmBackend>> {
        self.backends.first().cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn backends(&self) -> &[Arc<dyn LlmBackend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
