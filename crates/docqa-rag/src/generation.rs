//! Text generation service trait and implementations.
//!
//! - `OllamaGenerator` calls a local Ollama server (`/api/generate`).
//! - `MockGenerator` returns scripted or extractive replies and records the
//!   requests it receives, for tests and offline runs.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use docqa_core::config::GenerationConfig;
use docqa_core::error::{DocqaError, Result};
use docqa_core::retry::{RetryPolicy, ServiceKind};

/// One request to a generation provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    /// System instruction, sent separately from the prompt when the provider supports it.
    pub system: Option<String>,
    pub prompt: String,
    /// Ask the provider to constrain its output to JSON.
    pub json_mode: bool,
}

/// Service that turns a prompt into text.
pub trait GenerationService: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> impl Future<Output = Result<String>> + Send;

    /// Model identifier, for logs and service info.
    fn model(&self) -> &str;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`GenerationService`] for dynamic dispatch.
pub trait DynGenerationService: Send + Sync {
    fn generate_boxed<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<String>>;

    fn model(&self) -> &str;
}

impl<T: GenerationService> DynGenerationService for T {
    fn generate_boxed<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.generate(request))
    }

    fn model(&self) -> &str {
        GenerationService::model(self)
    }
}

/// Build the generation service named by `config.provider`.
pub fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn DynGenerationService>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::from_config(config)?)),
        "mock" => Ok(Arc::new(MockGenerator::extractive())),
        other => Err(DocqaError::Config(format!(
            "unknown generation provider '{}'",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// OllamaGenerator
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Generation client for Ollama's non-streaming `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl OllamaGenerator {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        temperature: f32,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(DocqaError::Config("missing generation model name".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| DocqaError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model,
            temperature,
            retry,
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.model.clone(),
            config.temperature,
            config.retry_policy(),
        )
    }

    async fn request(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            format: request.json_mode.then_some("json"),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DocqaError::GenerationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(DocqaError::GenerationFailed(format!(
                "HTTP {}: {}",
                status, detail
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| DocqaError::GenerationFailed(format!("malformed response: {}", e)))?;
        Ok(parsed.response)
    }
}

impl GenerationService for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(
            model = %self.model,
            json_mode = request.json_mode,
            prompt_chars = request.prompt.len(),
            "Requesting generation"
        );
        self.retry
            .run(ServiceKind::Generation, move || self.request(request))
            .await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum MockMode {
    /// Pop replies in order; the last one repeats.
    Scripted(Mutex<VecDeque<Result<String>>>),
    /// Answer with the first context passage found in the prompt.
    Extractive,
}

/// Generator with canned behaviour. Counts calls and keeps the last request.
#[derive(Debug)]
pub struct MockGenerator {
    mode: MockMode,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl MockGenerator {
    /// Always reply with `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(reply.into())])
    }

    /// Reply with each entry in turn, repeating the last once exhausted.
    pub fn scripted(replies: Vec<Result<String>>) -> Self {
        Self::with_mode(MockMode::Scripted(Mutex::new(replies.into())))
    }

    /// Always fail with `GenerationFailed`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::scripted(vec![Err(DocqaError::GenerationFailed(message.into()))])
    }

    /// Reply with the first passage of the prompt's context block, or with
    /// the no-information sentence when the prompt has none.
    pub fn extractive() -> Self {
        Self::with_mode(MockMode::Extractive)
    }

    fn with_mode(mode: MockMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }

    fn next_reply(&self, request: &GenerationRequest) -> Result<String> {
        match &self.mode {
            MockMode::Scripted(replies) => {
                let mut replies = replies
                    .lock()
                    .map_err(|e| DocqaError::GenerationFailed(format!("lock poisoned: {}", e)))?;
                let reply = if replies.len() > 1 {
                    replies.pop_front()
                } else {
                    replies.front().map(clone_reply)
                };
                reply.unwrap_or_else(|| Ok(String::new()))
            }
            MockMode::Extractive => {
                let passage = crate::prompt::first_passage(&request.prompt)
                    .unwrap_or(crate::prompt::NO_ANSWER)
                    .to_string();
                if request.json_mode {
                    Ok(serde_json::json!({ "answer": passage }).to_string())
                } else {
                    Ok(passage)
                }
            }
        }
    }
}

fn clone_reply(reply: &Result<String>) -> Result<String> {
    match reply {
        Ok(text) => Ok(text.clone()),
        Err(DocqaError::GenerationFailed(msg)) => Err(DocqaError::GenerationFailed(msg.clone())),
        Err(DocqaError::ServiceUnavailable { service, message }) => {
            Err(DocqaError::unavailable(service, message.clone()))
        }
        Err(other) => Err(DocqaError::GenerationFailed(other.to_string())),
    }
}

impl GenerationService for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }
        self.next_reply(request)
    }

    fn model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mock_fixed_reply() {
        let generator = MockGenerator::new("three days");
        assert_eq!(generator.generate(&request("q")).await.unwrap(), "three days");
        assert_eq!(generator.generate(&request("q")).await.unwrap(), "three days");
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_scripted_sequence() {
        let generator = MockGenerator::scripted(vec![
            Err(DocqaError::GenerationFailed("overloaded".into())),
            Ok("second".into()),
        ]);
        assert!(generator.generate(&request("q")).await.is_err());
        assert_eq!(generator.generate(&request("q")).await.unwrap(), "second");
        assert_eq!(generator.generate(&request("q")).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let generator = MockGenerator::failing("down");
        for _ in 0..3 {
            assert!(matches!(
                generator.generate(&request("q")).await,
                Err(DocqaError::GenerationFailed(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_mock_records_last_request() {
        let generator = MockGenerator::new("ok");
        let req = GenerationRequest {
            system: Some("be brief".to_string()),
            prompt: "what?".to_string(),
            json_mode: true,
        };
        generator.generate(&req).await.unwrap();
        assert_eq!(generator.last_request(), Some(req));
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let generator: Arc<dyn DynGenerationService> = Arc::new(MockGenerator::new("boxed"));
        assert_eq!(generator.model(), "mock");
        assert_eq!(generator.generate_boxed(&request("q")).await.unwrap(), "boxed");
    }

    #[test]
    fn test_build_generator() {
        let mut config = GenerationConfig {
            provider: "mock".to_string(),
            ..GenerationConfig::default()
        };
        assert_eq!(build_generator(&config).unwrap().model(), "mock");

        config.provider = "ollama".to_string();
        assert_eq!(build_generator(&config).unwrap().model(), "llama3");

        config.provider = "gpt".to_string();
        assert!(matches!(build_generator(&config), Err(DocqaError::Config(_))));
    }

    #[test]
    fn test_ollama_request_body() {
        let body = GenerateRequest {
            model: "llama3",
            prompt: "Q",
            system: Some("S"),
            format: Some("json"),
            stream: false,
            options: GenerateOptions { temperature: 0.1 },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["system"], "S");
        assert_eq!(value["stream"], false);

        let plain = GenerateRequest {
            system: None,
            format: None,
            ..body
        };
        let value = serde_json::to_value(&plain).unwrap();
        assert!(value.get("format").is_none());
        assert!(value.get("system").is_none());
    }

    #[tokio::test]
    async fn test_ollama_unreachable_is_generation_failed() {
        let policy = RetryPolicy::new(std::time::Duration::from_secs(2), 0);
        let generator = OllamaGenerator::new("http://127.0.0.1:9", "llama3", 0.1, policy).unwrap();
        assert!(matches!(
            generator.generate(&request("hello")).await,
            Err(DocqaError::GenerationFailed(_))
        ));
    }
}
