use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub mod fakes;

// ── Request boundary ─────────────────────────────────────────────────────────

/// One call to the generative model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Identity preamble sent as the system message.
    pub system: String,
    /// Invocation message, including the serialized context.
    pub prompt: String,
    pub trigger_kind: String,
    pub purpose: String,
    pub trigger_id: Option<String>,
}

/// Anything that can turn a [`GenerationRequest`] into raw response text.
///
/// Transport failures are returned as errors; the caller decides whether an
/// invocation survives them.  Malformed *content* is not an error here.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn complete(&self, request: &GenerationRequest) -> Result<String>;

    /// Short label for logs and status output.
    fn describe(&self) -> String;
}

// ── Providers ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenRouter,
}

impl Provider {
    pub fn from_label(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("openrouter") {
            Self::OpenRouter
        } else {
            Self::Ollama
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub provider: Provider,
    pub ollama_model: String,
    pub openrouter_model: String,
    pub ollama_base_url: String,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            ollama_model: "llama3.1:8b".to_string(),
            openrouter_model: "anthropic/claude-3.5-sonnet".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            timeout: Duration::from_secs(120),
            max_tokens: 4000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl OpenRouterClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Routes completions to the configured provider.
#[derive(Debug, Clone)]
pub struct LlmRouter {
    ollama: OllamaClient,
    openrouter: OpenRouterClient,
    settings: RouterSettings,
}

impl LlmRouter {
    pub fn new(settings: RouterSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            ollama: OllamaClient::new(client.clone()),
            openrouter: OpenRouterClient::new(client),
            settings,
        })
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }
}

#[async_trait]
impl GenerativeModel for LlmRouter {
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let s = &self.settings;
        debug!(
            provider = ?s.provider,
            purpose = %request.purpose,
            prompt_chars = request.prompt.len(),
            "generative call"
        );
        match s.provider {
            Provider::Ollama => {
                self.ollama
                    .chat_model(&s.ollama_base_url, &s.ollama_model, request, s)
                    .await
            }
            Provider::OpenRouter => {
                self.openrouter
                    .chat_model(&s.openrouter_model, request, s)
                    .await
            }
        }
    }

    fn describe(&self) -> String {
        match self.settings.provider {
            Provider::Ollama => format!("ollama:{}", self.settings.ollama_model),
            Provider::OpenRouter => format!("openrouter:{}", self.settings.openrouter_model),
        }
    }
}

fn chat_messages(request: &GenerationRequest) -> serde_json::Value {
    json!([
        {"role": "system", "content": request.system},
        {"role": "user", "content": request.prompt}
    ])
}

impl OllamaClient {
    async fn chat_model(
        &self,
        base_url: &str,
        model: &str,
        request: &GenerationRequest,
        settings: &RouterSettings,
    ) -> Result<String> {
        let endpoint = format!("{}/api/chat", base_url.trim_end_matches('/'));
        let payload = json!({
            "model": model,
            "messages": chat_messages(request),
            "stream": false,
            "options": {
                "temperature": settings.temperature,
                "num_predict": settings.max_tokens
            }
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Ollama unavailable at {base_url}"))?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            bail!("Ollama error ({status}): {body}");
        }

        body.get("message")
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(str::to_string)
            .with_context(|| format!("Ollama response missing text: {body}"))
    }
}

impl OpenRouterClient {
    async fn chat_model(
        &self,
        model: &str,
        request: &GenerationRequest,
        settings: &RouterSettings,
    ) -> Result<String> {
        let api_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            bail!("OPENROUTER_API_KEY is not set");
        }

        let payload = json!({
            "model": model,
            "messages": chat_messages(request),
            "max_tokens": settings.max_tokens,
            "temperature": settings.temperature
        });

        let response = self
            .client
            .post("https://openrouter.ai/api/v1/chat/completions")
            .bearer_auth(api_key)
            .header("HTTP-Referer", "https://continuum.local")
            .header("X-Title", "Continuum")
            .json(&payload)
            .send()
            .await
            .context("OpenRouter request failed")?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            bail!("OpenRouter error ({status}): {body}");
        }

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(str::to_string)
            .with_context(|| format!("OpenRouter response missing text: {body}"))
    }
}

// ── Structured output extraction ──────────────────────────────────────────────

/// Extract a typed value from a model reply.
///
/// A fenced ` ```json ` block wins when present; its body must parse or the
/// reply is rejected outright.  Without a fence the whole trimmed reply is
/// parsed as JSON.
///
/// ```rust
/// use continuum_llm::extract_json_output;
///
/// let raw = "Sure!\n```json\n{\"message\":\"hi\"}\n```";
/// let out: serde_json::Value = extract_json_output(raw).unwrap();
/// assert_eq!(out["message"], "hi");
/// ```
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(fence_end) = after_fence.find("```") {
            return serde_json::from_str(after_fence[..fence_end].trim()).ok();
        }
    }

    serde_json::from_str(response.trim()).ok()
}

// ── Tests ────────────────────────────────────────────────────────────────────
