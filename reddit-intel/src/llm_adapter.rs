use crate::config::LlmSettings;
use crate::prompts::Prompt;
use crate::types::{CallUsage, IntelError};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Connection refused, timeout, 5xx or 429. The same request may succeed later.
    #[error("transient backend error: {0}")]
    Transient(String),
    /// Any other 4xx, a bad configuration, or a reply that is not a chat completion.
    #[error("fatal backend error: {0}")]
    Fatal(String),
}

impl From<GatewayError> for IntelError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transient(msg) => IntelError::TransientBackend(msg),
            GatewayError::Fatal(msg) => IntelError::FatalBackend(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Ollama,
    Sglang,
    Vllm,
    OpenAi,
    OpenAiCompatible,
}

/// Default endpoint and model for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub base_url: &'static str,
    pub default_model: &'static str,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Ollama,
        Provider::Sglang,
        Provider::Vllm,
        Provider::OpenAi,
        Provider::OpenAiCompatible,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::Sglang => "sglang",
            Provider::Vllm => "vllm",
            Provider::OpenAi => "openai",
            Provider::OpenAiCompatible => "openai-compatible",
        }
    }

    pub fn preset(&self) -> ProviderPreset {
        match self {
            Provider::Ollama => ProviderPreset {
                base_url: "http://localhost:11434/v1",
                default_model: "llama3.1",
            },
            Provider::Sglang => ProviderPreset {
                base_url: "http://localhost:30000/v1",
                default_model: "default",
            },
            Provider::Vllm => ProviderPreset {
                base_url: "http://localhost:8000/v1",
                default_model: "default",
            },
            Provider::OpenAi => ProviderPreset {
                base_url: "https://api.openai.com/v1",
                default_model: "gpt-4o-mini",
            },
            Provider::OpenAiCompatible => ProviderPreset {
                base_url: "http://localhost:8000/v1",
                default_model: "glm-4.7-flash",
            },
        }
    }
}

impl FromStr for Provider {
    type Err = IntelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Provider::ALL
            .into_iter()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| IntelError::Config(format!("unknown provider '{}'", s)))
    }
}

/// Fully resolved settings for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Apply the provider preset, then let explicit `base_url`/`model` win.
    /// `provider_override` is a focus area's own provider name.
    pub fn resolve(settings: &LlmSettings, provider_override: Option<&str>) -> Result<Self, IntelError> {
        let provider: Provider = provider_override.unwrap_or(&settings.provider).parse()?;
        let preset = provider.preset();

        let base_url = settings
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| preset.base_url.to_string());
        let model = settings
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| preset.default_model.to_string());

        let api_key = settings
            .api_key
            .clone()
            .or_else(|| match provider {
                Provider::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
                _ => None,
            })
            .filter(|k| !k.trim().is_empty());

        Ok(Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            max_tokens: settings.max_tokens,
            temperature: Some(settings.temperature),
            timeout: Duration::from_secs(settings.timeout_seconds),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// o1/o3/o4/gpt-5 style models: `max_completion_tokens`, no explicit temperature.
    Reasoning,
    Legacy,
}

/// Classify a model identifier, ignoring any `vendor/` prefix and case.
pub fn classify_model(model: &str) -> ModelFamily {
    let id = model.rsplit('/').next().unwrap_or(model).trim().to_lowercase();
    let o_series = ["o1", "o3", "o4"]
        .iter()
        .any(|p| id == *p || id.starts_with(&format!("{p}-")));
    if o_series || id.starts_with("gpt-5") {
        ModelFamily::Reasoning
    } else {
        ModelFamily::Legacy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Build the chat request for the configured model's family.
pub fn build_request(prompt: &Prompt, config: &ProviderConfig) -> ChatRequest {
    let mut messages = Vec::with_capacity(2);
    if !prompt.system.is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: prompt.system.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: prompt.user.clone(),
    });

    match classify_model(&config.model) {
        ModelFamily::Reasoning => ChatRequest {
            model: config.model.clone(),
            messages,
            max_tokens: None,
            max_completion_tokens: Some(config.max_tokens),
            temperature: None,
        },
        ModelFamily::Legacy => ChatRequest {
            model: config.model.clone(),
            messages,
            max_tokens: Some(config.max_tokens),
            max_completion_tokens: None,
            temperature: config.temperature,
        },
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageBlock>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBlock {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Text and token usage of one successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub reasoning: Option<String>,
    pub usage: CallUsage,
    pub model: String,
    pub latency_ms: u64,
}

/// Map a non-2xx status to the error taxonomy.
pub fn classify_status(status: u16, body: &str) -> GatewayError {
    let message = format!("HTTP {}: {}", status, body.trim());
    if status == 429 || status >= 500 {
        GatewayError::Transient(message)
    } else {
        GatewayError::Fatal(message)
    }
}

/// Provider-agnostic text completion.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    fn gateway_name(&self) -> String;

    async fn complete(&self, prompt: &Prompt, config: &ProviderConfig) -> Result<Completion, GatewayError>;
}

/// Speaks the OpenAI `/chat/completions` wire format, which every supported provider exposes.
pub struct OpenAiCompatibleGateway {
    http: reqwest::Client,
}

impl OpenAiCompatibleGateway {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn headers(config: &ProviderConfig) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| GatewayError::Fatal(format!("invalid API key header: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

impl Default for OpenAiCompatibleGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelGateway for OpenAiCompatibleGateway {
    fn gateway_name(&self) -> String {
        "openai-compatible".to_string()
    }

    async fn complete(&self, prompt: &Prompt, config: &ProviderConfig) -> Result<Completion, GatewayError> {
        let url = url::Url::parse(&format!("{}/chat/completions", config.base_url))
            .map_err(|e| GatewayError::Fatal(format!("invalid base_url '{}': {}", config.base_url, e)))?;
        let request = build_request(prompt, config);

        debug!(provider = config.provider.name(), model = %request.model, "Chat completion request");

        let start = Instant::now();
        let response = self
            .http
            .post(url)
            .headers(Self::headers(config)?)
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    GatewayError::Fatal(e.to_string())
                } else {
                    GatewayError::Transient(e.to_string())
                }
            })?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transient(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "Model backend returned an error");
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Fatal(format!("response is not a chat completion: {}", e)))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Fatal("response has no choices".to_string()))?;

        let usage = match parsed.usage {
            Some(u) => CallUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: if u.total_tokens > 0 {
                    u.total_tokens
                } else {
                    u.prompt_tokens + u.completion_tokens
                },
            },
            None => CallUsage::default(),
        };

        let reasoning = choice.message.reasoning_content.filter(|r| !r.is_empty());
        if let Some(r) = &reasoning {
            debug!(chars = r.len(), "Model returned reasoning content");
        }

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            reasoning,
            usage,
            model: parsed.model.unwrap_or_else(|| config.model.clone()),
            latency_ms,
        })
    }
}

/// Retry transient failures with exponential backoff; fatal errors return immediately.
pub async fn complete_with_retry(
    gateway: &dyn ModelGateway,
    prompt: &Prompt,
    config: &ProviderConfig,
    max_retries: u32,
) -> Result<Completion, GatewayError> {
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_secs(2),
        current_interval: Duration::from_secs(2),
        multiplier: 2.0,
        max_interval: Duration::from_secs(60),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 0;
    loop {
        match gateway.complete(prompt, config).await {
            Ok(completion) => return Ok(completion),
            Err(GatewayError::Transient(msg)) if attempt < max_retries => {
                attempt += 1;
                let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                warn!(attempt, max_retries, error = %msg, "Transient backend error, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 0 {
                    info!(attempts = attempt + 1, "Giving up on completion");
                }
                return Err(e);
            }
        }
    }
}
