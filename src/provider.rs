//! Model provider abstraction and the bundled OpenRouter-backed provider
//!
//! The executor routes every call through the [`ModelProvider`] trait, so the
//! engine stays testable without a live model. The bundled provider talks to
//! OpenRouter's chat-completions API. Retry policy is owned by the executor's
//! single fallback hop; this client issues exactly one HTTP request per call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OpenRouter chat completions endpoint.
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// One provider/model pairing the executor can route calls to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    /// Context window used for PR chunk budgeting.
    pub context_window: usize,
}

impl ProviderConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            max_tokens: 16384,
            context_window: 128_000,
        }
    }

    pub fn default_primary() -> Self {
        Self::new("openai", "openai/gpt-4o")
    }

    pub fn default_fallback() -> Self {
        let mut config = Self::new("anthropic", "anthropic/claude-sonnet-4");
        config.context_window = 200_000;
        config
    }
}

/// Immutable request descriptor, constructed once per call and handed to the
/// executor. Never shared or mutated between calls.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub json_mode: bool,
    /// Domain tags for usage attribution (e.g. "file_classifier").
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl PromptRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.0,
            json_mode: false,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug)]
pub struct ProviderResponse {
    pub content: String,
    pub usage: Option<Usage>,
    /// Model name as reported by the provider.
    pub model: String,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(
        &self,
        request: &PromptRequest,
        config: &ProviderConfig,
    ) -> anyhow::Result<ProviderResponse>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// OpenRouter-backed provider.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenRouterProvider {
    async fn complete(
        &self,
        request: &PromptRequest,
        config: &ProviderConfig,
    ) -> anyhow::Result<ProviderResponse> {
        let response_format = request.json_mode.then(|| ResponseFormat {
            format_type: "json_object".to_string(),
        });

        let body = ChatRequest {
            model: config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            max_tokens: config.max_tokens,
            temperature: request.temperature,
            stream: false,
            response_format,
        };

        let response = self
            .client
            .post(OPENROUTER_URL)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "provider {} returned {}: {}",
                config.provider,
                status,
                truncate_str(&text, 200)
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            anyhow::anyhow!(
                "failed to parse {} response: {} ({})",
                config.provider,
                e,
                truncate_str(&text, 200)
            )
        })?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(ProviderResponse {
            content,
            usage: parsed.usage,
            model: parsed.model.unwrap_or_else(|| config.model.clone()),
        })
    }
}

/// Truncate a string for display (Unicode-safe).
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}
