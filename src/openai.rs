//! OpenAI-compatible chat completions client.

use crate::config::Settings;
use crate::error::AppError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A provider-agnostic completion request built by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
}

/// Anything able to turn a [`CompletionRequest`] into raw model text.
///
/// Implementations make exactly one attempt and report every failure,
/// including an empty answer, as [`AppError::Upstream`].
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AppError>;
}

/// Chat completions client for the OpenAI API (or any compatible endpoint).
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            endpoint: format!("{}/chat/completions", settings.base_url),
        })
    }
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AppError> {
        let body = ChatCompletionRequest::from(request);
        debug!(
            "Sending request to {}: model={}, messages={}",
            self.endpoint,
            body.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Upstream(format!("request timed out: {}", e))
                } else {
                    AppError::Upstream(format!("failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("failed to decode response: {}", e)))?;

        if let Some(usage) = &response.usage {
            info!(
                "Completion: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        first_content(response)
    }
}

/// Take the first choice's text, treating a missing or blank answer as an upstream failure.
fn first_content(response: ChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| AppError::Upstream("model returned no content".to_string()))
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl From<CompletionRequest> for ChatCompletionRequest {
    fn from(request: CompletionRequest) -> Self {
        Self {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat::JsonObject),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonObject,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
