use super::retry::{retry_with_backoff, BackoffPolicy};
use super::{ChatRequest, LLMConfig, LLMProvider, LLMResponse, ToolCallRequest, LLM};
use crate::error::DiscoveryError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use reqwest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Value>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    total_tokens: u32,
}

/// Encode a local image as a data URL
pub async fn local_image_to_data_url(path: &Path) -> Result<String> {
    let mime_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Could not read image from path: {}", path.display()))?;
    Ok(format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(bytes)))
}

/// Build the wire-format body shared by every OpenAI-compatible endpoint
async fn build_request(config: &LLMConfig, request: &ChatRequest) -> Result<ChatCompletionRequest> {
    let mut messages = request
        .messages
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if !request.images.is_empty() {
        let mut parts = Vec::with_capacity(request.images.len());
        for path in &request.images {
            let url = local_image_to_data_url(path).await?;
            parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
        }
        messages.push(json!({"role": "user", "content": parts}));
    }

    Ok(ChatCompletionRequest {
        model: config.model.clone(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(config.max_tokens),
        temperature: request.temperature.unwrap_or(config.temperature),
        tool_choice: if request.tools.is_empty() { None } else { Some("auto") },
        tools: request.tools.clone(),
        response_format: request.json_mode.then(|| json!({"type": "json_object"})),
    })
}

async fn send_chat_completion(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &ChatCompletionRequest,
) -> Result<LLMResponse> {
    let mut builder = client.post(url).json(body);
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {}", key));
    }

    let response = builder.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() || status.as_u16() == 403 {
            return Err(DiscoveryError::Generation(format!("API returned status {}: {}", status, text)).into());
        }
        return Err(anyhow!("API returned status {}: {}", status, text));
    }

    let completion: ChatCompletionResponse = response.json().await?;
    let message = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No choices in completion response"))?
        .message;

    Ok(LLMResponse {
        content: message.content.map(|c| c.trim().to_string()),
        tool_calls: message.tool_calls,
        tokens_used: completion.usage.map(|u| u.total_tokens),
    })
}

/// LMStudio (or any OpenAI-compatible local server) provider implementation
pub struct LMStudioProvider {
    config: LLMConfig,
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl LMStudioProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            client,
            backoff: BackoffPolicy::default(),
        })
    }
}

#[async_trait]
impl LLM for LMStudioProvider {
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse> {
        let endpoint = self
            .config
            .endpoint
            .as_ref()
            .ok_or_else(|| anyhow!("LMStudio endpoint not configured"))?;

        let body = build_request(&self.config, &request).await?;
        debug!("Sending request to LMStudio at {} ({} messages)", endpoint, body.messages.len());

        retry_with_backoff(self.backoff, || {
            send_chat_completion(&self.client, endpoint, self.config.api_key.as_deref(), &body)
        })
        .await
    }

    async fn is_available(&self) -> bool {
        let endpoint = match &self.config.endpoint {
            Some(ep) => ep,
            None => return false,
        };

        let models_endpoint = endpoint.replace("/chat/completions", "/models");

        match self.client.get(&models_endpoint).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }
}

/// OpenAI provider implementation
pub struct OpenAIProvider {
    config: LLMConfig,
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(anyhow!("OpenAI API key required"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            client,
            backoff: BackoffPolicy::default(),
        })
    }

    fn url(&self) -> &str {
        self.config.endpoint.as_deref().unwrap_or(OPENAI_CHAT_URL)
    }
}

#[async_trait]
impl LLM for OpenAIProvider {
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OpenAI API key not configured"))?;

        let body = build_request(&self.config, &request).await?;
        debug!("Sending request to OpenAI API ({} messages, {} tools)", body.messages.len(), body.tools.len());

        retry_with_backoff(self.backoff, || send_chat_completion(&self.client, self.url(), Some(api_key), &body)).await
    }

    async fn is_available(&self) -> bool {
        if let Some(api_key) = &self.config.api_key {
            let url = "https://api.openai.com/v1/models";

            match self
                .client
                .get(url)
                .header("Authorization", format!("Bearer {}", api_key))
                .send()
                .await
            {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            }
        } else {
            false
        }
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::OpenAI
    }
}
