//! Streaming chat completion client.
//!
//! [`CompletionService`] is the seam the repair step talks to. [`ApiClient`]
//! implements it for OpenAI-compatible endpoints (OpenAI, Ollama, Z.AI,
//! custom gateways) through `async-openai`, and for Anthropic's messages API
//! over server-sent events. Both are normalized into [`CompletionChunk`]s.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionResponseStream, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client as OpenAIClient,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::AiConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One streamed completion event, in OpenAI's `chat.completion.chunk` shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

impl CompletionChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: Delta {
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
        }
    }

    /// `choices[0].delta.content`, or `""` when absent.
    pub fn delta_text(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .unwrap_or("")
    }
}

pub type ChunkStream = BoxStream<'static, Result<CompletionChunk, ApiError>>;

type ChunkSender = mpsc::UnboundedSender<Result<CompletionChunk, ApiError>>;

/// A chat backend that can stream a completion.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<ChunkStream, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AIProvider {
    OpenAI,
    Claude,
    Ollama,
    ZAiCoding,
    Custom,
}

impl AIProvider {
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "openai" => AIProvider::OpenAI,
            "claude" | "anthropic" => AIProvider::Claude,
            "ollama" => AIProvider::Ollama,
            "z.ai coding plan" | "z.ai" | "zai" => AIProvider::ZAiCoding,
            _ => AIProvider::Custom,
        }
    }

    fn label(self) -> &'static str {
        match self {
            AIProvider::OpenAI => "OpenAI",
            AIProvider::Claude => "Claude",
            AIProvider::Ollama => "Ollama",
            AIProvider::ZAiCoding => "Z.AI",
            AIProvider::Custom => "Custom",
        }
    }

    fn requires_key(self) -> bool {
        matches!(self, AIProvider::OpenAI | AIProvider::Claude | AIProvider::ZAiCoding)
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    openai_client: Option<OpenAIClient<OpenAIConfig>>,
    pub provider: AIProvider,
    endpoint: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(config: &AiConfig, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .user_agent(concat!("mermaid-fix/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let provider = AIProvider::from_name(&config.provider);
        let endpoint = config.api_url.trim_end_matches('/').to_string();
        let api_key = config.resolved_api_key();

        // Everything except Anthropic speaks the OpenAI chat completions API.
        let openai_client = (provider != AIProvider::Claude).then(|| {
            let openai_config = OpenAIConfig::new()
                .with_api_base(&endpoint)
                .with_api_key(&api_key);
            OpenAIClient::with_config(openai_config).with_http_client(client.clone())
        });

        Ok(Self {
            client,
            openai_client,
            provider,
            endpoint,
            api_key,
        })
    }

    async fn stream_openai(
        &self,
        openai_client: &OpenAIClient<OpenAIConfig>,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ApiError> {
        let stream = openai_client.chat().create_stream(openai_request(&request)?).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            Self::pump_openai(stream, tx).await;
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    /// Forward `async-openai` stream responses until the stream finishes,
    /// fails, or the receiver goes away.
    async fn pump_openai(mut stream: ChatCompletionResponseStream, tx: ChunkSender) {
        while let Some(result) = stream.next().await {
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(Err(ApiError::from(e)));
                    return;
                }
            };

            let choices = response
                .choices
                .into_iter()
                .map(|choice| ChunkChoice {
                    delta: Delta {
                        content: choice.delta.content,
                    },
                    finish_reason: choice
                        .finish_reason
                        .and_then(|r| serde_json::to_value(r).ok())
                        .and_then(|v| v.as_str().map(str::to_string)),
                })
                .collect();

            if tx.send(Ok(CompletionChunk { choices })).is_err() {
                log::debug!("completion stream dropped by consumer");
                return;
            }
        }
    }

    async fn stream_claude(&self, request: CompletionRequest) -> Result<ChunkStream, ApiError> {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let body = json!({
            "model": request.model,
            "system": system.join("\n\n"),
            "messages": messages,
            "max_tokens": 4096,
            "temperature": request.temperature,
            "stream": true,
        });

        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        if !self.api_key.is_empty() {
            builder = builder.header("x-api-key", &self.api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiError::Status {
                provider: self.provider.label().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            Self::pump_claude(response, tx).await;
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    /// Forward Anthropic text deltas. A body that ends before `message_stop`
    /// is reported as a truncated stream.
    async fn pump_claude(response: reqwest::Response, tx: ChunkSender) {
        let mut events = response.bytes_stream().eventsource();

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    let _ = tx.send(Err(ApiError::Stream(e.to_string())));
                    return;
                }
            };

            match decode_claude_event(&event.data) {
                Ok(ClaudeEvent::Text(text)) => {
                    if tx.send(Ok(CompletionChunk::text(text))).is_err() {
                        log::debug!("completion stream dropped by consumer");
                        return;
                    }
                }
                Ok(ClaudeEvent::Stop) => return,
                Ok(ClaudeEvent::Other) => {}
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
        }

        let _ = tx.send(Err(ApiError::Stream(
            "stream ended before completion".to_string(),
        )));
    }
}

#[async_trait]
impl CompletionService for ApiClient {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<ChunkStream, ApiError> {
        if self.provider.requires_key() && self.api_key.is_empty() {
            return Err(ApiError::MissingApiKey(self.provider.label().to_string()));
        }

        log::debug!(
            "streaming completion from {} ({}), model {}",
            self.provider.label(),
            self.endpoint,
            request.model
        );

        match &self.openai_client {
            Some(openai_client) => self.stream_openai(openai_client, request).await,
            None => self.stream_claude(request).await,
        }
    }
}

/// Build the `async-openai` request for `request`.
fn openai_request(request: &CompletionRequest) -> Result<CreateChatCompletionRequest, ApiError> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(request.messages.len());
    for msg in &request.messages {
        let message: ChatCompletionRequestMessage = match msg.role.as_str() {
            "system" => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
            "assistant" => ChatCompletionRequestAssistantMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
            _ => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
        };
        messages.push(message);
    }

    Ok(CreateChatCompletionRequestArgs::default()
        .model(&request.model)
        .messages(messages)
        .temperature(request.temperature)
        .stream(true)
        .build()?)
}

#[derive(Debug, Clone, PartialEq)]
enum ClaudeEvent {
    Text(String),
    Stop,
    Other,
}

/// Interpret the data of one Anthropic stream event.
fn decode_claude_event(data: &str) -> Result<ClaudeEvent, ApiError> {
    if data.trim().is_empty() {
        return Ok(ClaudeEvent::Other);
    }

    let value: Value = serde_json::from_str(data)?;
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ApiError::Stream(message));
    }

    match value.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => {
            let text = value
                .pointer("/delta/text")
                .and_then(Value::as_str)
                .unwrap_or("");
            Ok(ClaudeEvent::Text(text.to_string()))
        }
        Some("message_stop") => Ok(ClaudeEvent::Stop),
        _ => Ok(ClaudeEvent::Other),
    }
}
