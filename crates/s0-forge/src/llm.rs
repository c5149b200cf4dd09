use std::pin::Pin;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use s0_core::{LlmConfig, S0Error};
use serde::{Deserialize, Serialize};

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use s0_forge::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Create a pricing table".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use s0_forge::llm::Role;
///
/// let role = Role::System;
/// assert_eq!(serde_json::to_string(&role).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// Content chunks of a streaming completion, in arrival order.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, S0Error>> + Send>>;

/// Produces a full completion for a conversation.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Run one completion request and return the concatenated text.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Completion`] if the request or stream fails.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, S0Error>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_completion_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    /// Set when the provider aborts mid-stream.
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn stream_error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Streaming client for OpenAI-compatible chat completions.
///
/// Works with any provider that exposes `/v1/chat/completions` with
/// Server-Sent-Events streaming: Groq, OpenAI, Ollama, vLLM, etc.
///
/// # Examples
///
/// ```
/// use s0_core::LlmConfig;
/// use s0_forge::llm::CompletionClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = CompletionClient::new(&config).unwrap();
/// assert_eq!(client.model(), "deepseek-r1-distill-llama-70b");
/// ```
pub struct CompletionClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: Option<String>,
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl CompletionClient {
    /// Create a client from configuration.
    ///
    /// The API key comes from the config, then `S0_LLM_API_KEY`, then
    /// `GROQ_API_KEY`. A missing key is allowed for local providers.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Completion`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, S0Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| S0Error::Completion(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.resolve_api_key(),
            config: config.clone(),
        })
    }

    /// Return the model name from the configuration.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Whether an API key was resolved.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Open a streaming completion and yield content chunks as they arrive.
    ///
    /// The stream ends at the `[DONE]` sentinel or when the connection
    /// closes. Chunks without content are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Completion`] if the request fails or the provider
    /// answers with a non-success status. Stream items carry the same error
    /// for transport or decoding failures mid-stream.
    pub async fn chat_stream(&self, messages: Vec<ChatMessage>) -> Result<CompletionStream, S0Error> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: &messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_completion_tokens: self.config.max_completion_tokens,
            stream: true,
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| S0Error::Completion(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(S0Error::Completion(format!(
                "LLM API error {status}: {body_text}"
            )));
        }

        let mut bytes_stream = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = std::str::from_utf8(&raw).map_err(|e| {
                        S0Error::Completion(format!("invalid UTF-8 in event stream: {e}"))
                    })?;

                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }

                    let chunk: ChatCompletionChunk = serde_json::from_str(data).map_err(|e| {
                        S0Error::Completion(format!("malformed stream chunk: {e}"))
                    })?;
                    if let Some(error) = &chunk.error {
                        Err::<(), _>(S0Error::Completion(format!(
                            "provider error mid-stream: {}",
                            stream_error_message(error)
                        )))?;
                    }
                    for choice in chunk.choices {
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                yield content;
                            }
                        }
                    }
                }

                let Some(bytes) = bytes_stream.next().await else { break };
                let bytes = bytes
                    .map_err(|e| S0Error::Completion(format!("stream interrupted: {e}")))?;
                buffer.extend_from_slice(&bytes);
            }
        };

        let stream: CompletionStream = Box::pin(stream);
        Ok(stream)
    }

    /// Run a streaming completion and concatenate every chunk.
    ///
    /// An empty stream yields an empty string.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Completion`] on any request or stream failure.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, S0Error> {
        let mut stream = self.chat_stream(messages).await?;
        let mut text = String::new();
        while let Some(piece) = stream.next().await {
            text.push_str(&piece?);
        }
        tracing::debug!(model = %self.config.model, bytes = text.len(), "completion received");
        Ok(text)
    }
}

#[async_trait]
impl Completion for CompletionClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, S0Error> {
        self.chat(messages).await
    }
}
