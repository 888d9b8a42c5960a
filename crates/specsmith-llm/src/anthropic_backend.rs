//! Anthropic HTTP backend for the Messages API, with SSE streaming

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::LlmError;
use crate::http_client::{HttpClient, HttpParams, map_body_error, resolve_params};
use crate::sse::read_events;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};
use specsmith_config::ProviderSettings;

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

const PROVIDER: &str = "anthropic";

#[derive(Clone)]
pub(crate) struct AnthropicBackend {
    client: HttpClient,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

impl AnthropicBackend {
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(api_key: String, settings: &ProviderSettings) -> Result<Self, LlmError> {
        Ok(Self {
            client: HttpClient::new()?,
            base_url: settings.base_url.clone(),
            api_key,
            default_model: settings.model.clone(),
            default_params: HttpParams {
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
            },
        })
    }

    /// Split system messages out into the `system` field; the Messages API
    /// only takes user/assistant turns in `messages`.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_prompt: Option<String> = None;
        let mut anthropic_messages = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    if let Some(existing) = system_prompt.as_mut() {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    } else {
                        system_prompt = Some(msg.content.clone());
                    }
                }
                Role::User | Role::Assistant => anthropic_messages.push(AnthropicMessage {
                    role: if msg.role == Role::User {
                        "user"
                    } else {
                        "assistant"
                    },
                    content: msg.content.clone(),
                }),
            }
        }

        (system_prompt, anthropic_messages)
    }

    fn request(&self, inv: &LlmInvocation, stream: bool) -> (String, reqwest::RequestBuilder) {
        let (model, params) = resolve_params(inv, &self.default_model, &self.default_params);

        debug!(
            provider = PROVIDER,
            model = %model,
            purpose = %inv.purpose,
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            stream,
            "Invoking Anthropic backend"
        );

        let (system, messages) = Self::convert_messages(&inv.messages);
        let body = AnthropicRequest {
            model: &model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system,
            stream,
        };

        let builder = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);
        (model, builder)
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let (model, request) = self.request(&inv, false);
        let response = self
            .client
            .execute_with_retry(request, inv.timeout, PROVIDER)
            .await?;

        let body: AnthropicResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                map_body_error(&e, PROVIDER, inv.timeout)
            } else {
                LlmError::Transport(format!("Failed to parse Anthropic response: {}", e))
            }
        })?;

        let content: String = body
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        if content.is_empty() {
            return Err(LlmError::Transport(
                "Anthropic response missing text content".to_string(),
            ));
        }

        let mut result = LlmResult::new(content, PROVIDER, model);
        if let Some(usage) = body.usage {
            result = result.with_tokens(usage.input_tokens, usage.output_tokens);
        }

        debug!(
            provider = PROVIDER,
            tokens_input = ?result.tokens_input,
            tokens_output = ?result.tokens_output,
            "Anthropic invocation completed"
        );

        Ok(result)
    }

    async fn invoke_streaming(
        &self,
        inv: LlmInvocation,
        chunks: &UnboundedSender<String>,
    ) -> Result<LlmResult, LlmError> {
        let (model, request) = self.request(&inv, true);
        let response = self
            .client
            .execute_with_retry(request, inv.timeout, PROVIDER)
            .await?;

        let mut state = StreamState::default();
        read_events(response, PROVIDER, inv.timeout, |event| {
            state.apply(&event.data, chunks)
        })
        .await?;

        if state.text.is_empty() {
            return Err(LlmError::Transport(
                "Anthropic stream ended without text content".to_string(),
            ));
        }

        let mut result = LlmResult::new(state.text, PROVIDER, model);
        result.tokens_input = state.tokens_input;
        result.tokens_output = state.tokens_output;
        Ok(result)
    }
}

/// Accumulated state of one streamed message
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    tokens_input: Option<u64>,
    tokens_output: Option<u64>,
}

impl StreamState {
    /// Apply one event payload. Returns `Ok(false)` once the message stops.
    fn apply(&mut self, data: &str, chunks: &UnboundedSender<String>) -> Result<bool, LlmError> {
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                debug!(provider = PROVIDER, error = %e, "Skipping unrecognized stream event");
                return Ok(true);
            }
        };

        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.tokens_input = usage.input_tokens;
                    self.tokens_output = usage.output_tokens;
                }
            }
            StreamEvent::ContentBlockDelta { delta } => {
                if delta.delta_type == "text_delta"
                    && let Some(text) = delta.text
                {
                    self.text.push_str(&text);
                    let _ = chunks.send(text);
                }
            }
            StreamEvent::MessageDelta { usage } => {
                if let Some(output) = usage.and_then(|u| u.output_tokens) {
                    self.tokens_output = Some(output);
                }
            }
            StreamEvent::MessageStop => return Ok(false),
            StreamEvent::Error { error } => {
                let message = format!("Anthropic stream error: {}", error.message);
                return Err(match error.error_type.as_str() {
                    "overloaded_error" | "api_error" => LlmError::ProviderOutage(message),
                    "rate_limit_error" => LlmError::ProviderQuota(message),
                    "authentication_error" | "permission_error" => {
                        LlmError::ProviderAuth(message)
                    }
                    _ => LlmError::Transport(message),
                });
            }
            StreamEvent::Other => {}
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StreamUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamMessage {
    usage: Option<StreamUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type", default)]
    delta_type: String,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamError {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockDelta {
        delta: StreamDelta,
    },
    MessageDelta {
        usage: Option<StreamUsage>,
    },
    MessageStop,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}
