//! OpenAI-compatible chat completions backend
//!
//! Serves both `openai` and `openrouter`; the two differ only in endpoint,
//! default model and a couple of attribution headers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::LlmError;
use crate::http_client::{HttpClient, HttpParams, map_body_error, resolve_params};
use crate::sse::read_events;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};
use specsmith_config::ProviderSettings;

/// Attribution headers OpenRouter uses for app rankings
const OPENROUTER_REFERER: &str = "https://github.com/EffortlessMetrics/specsmith";
const OPENROUTER_TITLE: &str = "specsmith";

/// Terminal data line of an OpenAI-style stream
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Clone)]
pub(crate) struct OpenAiCompatibleBackend {
    provider_name: String,
    client: HttpClient,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

impl OpenAiCompatibleBackend {
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(api_key: String, settings: &ProviderSettings) -> Result<Self, LlmError> {
        Ok(Self {
            provider_name: settings.name.clone(),
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

    fn is_openrouter(&self) -> bool {
        self.provider_name == "openrouter"
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|msg| OpenAiMessage {
                role: match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: msg.content.clone(),
            })
            .collect()
    }

    fn request(&self, inv: &LlmInvocation, stream: bool) -> (String, reqwest::RequestBuilder) {
        let (model, params) = resolve_params(inv, &self.default_model, &self.default_params);

        debug!(
            provider = %self.provider_name,
            model = %model,
            purpose = %inv.purpose,
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            stream,
            "Invoking OpenAI-compatible backend"
        );

        let body = ChatRequest {
            model: &model,
            messages: Self::convert_messages(&inv.messages),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        };

        let mut builder = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if self.is_openrouter() {
            builder = builder
                .header("HTTP-Referer", OPENROUTER_REFERER)
                .header("X-Title", OPENROUTER_TITLE);
        }
        let builder = builder.json(&body);
        (model, builder)
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let provider = self.provider_name.as_str();
        let (model, request) = self.request(&inv, false);
        let response = self
            .client
            .execute_with_retry(request, inv.timeout, provider)
            .await?;

        let body: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                map_body_error(&e, provider, inv.timeout)
            } else {
                LlmError::Transport(format!("Failed to parse {provider} response: {e}"))
            }
        })?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            LlmError::Transport(format!("{provider} response missing choices[0]"))
        })?;
        let content = choice
            .message
            .content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                LlmError::Transport(format!("{provider} response missing content in choices[0]"))
            })?;

        // OpenRouter reports the model it actually routed to
        let model_used = body.model.unwrap_or(model);
        let mut result = LlmResult::new(content, provider, model_used);
        if let Some(usage) = body.usage {
            result = result.with_tokens(usage.prompt_tokens, usage.completion_tokens);
        }

        debug!(
            provider,
            tokens_input = ?result.tokens_input,
            tokens_output = ?result.tokens_output,
            "Invocation completed"
        );

        Ok(result)
    }

    async fn invoke_streaming(
        &self,
        inv: LlmInvocation,
        chunks: &UnboundedSender<String>,
    ) -> Result<LlmResult, LlmError> {
        let provider = self.provider_name.as_str();
        let (model, request) = self.request(&inv, true);
        let response = self
            .client
            .execute_with_retry(request, inv.timeout, provider)
            .await?;

        let mut state = StreamState::default();
        read_events(response, provider, inv.timeout, |event| {
            Ok(state.apply(&event.data, chunks))
        })
        .await?;

        if state.text.is_empty() {
            return Err(LlmError::Transport(format!(
                "{provider} stream ended without content"
            )));
        }

        let mut result = LlmResult::new(state.text, provider, state.model.unwrap_or(model));
        result.tokens_input = state.tokens_input;
        result.tokens_output = state.tokens_output;
        Ok(result)
    }
}

#[derive(Debug, Default)]
struct StreamState {
    text: String,
    model: Option<String>,
    tokens_input: Option<u64>,
    tokens_output: Option<u64>,
}

impl StreamState {
    /// Apply one `data:` payload; `false` once the stream is done
    fn apply(&mut self, data: &str, chunks: &UnboundedSender<String>) -> bool {
        if data.trim() == DONE_SENTINEL {
            return false;
        }
        let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
            debug!(data_len = data.len(), "Skipping unrecognized stream payload");
            return true;
        };

        if self.model.is_none() {
            self.model = chunk.model;
        }
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                self.text.push_str(&text);
                let _ = chunks.send(text);
            }
        }
        if let Some(usage) = chunk.usage {
            self.tokens_input = Some(usage.prompt_tokens);
            self.tokens_output = Some(usage.completion_tokens);
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChunk {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(name: &str) -> ProviderSettings {
        ProviderSettings {
            name: name.to_string(),
            api_key_env: "KEY".to_string(),
            base_url: "http://localhost:9/v1/chat/completions".to_string(),
            model: "default-model".to_string(),
            max_tokens: 512,
            temperature: 0.3,
            timeout: Duration::from_secs(30),
            budget: None,
        }
    }

    #[test]
    fn test_provider_name_comes_from_settings() {
        let backend = OpenAiCompatibleBackend::new("k".to_string(), &settings("openrouter")).unwrap();
        assert!(backend.is_openrouter());
        let backend = OpenAiCompatibleBackend::new("k".to_string(), &settings("openai")).unwrap();
        assert!(!backend.is_openrouter());
    }

    #[test]
    fn test_convert_messages_keeps_order_and_roles() {
        let converted = OpenAiCompatibleBackend::convert_messages(&[
            Message::system("rules"),
            Message::user("question"),
            Message::assistant("answer"),
        ]);
        let roles: Vec<_> = converted.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }

    #[test]
    fn test_request_body_omits_stream_options_when_not_streaming() {
        let body = ChatRequest {
            model: "m",
            messages: vec![],
            max_tokens: 1,
            temperature: 0.0,
            stream: false,
            stream_options: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stream_options").is_none());
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_request_carries_model_and_openrouter_headers() {
        let backend = OpenAiCompatibleBackend::new("k".to_string(), &settings("openrouter")).unwrap();
        let inv = LlmInvocation::new(
            "generate_code",
            "custom-model",
            Duration::from_secs(5),
            vec![Message::user("write it")],
        );

        let (model, builder) = backend.request(&inv, true);
        assert_eq!(model, "custom-model");
        let request = builder.build().unwrap();
        assert_eq!(request.headers()["x-title"], OPENROUTER_TITLE);
        assert_eq!(request.headers()["authorization"], "Bearer k");

        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(json["model"], "custom-model");
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["messages"][0]["content"], "write it");
    }

    #[test]
    fn test_stream_state_collects_content_and_usage() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut state = StreamState::default();

        assert!(state.apply(
            r#"{"model":"openai/gpt-4o","choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            &tx
        ));
        assert!(state.apply(r#"{"choices":[{"delta":{"content":"fn main"}}]}"#, &tx));
        assert!(state.apply(r#"{"choices":[{"delta":{"content":"() {}"}}]}"#, &tx));
        assert!(state.apply(
            r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":4}}"#,
            &tx
        ));
        assert!(!state.apply("[DONE]", &tx));

        assert_eq!(state.text, "fn main() {}");
        assert_eq!(state.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!((state.tokens_input, state.tokens_output), (Some(9), Some(4)));
        assert_eq!(rx.try_recv().unwrap(), "fn main");
        assert_eq!(rx.try_recv().unwrap(), "() {}");
        assert!(rx.try_recv().is_err());
    }
}
