//! Scripted test backend
//!
//! Answers by call purpose, can fail on demand, streams in fixed-size chunks
//! and counts calls per purpose. Available to other crates through the
//! `test-utils` feature.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;

use crate::LlmError;
use crate::types::{LlmBackend, LlmInvocation, LlmResult};

#[derive(Default)]
struct ScriptState {
    /// One-shot answers, consumed in order before `responses`
    queued: HashMap<String, VecDeque<Result<String, LlmError>>>,
    /// Sticky answer per purpose
    responses: HashMap<String, String>,
    /// Answer for purposes with nothing scripted
    fallback: Option<String>,
    /// When set, every call fails with this error
    failure: Option<LlmError>,
    calls: HashMap<String, u32>,
    prompts: Vec<(String, String)>,
}

pub struct ScriptedBackend {
    name: String,
    chunk_size: usize,
    state: Mutex<ScriptState>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunk_size: 16,
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// Backend whose every call fails with `error`
    pub fn failing(name: impl Into<String>, error: LlmError) -> Self {
        let backend = Self::new(name);
        backend.set_failure(Some(error));
        backend
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Answer `text` to every call made for `purpose`
    #[must_use]
    pub fn with_response(self, purpose: &str, text: impl Into<String>) -> Self {
        self.state().responses.insert(purpose.to_string(), text.into());
        self
    }

    /// Answer `text` to calls whose purpose has nothing scripted
    #[must_use]
    pub fn with_default_response(self, text: impl Into<String>) -> Self {
        self.state().fallback = Some(text.into());
        self
    }

    /// Stream responses in chunks of `chunk_size` characters
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Answer the next call for `purpose` with `text`, then fall back to the
    /// sticky response
    pub fn push_response(&self, purpose: &str, text: impl Into<String>) {
        self.state()
            .queued
            .entry(purpose.to_string())
            .or_default()
            .push_back(Ok(text.into()));
    }

    /// Fail the next call for `purpose` with `error`
    pub fn push_error(&self, purpose: &str, error: LlmError) {
        self.state()
            .queued
            .entry(purpose.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Fail every call from now on, or stop failing with `None`
    pub fn set_failure(&self, failure: Option<LlmError>) {
        self.state().failure = failure;
    }

    /// Calls made for `purpose`, failed ones included
    #[must_use]
    pub fn calls(&self, purpose: &str) -> u32 {
        self.state().calls.get(purpose).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_calls(&self) -> u32 {
        self.state().calls.values().sum()
    }

    /// Last user message of every call made for `purpose`, oldest first
    #[must_use]
    pub fn prompts_for(&self, purpose: &str) -> Vec<String> {
        self.state()
            .prompts
            .iter()
            .filter(|(p, _)| p == purpose)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    fn answer(&self, inv: &LlmInvocation) -> Result<LlmResult, LlmError> {
        let mut state = self.state();
        *state.calls.entry(inv.purpose.clone()).or_default() += 1;
        let prompt = inv.last_user_message().unwrap_or_default().to_string();
        state.prompts.push((inv.purpose.clone(), prompt));

        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        let queued = state
            .queued
            .get_mut(&inv.purpose)
            .and_then(VecDeque::pop_front);
        let text = match queued {
            Some(answer) => answer?,
            None => state
                .responses
                .get(&inv.purpose)
                .or(state.fallback.as_ref())
                .cloned()
                .ok_or_else(|| {
                    LlmError::Unsupported(format!(
                        "{} has no scripted response for purpose '{}'",
                        self.name, inv.purpose
                    ))
                })?,
        };

        let input = (inv.prompt_chars() as u64).div_ceil(4);
        let output = (text.chars().count() as u64).div_ceil(4);
        Ok(LlmResult::new(text, self.name.clone(), inv.model.clone()).with_tokens(input, output))
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        self.answer(&inv)
    }

    async fn invoke_streaming(
        &self,
        inv: LlmInvocation,
        chunks: &UnboundedSender<String>,
    ) -> Result<LlmResult, LlmError> {
        let result = self.answer(&inv)?;
        let chars: Vec<char> = result.raw_response.chars().collect();
        for piece in chars.chunks(self.chunk_size) {
            let _ = chunks.send(piece.iter().collect());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn call(purpose: &str) -> LlmInvocation {
        LlmInvocation::new(
            purpose,
            "m",
            Duration::from_secs(1),
            vec![crate::Message::user(format!("prompt for {purpose}"))],
        )
    }

    #[tokio::test]
    async fn test_queued_answers_precede_sticky_ones() {
        let backend = ScriptedBackend::new("s").with_response("p", "sticky");
        backend.push_response("p", "first");
        backend.push_error("p", LlmError::Transport("boom".to_string()));

        assert_eq!(backend.invoke(call("p")).await.unwrap().raw_response, "first");
        assert!(backend.invoke(call("p")).await.is_err());
        assert_eq!(backend.invoke(call("p")).await.unwrap().raw_response, "sticky");
        assert_eq!(backend.calls("p"), 3);
        assert_eq!(backend.prompts_for("p")[0], "prompt for p");
    }

    #[tokio::test]
    async fn test_unscripted_purpose_fails() {
        let backend = ScriptedBackend::new("s");
        assert!(matches!(
            backend.invoke(call("other")).await,
            Err(LlmError::Unsupported(_))
        ));
        assert_eq!(backend.total_calls(), 1);
    }
}
