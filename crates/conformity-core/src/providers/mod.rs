//! Model backends. Every provider is an opaque `chat(messages) -> text`
//! capability with no latency or success guarantees; retry and rate limiting
//! live above this layer.

pub mod fake;
pub mod ollama;
pub mod openai;
pub mod zhipu;

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::Mode;

/// System prompt for the default operating mode.
pub const HELPFUL_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// System prompt for the empowered mode: the model is told to cross-check peer
/// answers instead of deferring to them.
pub const EMPOWERED_SYSTEM_PROMPT: &str = "You are a thoughtful and independent thinker. When considering others' answers, cross-check them against your knowledge and respond after verifying the accuracy of the information. Ensure your conclusions are grounded in sound reasoning and evidence, while being open to agreeing with others when their answers are correct.";

pub fn system_prompt_for(mode: Mode) -> &'static str {
    match mode {
        Mode::Default => HELPFUL_SYSTEM_PROMPT,
        Mode::Empowered => EMPOWERED_SYSTEM_PROMPT,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One prior turn of conversation, used by the behavioral follow-up interview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion provider. Implementations may fail on any call; callers
/// own retries.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, system: &str, turns: &[ChatTurn], user: &str) -> anyhow::Result<String>;

    fn backend_name(&self) -> &'static str;
}

/// Message array shared by the OpenAI-compatible providers.
pub(crate) fn message_array(
    system: &str,
    turns: &[ChatTurn],
    user: &str,
) -> Vec<serde_json::Value> {
    let mut messages = vec![serde_json::json!({"role": "system", "content": system})];
    for turn in turns {
        messages.push(serde_json::json!({"role": turn.role.as_str(), "content": turn.content}));
    }
    messages.push(serde_json::json!({"role": "user", "content": user}));
    messages
}

/// Route a model identifier to its provider, mirroring how the study assigns
/// models: known OpenAI chat models and GLM-4-Plus go to their hosted APIs,
/// everything else is assumed to be served by a local Ollama daemon.
///
/// Backends are constructed once at process start and shared for the whole
/// sweep.
pub fn backend_for_model(model: &str) -> Arc<dyn ChatBackend> {
    match model {
        "gpt-3.5-turbo" | "gpt-4" | "gpt-4o" => Arc::new(openai::OpenAiBackend::from_env(model)),
        "GLM-4-Plus" => Arc::new(zhipu::ZhipuBackend::from_env(model)),
        _ => Arc::new(ollama::OllamaBackend::from_env(model)),
    }
}
