use async_trait::async_trait;
use serde_json::json;

use super::{message_array, ChatBackend, ChatTurn};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The study queries hosted chat models at a fixed sampling temperature.
const EVAL_TEMPERATURE: f32 = 0.7;

pub struct OpenAiBackend {
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            temperature: EVAL_TEMPERATURE,
            client: reqwest::Client::new(),
        }
    }

    /// Key comes from `OPENAI_API_KEY`; a missing key is reported at call time
    /// as an auth failure, which the retry layer degrades like any other
    /// provider error.
    pub fn from_env(model: impl Into<String>) -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("OPENAI_API_KEY is not set; OpenAI calls will fail");
        }
        Self::new(model, api_key)
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn chat(&self, system: &str, turns: &[ChatTurn], user: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": message_array(system, turns, user),
        });

        let resp = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI chat API error (status {status}): {error_text}");
        }

        let json: serde_json::Value = resp.json().await?;
        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("OpenAI API response missing content"))?
            .to_string();
        Ok(text)
    }

    fn backend_name(&self) -> &'static str {
        "openai"
    }
}
