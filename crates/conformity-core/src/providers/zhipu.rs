use async_trait::async_trait;
use serde_json::json;

use super::{message_array, ChatBackend, ChatTurn};

const CHAT_COMPLETIONS_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

/// Zhipu's GLM chat API; OpenAI-compatible request and response shapes.
pub struct ZhipuBackend {
    pub model: String,
    pub api_key: String,
    client: reqwest::Client,
}

impl ZhipuBackend {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Self {
        let api_key = std::env::var("ZHIPU_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("ZHIPU_API_KEY is not set; Zhipu calls will fail");
        }
        Self::new(model, api_key)
    }
}

#[async_trait]
impl ChatBackend for ZhipuBackend {
    async fn chat(&self, system: &str, turns: &[ChatTurn], user: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "stream": false,
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
            anyhow::bail!("Zhipu chat API error (status {status}): {error_text}");
        }

        let json: serde_json::Value = resp.json().await?;
        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Zhipu API response missing content"))?
            .to_string();
        Ok(text)
    }

    fn backend_name(&self) -> &'static str {
        "zhipu"
    }
}
