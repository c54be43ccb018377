use async_trait::async_trait;
use serde_json::json;

use super::{message_array, ChatBackend, ChatTurn};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Local Ollama daemon. No auth; the base URL can be pointed at a remote
/// daemon through `OLLAMA_HOST`.
pub struct OllamaBackend {
    pub model: String,
    pub base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Self {
        let base_url =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(model, base_url)
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn chat(&self, system: &str, turns: &[ChatTurn], user: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "stream": false,
            "messages": message_array(system, turns, user),
        });

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama chat error (status {status}): {error_text}");
        }

        let json: serde_json::Value = resp.json().await?;
        let text = json
            .pointer("/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Ollama response missing message content"))?
            .to_string();
        Ok(text)
    }

    fn backend_name(&self) -> &'static str {
        "ollama"
    }
}
