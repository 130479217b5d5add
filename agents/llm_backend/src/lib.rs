//! OpenAI-compatible chat completions backend for the affect router.

use affect_engine::{Backend, BackendError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for one chat completions endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChatBackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    /// Optional system prompt sent ahead of every utterance.
    pub system_prompt: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ChatBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model_name: "google/gemini-2.0-flash-exp:free".to_string(),
            system_prompt: None,
            request_timeout_ms: 30_000,
        }
    }
}

pub struct ChatCompletionsBackend {
    client: Client,
    config: ChatBackendConfig,
}

impl ChatCompletionsBackend {
    pub fn new(config: ChatBackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| BackendError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ChatBackendConfig {
        &self.config
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Request body for one user utterance.
    pub fn request_body(&self, prompt: &str) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &self.config.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));
        json!({
            "model": self.config.model_name,
            "messages": messages,
        })
    }
}

/// Pull `choices[0].message.content` out of a completions response.
pub fn extract_content(body: &Value) -> Result<String, BackendError> {
    if let Some(message) = body["error"]["message"].as_str() {
        return Err(BackendError::Failed(format!("provider error: {message}")));
    }
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BackendError::Failed("no content in response".to_string()))
}

#[async_trait]
impl Backend for ChatCompletionsBackend {
    async fn invoke(&self, text: &str) -> Result<String, BackendError> {
        let url = self.endpoint();
        debug!(url = %url, model = %self.config.model_name, "chat completion request");

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.config.request_timeout_ms)
                } else {
                    BackendError::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.config.model_name, "chat completion rejected");
            return Err(BackendError::Failed(format!("API error {status}: {text}")));
        }

        let body: Value = res
            .json()
            .await
            .map_err(|e| BackendError::Failed(format!("failed to parse JSON: {e}")))?;
        extract_content(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_choice() {
        let body = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "hello there"}},
                {"message": {"role": "assistant", "content": "ignored"}}
            ]
        });
        assert_eq!(extract_content(&body).unwrap(), "hello there");
    }

    #[test]
    fn missing_content_is_a_failure() {
        let body = json!({"choices": []});
        assert!(matches!(extract_content(&body), Err(BackendError::Failed(_))));
    }

    #[test]
    fn provider_error_is_surfaced() {
        let body = json!({"error": {"message": "rate limited"}});
        match extract_content(&body) {
            Err(BackendError::Failed(msg)) => assert!(msg.contains("rate limited")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn request_body_puts_system_prompt_first() {
        let backend = ChatCompletionsBackend::new(ChatBackendConfig {
            system_prompt: Some("be brief".to_string()),
            model_name: "mistral-small".to_string(),
            ..ChatBackendConfig::default()
        })
        .unwrap();
        let body = backend.request_body("hi");
        assert_eq!(body["model"], "mistral-small");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let backend = ChatCompletionsBackend::new(ChatBackendConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..ChatBackendConfig::default()
        })
        .unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn config_reads_from_toml_with_defaults() {
        let config: ChatBackendConfig = toml::from_str(
            r#"
            base_url = "http://127.0.0.1:11434/v1"
            model_name = "glm-4"
            "#,
        )
        .unwrap();
        assert_eq!(config.model_name, "glm-4");
        assert_eq!(config.request_timeout_ms, 30_000);
        assert!(config.api_key.is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let backend = ChatCompletionsBackend::new(ChatBackendConfig {
            // port 9 (discard) on loopback refuses connections
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_ms: 2_000,
            ..ChatBackendConfig::default()
        })
        .unwrap();
        let err = backend.invoke("hello").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Unavailable(_) | BackendError::Timeout(_)
        ));
    }
}
