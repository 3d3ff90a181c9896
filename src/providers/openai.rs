//! OpenAI-compatible chat-completions backend.
//!
//! Sends the prompt as a single user message to `{base_url}/chat/completions`
//! and returns the first choice's trimmed content.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::{Result, WireError};

use super::Generator;

/// Chat-completions client authenticated with a bearer API key.
pub struct OpenAiGenerator {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    client: Client,
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiGenerator {
    pub fn new(api_key: &str, config: &GenerationConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            client,
        }
    }

    /// Build the request body for a single-turn completion.
    pub fn build_request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
        })
    }

    /// Extract the first choice's message text from a response body.
    pub fn extract_text(response: &Value) -> Option<String> {
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, "OpenAI chat completion request");

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(&self.api_key)
            .json(&self.build_request_body(prompt))
            .send()
            .await
            .map_err(|e| WireError::Backend(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let body: Value = response
                .json()
                .await
                .map_err(|e| WireError::Backend(format!("failed to parse response: {e}")))?;
            return Self::extract_text(&body)
                .ok_or_else(|| WireError::Backend("response contained no message".to_string()));
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&error_text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(error_text);
        Err(WireError::Backend(format!(
            "API error ({}): {}",
            status.as_u16(),
            message
        )))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
