//! Chat completion client for structured extraction
//!
//! The resolver uses completions only for constrained JSON extraction, so
//! the interface is a single "prompt in, JSON text out" call. Timeouts are
//! enforced by the caller via `tokio::time::timeout` so each call site can
//! pick its own deadline.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Trait for structured JSON completion
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run a completion and return the raw response text. Callers that
    /// request JSON output parse the text themselves.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// OpenAI chat completion client
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl OpenAiCompletionClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        temperature: Option<f32>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| "gpt-4.1".to_string()),
            temperature: temperature.unwrap_or(0.1),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                ChatMessage { role: "system", content: system_prompt.to_string() },
                ChatMessage { role: "user", content: user_prompt.to_string() },
            ],
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::CompletionError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::CompletionError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: ChatResponse =
            response.json().await.map_err(|e| AppError::CompletionError {
                message: format!("Failed to parse response: {}", e),
            })?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::CompletionError {
                message: "Empty completion response".to_string(),
            })
    }
}

/// Scripted completion client for tests. Responses are returned in the
/// order they were queued; an empty queue is an error.
#[derive(Default)]
pub struct MockCompletionClient {
    responses: Mutex<VecDeque<String>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::CompletionError {
                message: "No mock response queued".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_queue_order() {
        let client = MockCompletionClient::new();
        client.queue_response(r#"{"references": []}"#);
        client.queue_response(r#"{"references": [{"name": "Exhibit A"}]}"#);

        let first = client.complete("sys", "user").await.unwrap();
        let second = client.complete("sys", "user").await.unwrap();
        assert!(first.contains("[]"));
        assert!(second.contains("Exhibit A"));
    }

    #[tokio::test]
    async fn test_mock_exhausted_queue_errors() {
        let client = MockCompletionClient::new();
        let err = client.complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, AppError::CompletionError { .. }));
    }
}
