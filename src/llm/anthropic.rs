use super::{non_empty_completion, retry, CompletionRequest, LlmClient, LlmError, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const MESSAGES_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API. Documents are passed by URL and fetched by the service.
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: MESSAGES_ENDPOINT.to_string(),
            timeout,
            retry,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn send(&self, body: &Value) -> Result<String, LlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        non_empty_completion(completion_text(&json))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = request_body(&self.model, request);
        retry(&self.retry, LlmError::is_transient, || self.send(&body)).await
    }
}

fn request_body(model: &str, request: &CompletionRequest) -> Value {
    let mut content = Vec::new();
    if let Some(url) = &request.document_url {
        content.push(json!({
            "type": "document",
            "source": { "type": "url", "url": url },
        }));
    }
    content.push(json!({ "type": "text", "text": request.prompt }));

    json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "messages": [{ "role": "user", "content": content }],
    })
}

/// Concatenate every text block of a Messages API response.
fn completion_text(response: &Value) -> String {
    response["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"].as_str() == Some("text"))
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
