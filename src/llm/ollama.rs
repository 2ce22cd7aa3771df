use super::{non_empty_completion, retry, CompletionRequest, LlmClient, LlmError, RetryPolicy};
use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_HOST: &str = "http://localhost";
pub const DEFAULT_PORT: u16 = 11434;

/// Largest document accepted for text extraction (32 MB).
pub const MAX_DOCUMENT_BYTES: usize = 32 * 1_000_000;

/// Local Ollama model. Ollama cannot read PDFs itself, so documents are
/// downloaded, converted to text and placed ahead of the prompt.
pub struct OllamaClient {
    ollama: Ollama,
    http: Client,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
    max_document_chars: usize,
}

impl OllamaClient {
    pub fn new(
        host: &str,
        port: u16,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
        max_document_chars: usize,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent(concat!("arxiv-digest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        // The builder panics on a bad URL, so parse it here first.
        let mut url = Url::parse(host)
            .map_err(|e| LlmError::Config(format!("ollama host {:?}: {}", host, e)))?;
        url.set_port(Some(port))
            .map_err(|_| LlmError::Config(format!("ollama host {:?} cannot take a port", host)))?;
        let ollama = Ollama::builder().url(url).build();

        Ok(Self {
            ollama,
            http,
            model: model.into(),
            timeout,
            retry,
            max_document_chars,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the Ollama server answers at all.
    pub async fn is_available(&self) -> bool {
        match self.ollama.list_local_models().await {
            Ok(_) => true,
            Err(e) => {
                info!(error = %e, "ollama not available");
                false
            }
        }
    }

    async fn document_text(&self, url: &str) -> Result<String, LlmError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Document(format!(
                "download of {} failed with {}",
                url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(LlmError::Document(format!(
                "{} is {} bytes, limit is {}",
                url,
                bytes.len(),
                MAX_DOCUMENT_BYTES
            )));
        }

        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| LlmError::Document(e.to_string()))?
            .map_err(|e| LlmError::Document(e.to_string()))?;

        debug!(url, chars = text.len(), "extracted document text");
        Ok(truncate_chars(&text, self.max_document_chars))
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let options = ModelOptions::default().num_predict(max_tokens.min(i32::MAX as u32) as i32);
        let request = GenerationRequest::new(self.model.clone(), prompt.to_string()).options(options);

        match tokio::time::timeout(self.timeout, self.ollama.generate(request)).await {
            Err(_) => Err(LlmError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(LlmError::Transport(e.to_string())),
            Ok(Ok(response)) => non_empty_completion(response.response),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let prompt = match &request.document_url {
            Some(url) => {
                let document = retry(&self.retry, LlmError::is_transient, || self.document_text(url)).await?;
                format_document_prompt(&document, &request.prompt)
            }
            None => request.prompt.clone(),
        };

        retry(&self.retry, LlmError::is_transient, || {
            self.generate(&prompt, request.max_tokens)
        })
        .await
    }
}

fn format_document_prompt(document: &str, prompt: &str) -> String {
    format!("<document>\n{}\n</document>\n\n{}", document.trim(), prompt)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    fn client(host: &str, port: u16) -> Result<OllamaClient, LlmError> {
        OllamaClient::new(
            host,
            port,
            "llama3.2:latest",
            Duration::from_secs(5),
            RetryPolicy::none(),
            1000,
        )
    }

    #[test]
    fn builds_against_configured_host_and_port() {
        let default = client(DEFAULT_HOST, DEFAULT_PORT).unwrap();
        assert_eq!(default.ollama.url().host_str(), Some("localhost"));
        assert_eq!(default.ollama.url().port(), Some(DEFAULT_PORT));

        let remote = client("http://gpu-box.lan", 8080).unwrap();
        assert_eq!(remote.ollama.url().host_str(), Some("gpu-box.lan"));
        assert_eq!(remote.ollama.url().port(), Some(8080));
        assert_eq!(remote.model(), "llama3.2:latest");
    }

    #[test]
    fn malformed_host_is_an_error_not_a_panic() {
        assert!(matches!(client("localhost:11434 x", 11434), Err(LlmError::Config(_))));
        assert!(matches!(client("", 11434), Err(LlmError::Config(_))));
    }

    #[test]
    fn document_precedes_prompt() {
        let prompt = format_document_prompt("  body text \n", "Summarize.");
        assert_eq!(prompt, "<document>\nbody text\n</document>\n\nSummarize.");
    }
}
