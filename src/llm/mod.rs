//! LLM completion collaborators.
//!
//! Engines only see [`LlmClient`]; each provider turns a [`CompletionRequest`]
//! into one synchronous completion. Transient failures are retried a bounded
//! number of times with exponential backoff (see [`RetryPolicy`]).

mod anthropic;
mod ollama;

pub use anthropic::AnthropicClient;
pub use ollama::{OllamaClient, DEFAULT_HOST as OLLAMA_DEFAULT_HOST, DEFAULT_PORT as OLLAMA_DEFAULT_PORT};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    /// A document (PDF) the completion should be grounded on.
    pub document_url: Option<String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            document_url: None,
        }
    }

    pub fn with_document(mut self, url: impl Into<String>) -> Self {
        self.document_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("empty completion")]
    EmptyCompletion,
    #[error("document error: {0}")]
    Document(String),
    #[error("invalid client settings: {0}")]
    Config(String),
}

impl LlmError {
    /// Rate limits, server errors, timeouts and connection failures.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::Timeout(_) => true,
            LlmError::Service { status, .. } => *status == 429 || *status >= 500,
            LlmError::EmptyCompletion | LlmError::Document(_) | LlmError::Config(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// 1x, 2x, 4x ... the base delay, capped at 32x, plus up to 250ms jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt.saturating_sub(1)).min(5);
        self.base_delay * factor + Duration::from_millis(fastrand::u64(0..250))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds, fails with an error `should_retry` rejects, or
/// the policy is exhausted. The last error is returned.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    should_retry: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && should_retry(&e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                debug!(attempt, ?delay, error = %e, "retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn non_empty_completion(text: String) -> Result<String, LlmError> {
    if text.trim().is_empty() {
        Err(LlmError::EmptyCompletion)
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<&str, LlmError> = retry(&policy(2), LlmError::is_transient, move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LlmError::Service {
                    status: 529,
                    body: "overloaded".to_string(),
                })
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), LlmError> = retry(&policy(1), LlmError::is_transient, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Timeout(Duration::from_secs(1)))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), LlmError> = retry(&policy(3), LlmError::is_transient, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Service {
                status: 400,
                body: "bad request".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classification() {
        assert!(LlmError::Service { status: 429, body: String::new() }.is_transient());
        assert!(!LlmError::EmptyCompletion.is_transient());
        assert!(!LlmError::Document("too large".into()).is_transient());
    }

    #[test]
    fn blank_completion_is_an_error() {
        assert_eq!(non_empty_completion("  \n".into()), Err(LlmError::EmptyCompletion));
        assert_eq!(non_empty_completion("ok".into()), Ok("ok".to_string()));
    }
}
