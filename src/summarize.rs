//! Structured paper summaries from the full text.
//!
//! Each paper's PDF is handed to the LLM with a fixed instruction asking for
//! four tagged sections. Papers in a batch are processed one after another and
//! independently: a failure is recorded for that paper and the batch moves on.

use crate::llm::{retry, CompletionRequest, LlmClient, LlmError, RetryPolicy};
use crate::paper::Paper;
use crate::store::PaperCache;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const SECTIONS: [&str; 4] = ["summary", "methods", "contributions", "limitations"];
pub const DEFAULT_MAX_TOKENS: u32 = 5000;
const MAX_PROMPT_BYTES: usize = 32 * 1_000_000;

const SUMMARY_PROMPT: &str = "I'm sharing a research paper with you. Please provide a comprehensive summary of it.\n\n\
Analyze the full paper and provide:\n\n\
1. A concise summary (250-300 words) of the paper's main contributions and findings\n\
2. The key methodologies used\n\
3. The key contributions\n\
4. Any notable limitations mentioned\n\n\
Output your response in the following XML tags:\n\
<summary></summary>\n\
<methods></methods>\n\
<contributions></contributions>\n\
<limitations></limitations>\n\n\
Plan your response outside of the XML tags before writing the final output.";

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("paper {0} has no detail URL")]
    MissingDetailUrl(String),
    #[error("prompt exceeds maximum request size")]
    PromptTooLarge,
    #[error("completion contained none of the summary sections")]
    NoSections,
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl SummaryError {
    /// Only a reply without sections is retried here. Transient transport
    /// failures are already retried by the LLM client.
    fn is_retryable(&self) -> bool {
        matches!(self, SummaryError::NoSections)
    }
}

/// The four sections of a summary; a section the model left out is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaperSummary {
    pub summary: Option<String>,
    pub methods: Option<String>,
    pub contributions: Option<String>,
    pub limitations: Option<String>,
}

impl PaperSummary {
    pub fn is_empty(&self) -> bool {
        self.sections().iter().all(|(_, v)| v.is_none())
    }

    fn sections(&self) -> [(&'static str, &Option<String>); 4] {
        [
            (SECTIONS[0], &self.summary),
            (SECTIONS[1], &self.methods),
            (SECTIONS[2], &self.contributions),
            (SECTIONS[3], &self.limitations),
        ]
    }

    /// Present sections as tagged blocks in fixed order.
    pub fn render(&self) -> String {
        self.sections()
            .iter()
            .filter_map(|(tag, value)| {
                value
                    .as_ref()
                    .map(|text| format!("<{tag}>\n{text}\n</{tag}>"))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct SummaryBatch {
    /// Papers that now carry a summary, in input order.
    pub summarized: Vec<Paper>,
    pub failed: Vec<SummaryFailure>,
}

pub struct PaperSummarizer {
    client: Arc<dyn LlmClient>,
    cache: Option<Arc<dyn PaperCache>>,
    max_tokens: u32,
    retry: RetryPolicy,
    section_patterns: Vec<(&'static str, Regex)>,
}

impl PaperSummarizer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        let section_patterns = SECTIONS
            .iter()
            .map(|tag| {
                let pattern = format!(r"(?is)<{tag}\s*>(.*?)</{tag}\s*>");
                (*tag, Regex::new(&pattern).unwrap())
            })
            .collect();

        Self {
            client,
            cache: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryPolicy {
                max_retries: 1,
                base_delay: Duration::from_secs(1),
            },
            section_patterns,
        }
    }

    /// Reuse cached summaries and store fresh ones.
    pub fn with_cache(mut self, cache: Arc<dyn PaperCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn prompt(&self) -> &'static str {
        SUMMARY_PROMPT
    }

    /// Pull the tagged sections out of a completion. Tags are matched
    /// case-insensitively and text outside them is discarded.
    pub fn extract_sections(&self, text: &str) -> PaperSummary {
        let mut found = PaperSummary::default();
        for (tag, re) in &self.section_patterns {
            let value = re
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|v| !v.is_empty());
            match *tag {
                "summary" => found.summary = value,
                "methods" => found.methods = value,
                "contributions" => found.contributions = value,
                _ => found.limitations = value,
            }
        }
        found
    }

    /// Summarize the document at `pdf_url`; the result holds the tagged sections.
    pub async fn summarize_paper(&self, pdf_url: &str) -> Result<String, SummaryError> {
        let prompt = self.prompt();
        if prompt.len() > MAX_PROMPT_BYTES {
            return Err(SummaryError::PromptTooLarge);
        }

        let request = CompletionRequest::new(prompt, self.max_tokens).with_document(pdf_url);
        let response = self.client.complete(&request).await?;

        let sections = self.extract_sections(&response);
        if sections.is_empty() {
            return Err(SummaryError::NoSections);
        }
        Ok(sections.render())
    }

    pub async fn summarize_papers(&self, papers: Vec<Paper>) -> SummaryBatch {
        let mut batch = SummaryBatch::default();

        for mut paper in papers {
            if let Some(cached) = self.cached_summary(&paper.id) {
                info!(id = %paper.id, "using cached summary");
                batch.summarized.push(cached);
                continue;
            }

            let Some(pdf_url) = paper.pdf_url.clone() else {
                warn!(id = %paper.id, "skipping paper without PDF URL");
                batch.failed.push(SummaryFailure {
                    error: SummaryError::MissingDetailUrl(paper.id.clone()).to_string(),
                    id: paper.id,
                });
                continue;
            };

            let outcome = retry(&self.retry, SummaryError::is_retryable, || {
                self.summarize_paper(&pdf_url)
            })
            .await;

            match outcome {
                Ok(summary) => {
                    info!(id = %paper.id, "summarized paper");
                    paper.summary = Some(summary);
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.put(&paper) {
                            warn!(id = %paper.id, error = %e, "unable to cache paper");
                        }
                    }
                    batch.summarized.push(paper);
                }
                Err(e) => {
                    warn!(id = %paper.id, error = %e, "failed to summarize paper");
                    batch.failed.push(SummaryFailure {
                        id: paper.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        batch
    }

    fn cached_summary(&self, id: &str) -> Option<Paper> {
        self.cache
            .as_ref()?
            .get(id)
            .filter(|p| p.summary.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCache;
    use crate::testing::ScriptedLlm;

    const GOOD: &str = "Let me plan first.\n\
        <summary>Finds circuits.</summary>\n\
        <methods>Activation patching.</methods>\n\
        <contributions>A new benchmark.</contributions>\n\
        <limitations>Small models only.</limitations>";

    fn paper(id: &str) -> Paper {
        let mut p = Paper::new(id, format!("Title {}", id), format!("https://arxiv.org/abs/{}", id));
        p.pdf_url = Some(format!("https://arxiv.org/pdf/{}", id));
        p
    }

    fn summarizer(llm: &ScriptedLlm) -> PaperSummarizer {
        PaperSummarizer::new(Arc::new(llm.clone())).with_retry(RetryPolicy::none())
    }

    #[test]
    fn extracts_all_sections() {
        let s = summarizer(&ScriptedLlm::new()).extract_sections(GOOD);
        assert_eq!(s.summary.as_deref(), Some("Finds circuits."));
        assert_eq!(s.methods.as_deref(), Some("Activation patching."));
        assert_eq!(s.contributions.as_deref(), Some("A new benchmark."));
        assert_eq!(s.limitations.as_deref(), Some("Small models only."));
    }

    #[test]
    fn extraction_tolerates_case_newlines_and_missing_sections() {
        let text = "<SUMMARY>\nline one\nline two\n</Summary> <methods>unterminated";
        let s = summarizer(&ScriptedLlm::new()).extract_sections(text);
        assert_eq!(s.summary.as_deref(), Some("line one\nline two"));
        assert!(s.methods.is_none());
        assert_eq!(s.render(), "<summary>\nline one\nline two\n</summary>");
    }

    #[tokio::test]
    async fn summary_request_carries_document_and_budget() {
        let llm = ScriptedLlm::new().with_reply(GOOD);
        let text = summarizer(&llm)
            .summarize_paper("https://arxiv.org/pdf/2401.01234v1")
            .await
            .unwrap();

        for tag in SECTIONS {
            assert!(text.contains(&format!("<{tag}>")), "missing {tag}");
        }
        assert!(!text.contains("plan first"));

        let request = &llm.requests()[0];
        assert_eq!(request.document_url.as_deref(), Some("https://arxiv.org/pdf/2401.01234v1"));
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[tokio::test]
    async fn completion_without_sections_is_an_error() {
        let llm = ScriptedLlm::new().with_reply("I could not read the PDF.");
        let result = summarizer(&llm).summarize_paper("https://x/y.pdf").await;
        assert!(matches!(result, Err(SummaryError::NoSections)));
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let llm = ScriptedLlm::new()
            .with_reply(GOOD)
            .with_error(LlmError::Service {
                status: 500,
                body: "boom".to_string(),
            })
            .with_reply(GOOD);

        let batch = summarizer(&llm)
            .summarize_papers(vec![paper("a"), paper("b"), paper("c")])
            .await;

        let ids: Vec<_> = batch.summarized.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(batch.summarized.iter().all(|p| p.summary.is_some()));
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].id, "b");
    }

    #[tokio::test]
    async fn reply_without_sections_is_retried_within_policy() {
        let llm = ScriptedLlm::new()
            .with_reply("Sorry, here is some prose instead.")
            .with_reply(GOOD);
        let s = PaperSummarizer::new(Arc::new(llm.clone())).with_retry(RetryPolicy {
            max_retries: 1,
            base_delay: Duration::ZERO,
        });

        let batch = s.summarize_papers(vec![paper("a")]).await;

        assert_eq!(batch.summarized.len(), 1);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn llm_errors_are_not_retried_by_the_batch() {
        let errors = [
            LlmError::Service {
                status: 400,
                body: "bad request".to_string(),
            },
            LlmError::Document("too large".to_string()),
            LlmError::EmptyCompletion,
            LlmError::Timeout(Duration::from_secs(1)),
        ];

        for error in errors {
            let llm = ScriptedLlm::new().with_error(error.clone()).with_reply(GOOD);
            let s = PaperSummarizer::new(Arc::new(llm.clone())).with_retry(RetryPolicy {
                max_retries: 1,
                base_delay: Duration::ZERO,
            });

            let batch = s.summarize_papers(vec![paper("a")]).await;

            assert_eq!(llm.call_count(), 1, "{error} was retried");
            assert!(batch.summarized.is_empty());
            assert_eq!(batch.failed[0].id, "a");
        }
    }

    #[tokio::test]
    async fn missing_pdf_url_is_recorded_as_failure() {
        let llm = ScriptedLlm::new();
        let mut p = paper("a");
        p.pdf_url = None;

        let batch = summarizer(&llm).summarize_papers(vec![p]).await;

        assert!(batch.summarized.is_empty());
        assert_eq!(batch.failed[0].id, "a");
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn cached_summaries_skip_the_llm_and_new_ones_are_cached() {
        let cache = Arc::new(MemoryCache::new());
        let mut cached = paper("a");
        cached.summary = Some("<summary>old</summary>".to_string());
        cache.put(&cached).unwrap();

        let llm = ScriptedLlm::new().with_reply(GOOD);
        let s = summarizer(&llm).with_cache(cache.clone());

        let batch = s.summarize_papers(vec![paper("a"), paper("b")]).await;

        assert_eq!(batch.summarized.len(), 2);
        assert_eq!(batch.summarized[0].summary.as_deref(), Some("<summary>old</summary>"));
        assert_eq!(llm.call_count(), 1);
        assert!(cache.get("b").and_then(|p| p.summary).is_some());
    }
}
