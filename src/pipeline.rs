//! One digest run: search, optional ranking, optional summaries, delivery.

use crate::catalog::{ArxivCatalog, CatalogSearch, SearchError, SearchOptions, SearchRequest};
use crate::config::{Config, LlmConfig, Provider};
use crate::digest;
use crate::llm::{AnthropicClient, LlmClient, OllamaClient, RetryPolicy};
use crate::paper::Paper;
use crate::recommend::PaperRecommender;
use crate::store::{DirCache, JsonSeenRegistry, PaperCache};
use crate::summarize::{PaperSummarizer, SummaryFailure};
use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct RunReport {
    pub found: usize,
    /// `None` when ranking did not run.
    pub recommended: Option<usize>,
    pub summarized: usize,
    pub failed: Vec<SummaryFailure>,
    /// Papers handed to the digest, in search order.
    pub papers: Vec<Paper>,
    pub delivered: usize,
}

pub struct Pipeline {
    search: CatalogSearch,
    recommender: Option<PaperRecommender>,
    summarizer: Option<PaperSummarizer>,
    digest_file: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(search: CatalogSearch) -> Self {
        Self {
            search,
            recommender: None,
            summarizer: None,
            digest_file: None,
        }
    }

    pub fn with_recommender(mut self, recommender: PaperRecommender) -> Self {
        self.recommender = Some(recommender);
        self
    }

    pub fn with_summarizer(mut self, summarizer: PaperSummarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_digest(mut self, path: impl Into<PathBuf>) -> Self {
        self.digest_file = Some(path.into());
        self
    }

    pub fn search(&self) -> &CatalogSearch {
        &self.search
    }

    /// Build the production pipeline from `config`. AI stages are left out
    /// when `no_ai` is set or no LLM can be reached.
    pub async fn from_config(config: &Config, no_ai: bool) -> Result<Pipeline> {
        let catalog = ArxivCatalog::new(
            config.search.endpoint.clone(),
            Duration::from_secs(config.search.timeout_secs),
        )?;
        let seen = JsonSeenRegistry::load(&config.storage.seen_file);
        let cache: Arc<dyn PaperCache> = Arc::new(DirCache::open(&config.storage.cache_dir)?);

        let options = SearchOptions {
            request_size: config.search.request_size,
            page_delay: config.page_delay(),
        };
        let search = CatalogSearch::new(Box::new(catalog), Box::new(seen), options)
            .with_cache(cache.clone());
        let mut pipeline = Pipeline::new(search).with_digest(&config.storage.digest_file);

        if no_ai {
            info!("AI stages disabled");
            return Ok(pipeline);
        }
        let Some(client) = build_llm(&config.llm).await else {
            return Ok(pipeline);
        };

        if config.ranking.is_enabled() {
            pipeline = pipeline.with_recommender(
                PaperRecommender::new(client.clone(), config.ranking.interests.clone())
                    .with_max_tokens(config.ranking.max_tokens),
            );
        }
        if config.summary.enabled {
            pipeline = pipeline.with_summarizer(
                PaperSummarizer::new(client)
                    .with_cache(cache)
                    .with_max_tokens(config.summary.max_tokens)
                    .with_retry(RetryPolicy {
                        max_retries: config.summary.max_retries,
                        base_delay: Duration::from_secs(1),
                    }),
            );
        }

        Ok(pipeline)
    }

    /// New papers for `request`. An empty query is a logged no-op.
    pub async fn search_only(&mut self, request: &SearchRequest) -> Vec<Paper> {
        match self.search.search(request).await {
            Ok(papers) => papers,
            Err(SearchError::EmptyQuery) => {
                warn!("nothing to search for");
                Vec::new()
            }
        }
    }

    pub async fn run(&mut self, request: &SearchRequest) -> RunReport {
        let mut report = RunReport::default();

        let papers = self.search_only(request).await;
        report.found = papers.len();
        if papers.is_empty() {
            info!("no new papers found");
            return report;
        }

        let papers = match &self.recommender {
            Some(recommender) => {
                let ranked = recommender.recommend_papers(papers).await;
                info!(count = ranked.len(), "papers recommended");
                report.recommended = Some(ranked.len());
                ranked
            }
            None => papers,
        };

        let papers = match &self.summarizer {
            Some(summarizer) if !papers.is_empty() => {
                let batch = summarizer.summarize_papers(papers).await;
                report.summarized = batch.summarized.len();
                report.failed = batch.failed;
                batch.summarized
            }
            _ => papers,
        };

        if let Some(path) = &self.digest_file {
            match digest::append_digest(path, &papers) {
                Ok(n) => report.delivered = n,
                Err(e) => warn!(error = %e, "unable to write digest"),
            }
        }

        report.papers = papers;
        report
    }
}

pub fn search_request(config: &Config, max_results: Option<usize>) -> SearchRequest {
    SearchRequest {
        terms: config.search.terms.clone(),
        categories: config.search.categories.clone(),
        max_results: max_results.unwrap_or(config.search.max_results),
    }
}

/// The configured LLM, or `None` when it cannot be used.
pub async fn build_llm(config: &LlmConfig) -> Option<Arc<dyn LlmClient>> {
    let retry = RetryPolicy {
        max_retries: config.max_retries,
        base_delay: Duration::from_secs(1),
    };

    match config.provider {
        Provider::Ollama => {
            let client = match OllamaClient::new(
                &config.host,
                config.port,
                config.model_name(),
                config.timeout(),
                retry,
                config.max_document_chars,
            ) {
                Ok(client) => client,
                Err(e) => {
                    warn!(error = %e, "unable to create Ollama client, AI stages disabled");
                    return None;
                }
            };
            if !client.is_available().await {
                warn!("Ollama not available, AI stages disabled");
                return None;
            }
            info!(model = client.model(), "Ollama available");
            Some(Arc::new(client))
        }
        Provider::Anthropic => {
            let api_key = match std::env::var(&config.api_key_env) {
                Ok(key) if !key.trim().is_empty() => key,
                _ => {
                    warn!(var = %config.api_key_env, "API key not set, AI stages disabled");
                    return None;
                }
            };
            match AnthropicClient::new(api_key, config.model_name(), config.timeout(), retry) {
                Ok(client) => {
                    info!(model = config.model_name(), "using Anthropic");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    warn!(error = %e, "unable to create Anthropic client, AI stages disabled");
                    None
                }
            }
        }
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::store::{MemoryCache, MemorySeenRegistry};
    use crate::testing::{entry, ScriptedLlm, StubCatalog};

    fn request() -> SearchRequest {
        SearchRequest {
            terms: vec!["interpretability".to_string()],
            categories: vec!["cs.LG".to_string()],
            max_results: 10,
        }
    }

    fn search(catalog: StubCatalog) -> CatalogSearch {
        CatalogSearch::new(
            Box::new(catalog),
            Box::new(MemorySeenRegistry::new()),
            SearchOptions {
                request_size: 5,
                page_delay: Duration::ZERO,
            },
        )
    }

    const SUMMARY: &str = "<summary>s</summary><methods>m</methods>";

    #[test]
    fn weekend_detection() {
        assert!(is_weekend(NaiveDate::from_ymd_opt(2024, 1, 6).unwrap()));
        assert!(is_weekend(NaiveDate::from_ymd_opt(2024, 1, 7).unwrap()));
        assert!(!is_weekend(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()));
    }

    #[test]
    fn request_uses_override() {
        let config = Config::default();
        assert_eq!(search_request(&config, None).max_results, 50);
        assert_eq!(search_request(&config, Some(3)).max_results, 3);
    }

    #[tokio::test]
    async fn empty_query_yields_empty_report() {
        let mut pipeline = Pipeline::new(search(StubCatalog::new()));
        let report = pipeline.run(&SearchRequest::default()).await;
        assert_eq!(report.found, 0);
        assert!(report.papers.is_empty());
    }

    #[tokio::test]
    async fn search_only_with_empty_query_is_a_no_op() {
        let catalog = StubCatalog::new().with_page(vec![entry("a")]);
        let mut pipeline = Pipeline::new(search(catalog.clone()));

        let papers = pipeline.search_only(&SearchRequest::default()).await;

        assert!(papers.is_empty());
        assert!(catalog.page_calls().is_empty());
    }

    #[tokio::test]
    async fn run_without_ai_delivers_every_new_paper() {
        let catalog = StubCatalog::new().with_page(vec![entry("a"), entry("b")]);
        let mut pipeline = Pipeline::new(search(catalog));

        let report = pipeline.run(&request()).await;

        assert_eq!(report.found, 2);
        assert_eq!(report.recommended, None);
        assert_eq!(report.papers.len(), 2);
    }

    #[tokio::test]
    async fn ranks_then_summarizes_recommended_papers() {
        let catalog = StubCatalog::new().with_page(vec![entry("a"), entry("b"), entry("c")]);
        let llm = ScriptedLlm::new()
            .with_reply(r#"<paper id="b" score="5" recommend="true">fits</paper><paper id="a" recommend="false"></paper>"#)
            .with_reply(SUMMARY);
        let client: Arc<dyn LlmClient> = Arc::new(llm.clone());
        let cache = Arc::new(MemoryCache::new());

        let mut pipeline = Pipeline::new(search(catalog))
            .with_recommender(PaperRecommender::new(client.clone(), "circuits"))
            .with_summarizer(
                PaperSummarizer::new(client)
                    .with_cache(cache.clone())
                    .with_retry(RetryPolicy::none()),
            );

        let report = pipeline.run(&request()).await;

        assert_eq!(report.found, 3);
        assert_eq!(report.recommended, Some(1));
        assert_eq!(report.summarized, 1);
        assert_eq!(report.papers[0].id, "b");
        assert!(report.papers[0].summary.is_some());
        assert!(cache.contains("b"));
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn ranking_failure_keeps_all_papers() {
        let catalog = StubCatalog::new().with_page(vec![entry("a"), entry("b")]);
        let llm = ScriptedLlm::new().with_error(LlmError::Service {
            status: 400,
            body: "bad request".to_string(),
        });

        let mut pipeline = Pipeline::new(search(catalog))
            .with_recommender(PaperRecommender::new(Arc::new(llm), "circuits"));

        let report = pipeline.run(&request()).await;
        assert_eq!(report.recommended, Some(2));
        assert_eq!(report.papers.len(), 2);
    }

    #[tokio::test]
    async fn delivers_to_digest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.txt");
        let catalog = StubCatalog::new().with_page(vec![entry("a")]);
        let mut pipeline = Pipeline::new(search(catalog)).with_digest(&path);

        let report = pipeline.run(&request()).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(digest::read_digest(&path).unwrap()[0].id, "a");
    }
}
