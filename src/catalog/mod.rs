//! Catalog search: query construction, paging, and deduplication against the
//! seen registry.
//!
//! A search walks the catalog newest-first in fixed-size pages and keeps every
//! item that is neither in the [`SeenStore`] nor already collected in this
//! call. It stops when enough new items were found, when
//! [`MAX_CONSECUTIVE_SEEN`] pages in a row contributed nothing new, when the
//! catalog returns an empty page, or when a page request fails. Whatever was
//! collected is then marked seen and the registry flushed, once per call.

mod arxiv;

pub use arxiv::{parse_feed, ArxivCatalog, DEFAULT_ENDPOINT};

use crate::paper::{CatalogEntry, Paper};
use crate::store::{PaperCache, SeenStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pages in a row with zero new items before a search gives up.
pub const MAX_CONSECUTIVE_SEEN: usize = 3;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed catalog feed: {0}")]
    Feed(String),
    #[error("catalog rejected the query: {0}")]
    Api(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("no search terms or categories provided")]
    EmptyQuery,
}

/// Remote paper catalog. Pages are ordered by submission date, newest first.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn fetch_page(
        &self,
        query: &str,
        start: usize,
        max_results: usize,
    ) -> Result<Vec<CatalogEntry>, CatalogError>;

    /// `Ok(None)` when the catalog has no entry for `id`.
    async fn lookup(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub terms: Vec<String>,
    pub categories: Vec<String>,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub request_size: usize,
    pub page_delay: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            request_size: 20,
            page_delay: Duration::from_secs(1),
        }
    }
}

/// Build a catalog query: categories OR-ed as `cat:<tag>`, terms OR-ed with
/// multi-word terms quoted, the two groups AND-ed. Groups with more than one
/// member are parenthesised. Blank entries are ignored.
pub fn build_query(terms: &[String], categories: &[String]) -> String {
    let mut parts = Vec::new();

    let cats: Vec<String> = categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| format!("cat:{}", c))
        .collect();
    if let Some(clause) = or_clause(cats) {
        parts.push(clause);
    }

    let terms: Vec<String> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| {
            if t.contains(char::is_whitespace) {
                format!("\"{}\"", t)
            } else {
                t.to_string()
            }
        })
        .collect();
    if let Some(clause) = or_clause(terms) {
        parts.push(clause);
    }

    parts.join(" AND ")
}

fn or_clause(items: Vec<String>) -> Option<String> {
    match items.len() {
        0 => None,
        1 => items.into_iter().next(),
        _ => Some(format!("({})", items.join(" OR "))),
    }
}

pub struct CatalogSearch {
    catalog: Box<dyn Catalog>,
    seen: Box<dyn SeenStore>,
    cache: Option<Arc<dyn PaperCache>>,
    options: SearchOptions,
}

impl CatalogSearch {
    pub fn new(catalog: Box<dyn Catalog>, seen: Box<dyn SeenStore>, options: SearchOptions) -> Self {
        Self {
            catalog,
            seen,
            cache: None,
            options,
        }
    }

    /// Serve single-paper lookups from `cache` before asking the catalog.
    pub fn with_cache(mut self, cache: Arc<dyn PaperCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn seen(&self) -> &dyn SeenStore {
        self.seen.as_ref()
    }

    pub async fn search(&mut self, request: &SearchRequest) -> Result<Vec<Paper>, SearchError> {
        let query = build_query(&request.terms, &request.categories);
        if query.is_empty() {
            warn!("no search terms or categories provided");
            return Err(SearchError::EmptyQuery);
        }

        let request_size = self.options.request_size.max(1);
        info!(%query, max_results = request.max_results, "searching catalog");

        let mut found: Vec<Paper> = Vec::new();
        let mut seen_in_run: HashSet<String> = HashSet::new();
        let mut start = 0;
        let mut consecutive_seen = 0;

        while found.len() < request.max_results && consecutive_seen < MAX_CONSECUTIVE_SEEN {
            debug!(
                page = start / request_size + 1,
                start,
                end = start + request_size - 1,
                "requesting page"
            );

            let entries = match self.catalog.fetch_page(&query, start, request_size).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, start, "page request failed, keeping partial results");
                    break;
                }
            };

            if entries.is_empty() {
                info!("no more papers available from the catalog");
                break;
            }

            let mut new_in_page = 0;
            for entry in entries {
                let paper = Paper::from_entry(entry);
                if paper.id.is_empty() {
                    continue;
                }
                if self.seen.contains(&paper.id) || seen_in_run.contains(&paper.id) {
                    debug!(id = %paper.id, title = %paper.title, "skipping already seen paper");
                    continue;
                }

                info!(id = %paper.id, title = %paper.title, "found new paper");
                seen_in_run.insert(paper.id.clone());
                found.push(paper);
                new_in_page += 1;

                if found.len() >= request.max_results {
                    break;
                }
            }

            if new_in_page == 0 {
                consecutive_seen += 1;
                debug!(consecutive_seen, max = MAX_CONSECUTIVE_SEEN, "no new papers in page");
            } else {
                consecutive_seen = 0;
            }

            start += request_size;

            if found.len() < request.max_results && consecutive_seen < MAX_CONSECUTIVE_SEEN {
                tokio::time::sleep(self.options.page_delay).await;
            }
        }

        info!(count = found.len(), "search completed");
        self.mark_seen(&found);
        Ok(found)
    }

    fn mark_seen(&mut self, papers: &[Paper]) {
        let now = Utc::now();
        for paper in papers {
            self.seen.mark_seen(&paper.id, now);
        }
        if let Err(e) = self.seen.flush() {
            warn!(error = %e, "unable to save seen registry");
        }
    }

    /// Look up one paper. Not finding it is a normal outcome (`Ok(None)`).
    pub async fn get_paper_by_id(&self, id: &str) -> Result<Option<Paper>, CatalogError> {
        if let Some(paper) = self.cache.as_ref().and_then(|c| c.get(id)) {
            debug!(id, "paper served from cache");
            return Ok(Some(paper));
        }

        let Some(entry) = self.catalog.lookup(id).await? else {
            info!(id, "paper not found in catalog");
            return Ok(None);
        };

        let paper = Paper::from_entry(entry);
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&paper) {
                warn!(id, error = %e, "unable to cache paper");
            }
        }
        Ok(Some(paper))
    }

    pub async fn pdf_url_for(&self, id: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.get_paper_by_id(id).await?.and_then(|p| p.pdf_url))
    }
}
