// In-process stand-ins for the remote collaborators.
//
// Used by unit tests and by the integration tests under tests/.

use crate::catalog::{Catalog, CatalogError};
use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::paper::CatalogEntry;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// A minimal catalog record with an abstract, as the arXiv feed would return it.
pub fn entry(id: &str) -> CatalogEntry {
    CatalogEntry {
        entry_id: format!("http://arxiv.org/abs/{}", id),
        title: format!("Paper {}", id),
        summary: Some(format!("Abstract of {}.", id)),
        authors: vec!["A. Researcher".to_string()],
        categories: vec!["cs.LG".to_string()],
        ..Default::default()
    }
}

#[derive(Default)]
struct CatalogState {
    pages: Vec<Vec<CatalogEntry>>,
    entries: Vec<CatalogEntry>,
    fail_at: Option<usize>,
    page_calls: Vec<(usize, usize)>,
    lookup_calls: Vec<String>,
}

/// Serves page `n` for `start == n * max_results`; anything past the last
/// page is empty. Clones share state so calls stay observable after boxing.
#[derive(Clone, Default)]
pub struct StubCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl StubCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, page: Vec<CatalogEntry>) -> Self {
        self.state.lock().unwrap().pages.push(page);
        self
    }

    /// Entry returned by `lookup`.
    pub fn with_entry(self, entry: CatalogEntry) -> Self {
        self.state.lock().unwrap().entries.push(entry);
        self
    }

    /// Fail the page request starting at `start`.
    pub fn with_failure_at(self, start: usize) -> Self {
        self.state.lock().unwrap().fail_at = Some(start);
        self
    }

    pub fn page_calls(&self) -> Vec<(usize, usize)> {
        self.state.lock().unwrap().page_calls.clone()
    }

    pub fn lookup_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().lookup_calls.clone()
    }
}

#[async_trait]
impl Catalog for StubCatalog {
    async fn fetch_page(
        &self,
        _query: &str,
        start: usize,
        max_results: usize,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.page_calls.push((start, max_results));

        if state.fail_at == Some(start) {
            return Err(CatalogError::Status {
                status: 503,
                body: "rate limited".to_string(),
            });
        }

        let index = start / max_results.max(1);
        Ok(state.pages.get(index).cloned().unwrap_or_default())
    }

    async fn lookup(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.lookup_calls.push(id.to_string());
        Ok(state
            .entries
            .iter()
            .find(|e| e.entry_id.ends_with(&format!("/{}", id)))
            .cloned())
    }
}

#[derive(Default)]
struct LlmState {
    replies: Vec<Result<String, LlmError>>,
    requests: Vec<CompletionRequest>,
}

/// Answers completions from a queue of scripted replies, in order. An empty
/// queue answers with a transport error.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    state: Arc<Mutex<LlmState>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: &str) -> Self {
        self.state.lock().unwrap().replies.push(Ok(text.to_string()));
        self
    }

    pub fn with_error(self, error: LlmError) -> Self {
        self.state.lock().unwrap().replies.push(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        if state.replies.is_empty() {
            return Err(LlmError::Transport("no scripted reply".to_string()));
        }
        state.replies.remove(0)
    }
}
