use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "arxiv-digest.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_terms")]
    pub terms: Vec<String>,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_request_size")]
    pub request_size: usize,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            terms: default_terms(),
            categories: default_categories(),
            max_results: default_max_results(),
            request_size: default_request_size(),
            page_delay_ms: default_page_delay_ms(),
            endpoint: default_endpoint(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_terms() -> Vec<String> {
    vec![
        "interpretability".to_string(),
        "explainability".to_string(),
        "xai".to_string(),
    ]
}
fn default_categories() -> Vec<String> {
    vec!["cs.AI".to_string(), "cs.LG".to_string(), "cs.CL".to_string()]
}
fn default_max_results() -> usize {
    50
}
fn default_request_size() -> usize {
    20
}
fn default_page_delay_ms() -> u64 {
    1000
}
fn default_endpoint() -> String {
    crate::catalog::DEFAULT_ENDPOINT.to_string()
}
fn default_search_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_seen_file")]
    pub seen_file: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_digest_file")]
    pub digest_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            seen_file: default_seen_file(),
            cache_dir: default_cache_dir(),
            digest_file: default_digest_file(),
        }
    }
}

fn default_seen_file() -> PathBuf {
    PathBuf::from("seen_papers.json")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("paper_cache")
}
fn default_digest_file() -> PathBuf {
    PathBuf::from("digest.txt")
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    Anthropic,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: Provider,
    /// Defaults per provider when unset.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            host: default_host(),
            port: default_port(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            api_key_env: default_api_key_env(),
            max_document_chars: default_max_document_chars(),
        }
    }
}

impl LlmConfig {
    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, Provider::Ollama) => "llama3.2:latest",
            (None, Provider::Anthropic) => "claude-opus-4-20250514",
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_host() -> String {
    crate::llm::OLLAMA_DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    crate::llm::OLLAMA_DEFAULT_PORT
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_llm_retries() -> u32 {
    1
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_max_document_chars() -> usize {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RankingConfig {
    /// Blank disables ranking.
    #[serde(default)]
    pub interests: String,
    #[serde(default = "default_ranking_tokens")]
    pub max_tokens: u32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            interests: String::new(),
            max_tokens: default_ranking_tokens(),
        }
    }
}

impl RankingConfig {
    pub fn is_enabled(&self) -> bool {
        !self.interests.trim().is_empty()
    }
}

fn default_ranking_tokens() -> u32 {
    crate::recommend::DEFAULT_MAX_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_summary_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_summary_retries")]
    pub max_retries: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: default_summary_tokens(),
            max_retries: default_summary_retries(),
        }
    }
}

fn default_summary_tokens() -> u32 {
    crate::summarize::DEFAULT_MAX_TOKENS
}
fn default_summary_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub weekdays_only: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { weekdays_only: true }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Config::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.search.max_results == 0 {
            bail!("search.max_results must be > 0");
        }
        if self.search.request_size == 0 {
            bail!("search.request_size must be > 0");
        }
        if self.llm.max_document_chars == 0 {
            bail!("llm.max_document_chars must be > 0");
        }
        Ok(())
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.search.page_delay_ms)
    }
}
