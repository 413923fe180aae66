use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use interfaces::defs::{
    AnalysisMode, CallUsage, Discussion, FocusArea, InsightRecord, ItemKind, MarketInsight, NewsItem,
    Opportunity, PainPoint, RawItem, Release, Report, ScanEntry, SecondaryFindings, ToolMention,
    UsageCounters, UsageEntry, UsageTotals, USAGE_LOG_CAPACITY,
};

/// Scraper settings. Every field has a default so a partial `scraper:` block is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub base_url: String,
    pub posts_per_subreddit: usize,
    pub include_comments: bool,
    pub max_comments_per_post: usize,
    pub min_upvotes: i64,
    /// Seconds between requests within one community.
    pub delay_between_requests: f64,
    /// Seconds between communities.
    pub delay_between_subreddits: f64,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub backoff_base_seconds: u64,
    /// Listing pages requested per community before giving up on filling `posts_per_subreddit`.
    pub max_pages: usize,
    /// Keep only posts mentioning a focus keyword. Applied while paging, so
    /// filtered-out posts do not count toward `posts_per_subreddit`.
    pub keyword_filter: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "RedditIntel/1.0".to_string(),
            base_url: "https://www.reddit.com".to_string(),
            posts_per_subreddit: 25,
            include_comments: true,
            max_comments_per_post: 10,
            min_upvotes: 5,
            delay_between_requests: 3.0,
            delay_between_subreddits: 6.0,
            timeout_seconds: 30,
            max_retries: 3,
            backoff_base_seconds: 10,
            max_pages: 10,
            keyword_filter: false,
        }
    }
}

impl FetchConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_requests.max(0.0))
    }

    pub fn community_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_subreddits.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    Posts,
    Comments { post_id: String },
}

/// Items collected by one fetch, plus how many requests were given up on.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub items: Vec<RawItem>,
    pub skipped: usize,
}

/// Everything scraped for one focus area in one run. Persisted before analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    pub focus_area: String,
    pub focus_name: String,
    #[serde(default)]
    pub focus_description: String,
    #[serde(default)]
    pub mode: AnalysisMode,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub communities: Vec<String>,
    pub scraped_at: DateTime<Utc>,
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub skipped_requests: usize,
}

impl Corpus {
    pub fn post_count(&self) -> usize {
        self.items.iter().filter(|i| i.kind == ItemKind::Post).count()
    }
}

/// A bounded slice of the corpus sent as one model request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub sequence: usize,
    pub items: Vec<RawItem>,
    pub estimated_tokens: usize,
}

/// Outcome of one analysis run, returned to the caller for display.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub focus_area: String,
    pub items_analyzed: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub skipped_requests: usize,
    pub new_records: usize,
    pub updated_records: usize,
    /// Pain points (opportunities) or releases (news) added this run.
    pub new_secondary: usize,
    pub total_records: usize,
    pub report_path: PathBuf,
    pub corpus_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum IntelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rate limited: {url}")]
    RateLimited { url: String },

    #[error("Transient backend error: {0}")]
    TransientBackend(String),

    #[error("Fatal backend error: {0}")]
    FatalBackend(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("All {batches} batches failed")]
    AllBatchesFailed { batches: usize },

    #[error("Storage error at {}: {message}", path.display())]
    Storage { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown focus area: {0}")]
    UnknownFocusArea(String),
}

impl IntelError {
    pub fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        IntelError::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Rate limits, timeouts and refused connections may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            IntelError::RateLimited { .. } | IntelError::TransientBackend(_) => true,
            IntelError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IntelError>;
