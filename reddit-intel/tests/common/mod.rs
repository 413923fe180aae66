#![allow(dead_code)]

// Scripted collaborators and fixtures shared by the integration tests
pub use reddit_intel::fetcher::{HttpReply, RateLimitedFetcher, Transport};
pub use reddit_intel::llm_adapter::{Completion, GatewayError, ModelGateway, ProviderConfig};
pub use reddit_intel::prompts::Prompt;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reddit_intel::config::{Config, FocusAreaConfig, LlmSettings, PathSettings};
use reddit_intel::types::{AnalysisMode, CallUsage, Corpus, FetchConfig, IntelError, ItemKind, RawItem};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const TEST_BASE_URL: &str = "http://reddit.test";

/// One scripted transport outcome. `Fail` surfaces as a retryable network error.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(HttpReply),
    Fail(String),
}

impl Scripted {
    pub fn ok(body: impl Into<String>) -> Self {
        Scripted::Reply(HttpReply::new(200, body))
    }

    pub fn status(status: u16) -> Self {
        Scripted::Reply(HttpReply::new(status, ""))
    }
}

/// Transport that replays queued replies per URL and records every request.
/// URLs with nothing queued answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, url: &str, reply: Scripted) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(u, _)| u == url).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> reddit_intel::Result<HttpReply> {
        self.calls.lock().unwrap().push((url.to_string(), query.to_vec()));
        let next = self.replies.lock().unwrap().get_mut(url).and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Fail(msg)) => Err(IntelError::TransientBackend(msg)),
            None => Ok(HttpReply::new(404, "")),
        }
    }
}

/// Gateway that replays queued completions, then repeats `fallback` if set.
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<Completion, GatewayError>>>,
    fallback: Option<Completion>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<Result<Completion, GatewayError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(completion(text, 100, 50)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn gateway_name(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, prompt: &Prompt, _config: &ProviderConfig) -> Result<Completion, GatewayError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(GatewayError::Fatal("no scripted reply left".to_string())),
        }
    }
}

pub fn completion(text: &str, prompt_tokens: u64, completion_tokens: u64) -> Completion {
    Completion {
        text: text.to_string(),
        reasoning: None,
        usage: CallUsage::new(prompt_tokens, completion_tokens),
        model: "test-model".to_string(),
        latency_ms: 5,
    }
}

/// Scraper settings with no pacing delays, pointed at [`TEST_BASE_URL`].
pub fn fetch_config() -> FetchConfig {
    FetchConfig {
        base_url: TEST_BASE_URL.to_string(),
        posts_per_subreddit: 5,
        include_comments: false,
        min_upvotes: 0,
        delay_between_requests: 0.0,
        delay_between_subreddits: 0.0,
        max_retries: 3,
        backoff_base_seconds: 10,
        ..Default::default()
    }
}

pub fn listing_url(community: &str) -> String {
    format!("{}/r/{}.json", TEST_BASE_URL, community)
}

pub fn comments_url(community: &str, post_id: &str) -> String {
    format!("{}/r/{}/comments/{}.json", TEST_BASE_URL, community, post_id)
}

/// A `/r/{sub}.json` page with one post per `(id, upvotes)`.
pub fn listing_json(community: &str, posts: &[(&str, i64)], after: Option<&str>) -> String {
    let children: Vec<_> = posts
        .iter()
        .map(|(id, ups)| {
            json!({
                "kind": "t3",
                "data": {
                    "id": id,
                    "title": format!("Post {id}"),
                    "selftext": format!("Looking for a tool that handles {id}"),
                    "author": "poster",
                    "ups": ups,
                    "num_comments": 2,
                    "permalink": format!("/r/{community}/comments/{id}/post/"),
                    "created_utc": 1_700_000_000.0
                }
            })
        })
        .collect();
    json!({"kind": "Listing", "data": {"children": children, "after": after}}).to_string()
}

pub fn comments_json(post_id: &str, comment_ids: &[&str]) -> String {
    let comments: Vec<_> = comment_ids
        .iter()
        .map(|id| json!({"kind": "t1", "data": {"id": id, "body": format!("I would pay for {post_id}"), "author": "c", "ups": 3}}))
        .collect();
    json!([
        {"kind": "Listing", "data": {"children": []}},
        {"kind": "Listing", "data": {"children": comments}}
    ])
    .to_string()
}

pub fn raw_post(id: &str, body_len: usize) -> RawItem {
    RawItem {
        id: id.to_string(),
        community: "saas".to_string(),
        kind: ItemKind::Post,
        author: "poster".to_string(),
        title: Some(format!("Post {id}")),
        body: "x".repeat(body_len),
        score: 10,
        num_comments: Some(0),
        created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        parent_id: None,
        url: None,
        flair: None,
    }
}

pub fn corpus(items: Vec<RawItem>) -> Corpus {
    Corpus {
        focus_area: "saas".to_string(),
        focus_name: "SaaS Ideas".to_string(),
        focus_description: String::new(),
        mode: AnalysisMode::Opportunities,
        keywords: vec!["invoice".to_string()],
        communities: vec!["saas".to_string()],
        scraped_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        items,
        skipped_requests: 0,
    }
}

/// A one-focus-area config whose stores live under `root`.
pub fn test_config(root: &Path, token_budget: usize) -> Config {
    let mut focus_areas = BTreeMap::new();
    focus_areas.insert(
        "saas".to_string(),
        FocusAreaConfig {
            name: "SaaS Ideas".to_string(),
            description: String::new(),
            mode: AnalysisMode::Opportunities,
            subreddits: vec!["saas".to_string()],
            keywords: vec!["invoice".to_string()],
            provider: None,
        },
    );
    Config {
        focus_areas,
        default_focus: Some("saas".to_string()),
        scraper: fetch_config(),
        llm: LlmSettings {
            provider: "ollama".to_string(),
            token_budget,
            max_retries: 0,
            ..Default::default()
        },
        paths: PathSettings {
            data_dir: root.join("data"),
            reports_dir: root.join("reports"),
        },
    }
}

pub const TWO_OPPORTUNITIES: &str = r#"{
  "executive_summary": "Freelancers want simpler invoicing.",
  "opportunities": [
    {"title": "Invoice automation for freelancers", "evidence": ["p1"], "priority": 8},
    {"title": "Late payment reminders", "evidence": ["p2"], "priority": 6}
  ]
}"#;
