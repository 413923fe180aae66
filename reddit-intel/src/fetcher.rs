use crate::listing::{parse_comments, parse_posts};
use crate::types::{Corpus, FetchConfig, FetchKind, FetchOutcome, FocusArea, IntelError, RawItem, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status and body of one HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// The read-only HTTP surface the fetcher needs.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }
}

/// Which pause to take before a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    BetweenRequests,
    BetweenCommunities,
}

pub struct RateLimitedFetcher<T = ReqwestTransport> {
    transport: T,
    config: FetchConfig,
}

impl RateLimitedFetcher<ReqwestTransport> {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self { transport, config })
    }
}

impl<T: Transport> RateLimitedFetcher<T> {
    pub fn with_transport(transport: T, config: FetchConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sleep for the base delay scaled by a random factor in [0.5, 1.5].
    pub async fn pause(&self, pace: Pace) {
        let base = match pace {
            Pace::BetweenRequests => self.config.request_delay(),
            Pace::BetweenCommunities => self.config.community_delay(),
        };
        if base.is_zero() {
            return;
        }
        let factor: f64 = rand::rng().random_range(0.5..=1.5);
        tokio::time::sleep(base.mul_f64(factor)).await;
    }

    fn retry_backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let base = Duration::from_secs(self.config.backoff_base_seconds);
        ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: base * 32,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// GET a JSON document. Rate limits and transient network failures are
    /// retried with exponential backoff (base, 2x base, 4x base) plus 1-5s of
    /// jitter. Returns `None` when the request is given up on; the caller skips it.
    pub async fn get_json(&self, url: &str, query: &[(String, String)]) -> Option<Value> {
        let mut backoff = self.retry_backoff();

        for attempt in 0..=self.config.max_retries {
            let retryable = match self.transport.get(url, query).await {
                Ok(reply) if reply.status == 429 => IntelError::RateLimited { url: url.to_string() },
                Ok(reply) if !(200..300).contains(&reply.status) => {
                    warn!(url, status = reply.status, "HTTP error, skipping request");
                    return None;
                }
                Ok(reply) => match serde_json::from_str(&reply.body) {
                    Ok(value) => return Some(value),
                    Err(e) => {
                        warn!(url, error = %e, "Malformed payload, skipping request");
                        return None;
                    }
                },
                Err(e) if e.is_retryable() => e,
                Err(e) => {
                    warn!(url, error = %e, "Request failed, skipping");
                    return None;
                }
            };

            if attempt == self.config.max_retries {
                warn!(url, error = %retryable, "Max retries exceeded, skipping request");
                break;
            }

            let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
            let jitter = Duration::from_secs_f64(rand::rng().random_range(1.0..=5.0));
            warn!(
                url,
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                wait_secs = (delay + jitter).as_secs_f64(),
                "{}, backing off",
                retryable
            );
            tokio::time::sleep(delay + jitter).await;
        }

        None
    }

    /// Fetch one community's posts (following the `after` cursor) or one post's
    /// comments. Never fails: requests that are given up on are counted in `skipped`.
    pub async fn fetch(&self, community: &str, kind: &FetchKind) -> FetchOutcome {
        match kind {
            FetchKind::Posts => self.fetch_posts(community, None).await,
            FetchKind::Comments { post_id } => self.fetch_comments(community, post_id).await,
        }
    }

    /// Page through a community listing. Stops once enough posts are kept,
    /// the listing is exhausted, the cursor stops advancing, or `max_pages`
    /// pages have been requested. `keywords` filters posts as they arrive.
    async fn fetch_posts(&self, community: &str, keywords: Option<&[String]>) -> FetchOutcome {
        let url = format!("{}/r/{}.json", self.config.base_url, community);
        let wanted = self.config.posts_per_subreddit;
        let page_limit = (wanted * 2).clamp(1, 100);

        let mut outcome = FetchOutcome::default();
        let mut seen = HashSet::new();
        let mut after: Option<String> = None;

        for page_no in 0..self.config.max_pages {
            if outcome.items.len() >= wanted {
                break;
            }
            if page_no > 0 {
                self.pause(Pace::BetweenRequests).await;
            }

            let mut query = vec![("limit".to_string(), page_limit.to_string())];
            if let Some(cursor) = &after {
                query.push(("after".to_string(), cursor.clone()));
            }

            let Some(value) = self.get_json(&url, &query).await else {
                outcome.skipped += 1;
                break;
            };

            let page = match parse_posts(value, community, self.config.min_upvotes) {
                Ok(page) => page,
                Err(e) => {
                    warn!(community, error = %e, "Unexpected listing shape, skipping page");
                    outcome.skipped += 1;
                    break;
                }
            };

            for post in page.posts {
                if outcome.items.len() >= wanted {
                    break;
                }
                if keywords.is_some_and(|k| !mentions_keyword(&post, k)) {
                    continue;
                }
                if seen.insert(post.key()) {
                    outcome.items.push(post);
                }
            }

            match page.after {
                Some(cursor) if page.seen > 0 && after.as_ref() != Some(&cursor) => after = Some(cursor),
                Some(_) if page.seen > 0 => {
                    debug!(community, "Listing cursor did not advance, stopping");
                    break;
                }
                _ => break,
            }
        }

        debug!(community, posts = outcome.items.len(), skipped = outcome.skipped, "Fetched posts");
        outcome
    }

    async fn fetch_comments(&self, community: &str, post_id: &str) -> FetchOutcome {
        let url = format!("{}/r/{}/comments/{}.json", self.config.base_url, community, post_id);
        let query = vec![
            ("limit".to_string(), self.config.max_comments_per_post.to_string()),
            ("sort".to_string(), "top".to_string()),
        ];

        let Some(value) = self.get_json(&url, &query).await else {
            return FetchOutcome { items: Vec::new(), skipped: 1 };
        };

        match parse_comments(value, community, post_id, self.config.max_comments_per_post) {
            Ok(items) => FetchOutcome { items, skipped: 0 },
            Err(e) => {
                warn!(community, post_id, error = %e, "Unexpected comment payload, skipping");
                FetchOutcome { items: Vec::new(), skipped: 1 }
            }
        }
    }

    /// Scrape every community of a focus area, pacing between requests and
    /// communities. Returns whatever was collected.
    pub async fn scrape_focus_area(&self, focus: &FocusArea) -> Corpus {
        let mut items: Vec<RawItem> = Vec::new();
        let mut seen = HashSet::new();
        let mut skipped = 0;
        let total = focus.communities.len();

        for (idx, community) in focus.communities.iter().enumerate() {
            info!("Scraping r/{} ({}/{})", community, idx + 1, total);

            let keywords = self.config.keyword_filter.then_some(focus.keywords.as_slice());
            let fetched = self.fetch_posts(community, keywords).await;
            skipped += fetched.skipped;
            let posts = fetched.items;
            let post_count = posts.len();

            for post in posts {
                let comments = if self.config.include_comments {
                    self.pause(Pace::BetweenRequests).await;
                    let kind = FetchKind::Comments { post_id: post.id.clone() };
                    let fetched = self.fetch(community, &kind).await;
                    skipped += fetched.skipped;
                    fetched.items
                } else {
                    Vec::new()
                };

                for item in std::iter::once(post).chain(comments) {
                    if seen.insert(item.key()) {
                        items.push(item);
                    }
                }
            }

            info!("Got {} posts from r/{}", post_count, community);

            if idx + 1 < total {
                self.pause(Pace::BetweenCommunities).await;
            }
        }

        if skipped > 0 {
            warn!(focus = %focus.id, skipped, "Some requests were skipped; corpus is partial");
        }

        Corpus {
            focus_area: focus.id.clone(),
            focus_name: focus.name.clone(),
            focus_description: focus.description.clone(),
            mode: focus.mode,
            keywords: focus.keywords.clone(),
            communities: focus.communities.clone(),
            scraped_at: Utc::now(),
            items,
            skipped_requests: skipped,
        }
    }
}

fn mentions_keyword(post: &RawItem, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", post.title.as_deref().unwrap_or(""), post.body).to_lowercase();
    keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
}
