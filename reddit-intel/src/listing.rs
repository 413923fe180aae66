use crate::types::{ItemKind, RawItem};
use crate::utils::truncate_chars;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const POST_BODY_MAX_CHARS: usize = 2000;
const COMMENT_BODY_MAX_CHARS: usize = 1000;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Thing {
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    num_comments: u64,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    stickied: bool,
    #[serde(default)]
    link_flair_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    permalink: String,
}

/// One decoded page of a community listing.
#[derive(Debug, Default)]
pub struct PostPage {
    pub posts: Vec<RawItem>,
    /// Children on the page before filtering; zero means the listing is exhausted.
    pub seen: usize,
    pub after: Option<String>,
}

fn timestamp(created_utc: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(created_utc as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Decode `/r/{community}.json`. Stickied posts and posts under `min_upvotes` are dropped.
pub fn parse_posts(value: Value, community: &str, min_upvotes: i64) -> serde_json::Result<PostPage> {
    let listing: Listing = serde_json::from_value(value)?;
    let seen = listing.data.children.len();
    let mut posts = Vec::new();

    for child in listing.data.children {
        if child.kind != "t3" {
            continue;
        }
        let post: PostData = match serde_json::from_value(child.data) {
            Ok(post) => post,
            Err(e) => {
                debug!(community, error = %e, "Skipping undecodable post");
                continue;
            }
        };
        if post.stickied || post.ups < min_upvotes {
            continue;
        }
        posts.push(RawItem {
            id: post.id,
            community: community.to_string(),
            kind: ItemKind::Post,
            author: post.author,
            title: Some(post.title),
            body: truncate_chars(&post.selftext, POST_BODY_MAX_CHARS),
            score: post.ups,
            num_comments: Some(post.num_comments),
            created_at: timestamp(post.created_utc),
            parent_id: None,
            url: (!post.permalink.is_empty()).then(|| format!("https://reddit.com{}", post.permalink)),
            flair: post.link_flair_text,
        });
    }

    Ok(PostPage {
        posts,
        seen,
        after: listing.data.after.filter(|a| !a.is_empty()),
    })
}

/// Decode `/r/{community}/comments/{post_id}.json`: a two-element array whose
/// second listing holds the comment tree. Only top-level `t1` comments are kept.
pub fn parse_comments(
    value: Value,
    community: &str,
    post_id: &str,
    max_comments: usize,
) -> serde_json::Result<Vec<RawItem>> {
    let listings: Vec<Listing> = serde_json::from_value(value)?;
    let Some(comment_listing) = listings.into_iter().nth(1) else {
        return Ok(Vec::new());
    };

    let comments = comment_listing
        .data
        .children
        .into_iter()
        .filter(|child| child.kind == "t1")
        .filter_map(|child| serde_json::from_value::<CommentData>(child.data).ok())
        .take(max_comments)
        .map(|comment| RawItem {
            id: comment.id,
            community: community.to_string(),
            kind: ItemKind::Comment,
            author: comment.author,
            title: None,
            body: truncate_chars(&comment.body, COMMENT_BODY_MAX_CHARS),
            score: comment.ups,
            num_comments: None,
            created_at: timestamp(comment.created_utc),
            parent_id: Some(post_id.to_string()),
            url: (!comment.permalink.is_empty())
                .then(|| format!("https://reddit.com{}", comment.permalink)),
            flair: None,
        })
        .collect();

    Ok(comments)
}
