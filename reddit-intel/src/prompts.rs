use crate::types::{AnalysisMode, Batch, Corpus, ItemKind, RawItem};
use crate::utils::truncate_chars;
use std::collections::BTreeSet;

/// A system/user message pair for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const OPPORTUNITIES_SYSTEM: &str = "You are a business intelligence analyst who identifies market \
opportunities in online discussions. Look for pain points and unmet needs, shortcomings of existing \
solutions, willingness to pay, and concrete product ideas with validation signals. Be specific and \
cite the ids of the posts and comments that support each finding. Output JSON that can be parsed \
programmatically.";

const NEWS_SYSTEM: &str = "You are a technology intelligence analyst. Extract the news, releases, \
notable updates, benchmarks, debates and adoption signals from online discussions that would be \
worth sharing with a technical audience. Prioritise recency and impact, and cite the ids of the \
posts and comments you used. Output JSON that can be parsed programmatically.";

const OPPORTUNITIES_SCHEMA: &str = r#"{
  "executive_summary": "2-3 sentence overview of the key findings",
  "opportunities": [
    {
      "title": "Opportunity name",
      "description": "What the opportunity is",
      "evidence": ["ids of the posts/comments that show demand"],
      "demand_signals": "Why there is demand (upvotes, frequency, sentiment)",
      "suggested_action": "The next concrete step to validate or pursue it",
      "competition": "Known competitors or alternatives mentioned",
      "difficulty": "low/medium/high",
      "potential": "low/medium/high",
      "priority": 7,
      "tags": ["relevant", "tags"]
    }
  ],
  "pain_points": [
    {
      "problem": "The pain point",
      "frequency": "How often it is mentioned",
      "severity": "low/medium/high",
      "current_solutions": "What people do today",
      "source_posts": ["ids of the posts/comments"]
    }
  ],
  "market_insights": [
    {"insight": "The insight", "evidence": "Supporting evidence", "actionable": true}
  ],
  "trending_topics": ["list", "of", "topics"],
  "recommended_actions": ["Specific action 1", "Specific action 2"]
}"#;

const NEWS_SCHEMA: &str = r#"{
  "executive_summary": "2-3 sentence overview of what is happening right now",
  "top_stories": [
    {
      "headline": "Concise news headline",
      "summary": "2-3 sentence summary of what happened",
      "importance": 1,
      "category": "release/update/research/tool/discussion/drama",
      "sentiment": "positive/negative/mixed",
      "sources": ["ids of the posts/comments this story comes from"],
      "links": ["external URLs mentioned"],
      "tags": ["relevant", "tags"]
    }
  ],
  "notable_releases": [
    {
      "name": "Project or model name",
      "description": "What it is",
      "why_notable": "Why it matters",
      "sources": ["ids of the posts/comments"],
      "links": ["project URL if mentioned"]
    }
  ],
  "trending_discussions": [
    {"topic": "What people are debating", "summary": "Key viewpoints", "sentiment": "positive/negative/mixed", "sources": ["ids"]}
  ],
  "tools_mentioned": [
    {"name": "Tool name", "mentions": "How many posts", "sentiment": "How people feel about it", "url": "Tool URL if available"}
  ],
  "key_takeaways": ["Shareable insight 1", "Shareable insight 2"]
}"#;

pub fn system_prompt(mode: AnalysisMode) -> &'static str {
    match mode {
        AnalysisMode::Opportunities => OPPORTUNITIES_SYSTEM,
        AnalysisMode::News => NEWS_SYSTEM,
    }
}

/// Render a batch for the model. Comments are listed under their post when
/// the post is in the same batch, otherwise on their own with the parent id.
pub fn format_items(items: &[RawItem]) -> String {
    let posts_in_batch: BTreeSet<&str> = items
        .iter()
        .filter(|i| i.kind == ItemKind::Post)
        .map(|i| i.id.as_str())
        .collect();

    let mut entries = Vec::new();
    for item in items {
        match item.kind {
            ItemKind::Post => {
                let mut entry = format!(
                    "### Post [id: {}] {}\n- Subreddit: r/{}\n- Upvotes: {} | Comments: {}\n- Flair: {}\n",
                    item.id,
                    item.title.as_deref().unwrap_or("(untitled)"),
                    item.community,
                    item.score,
                    item.num_comments.unwrap_or(0),
                    item.flair.as_deref().unwrap_or("None"),
                );
                if let Some(url) = &item.url {
                    entry.push_str(&format!("- URL: {url}\n"));
                }
                let body = if item.body.trim().is_empty() { "(no text)" } else { item.body.as_str() };
                entry.push_str(&format!("\nContent:\n{}\n", truncate_chars(body, 1500)));

                let comments: Vec<&RawItem> = items
                    .iter()
                    .filter(|c| c.kind == ItemKind::Comment && c.parent_id.as_deref() == Some(item.id.as_str()))
                    .collect();
                if !comments.is_empty() {
                    entry.push_str("\nTop Comments:\n");
                    for comment in comments {
                        entry.push_str(&format!(
                            "  - [id: {}] [{} upvotes] {}\n",
                            comment.id,
                            comment.score,
                            truncate_chars(&comment.body, 300)
                        ));
                    }
                }
                entries.push(entry);
            }
            ItemKind::Comment => {
                let parent = item.parent_id.as_deref().unwrap_or("");
                if posts_in_batch.contains(parent) {
                    continue;
                }
                entries.push(format!(
                    "### Comment [id: {}] on post {} in r/{}\n[{} upvotes] {}\n",
                    item.id,
                    parent,
                    item.community,
                    item.score,
                    truncate_chars(&item.body, 300)
                ));
            }
        }
    }
    entries.join("\n---\n")
}

/// Build the prompt for one batch of a corpus.
pub fn build_prompt(corpus: &Corpus, batch: &Batch) -> Prompt {
    let communities: BTreeSet<&str> = batch.items.iter().map(|i| i.community.as_str()).collect();
    let communities = communities.into_iter().collect::<Vec<_>>().join(", ");
    let keywords = corpus.keywords.join(", ");
    let (task, schema, key) = match corpus.mode {
        AnalysisMode::Opportunities => (
            "Analyze this data",
            OPPORTUNITIES_SCHEMA,
            "opportunities",
        ),
        AnalysisMode::News => ("Extract the key intelligence", NEWS_SCHEMA, "top_stories"),
    };

    let user = format!(
        "Analyze the following Reddit data from the \"{focus}\" focus area.\n\n\
         Focus Keywords: {keywords}\n\n\
         Here are {count} items from subreddits: {communities}\n\n\
         ---\n{content}\n---\n\n\
         {task} and return a JSON object with this structure:\n{schema}\n\n\
         Every entry must cite at least one item id from the data above. \
         If nothing qualifies, return the same object with an empty \"{key}\" array.\n\
         Return ONLY valid JSON, no markdown code blocks or other text.",
        focus = corpus.focus_name,
        count = batch.items.len(),
        content = format_items(&batch.items),
    );

    Prompt {
        system: system_prompt(corpus.mode).to_string(),
        user,
    }
}
