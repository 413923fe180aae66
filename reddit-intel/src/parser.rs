use crate::types::{
    AnalysisMode, Discussion, InsightRecord, IntelError, MarketInsight, NewsItem, Opportunity, PainPoint,
    Release, Result, SecondaryFindings, ToolMention,
};
use crate::utils::{json_starts, leading_json_value, repair_json, strip_code_fences};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Reply marker a model may use instead of an empty JSON array.
pub const NO_INSIGHTS_MARKER: &str = "NO_INSIGHTS";

const OPPORTUNITY_KEYS: &[&str] = &["opportunities", "records", "items", "insights"];
const NEWS_KEYS: &[&str] = &["top_stories", "stories", "records", "items", "news"];
const SOURCE_KEYS: &[&str] = &["evidence", "source_ids", "sources", "source_posts", "reddit_url", "reddit_urls"];

const DEFAULT_PRIORITY: u8 = 5;
const DEFAULT_IMPORTANCE: u8 = 3;

/// Records recovered from one model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    pub records: Vec<InsightRecord>,
    pub executive_summary: String,
    pub secondary: SecondaryFindings,
    /// Entries present in the reply but missing a title/headline or any source.
    pub dropped: usize,
}

impl ParsedReply {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
    mode: AnalysisMode,
}

impl ResponseParser {
    pub fn new(mode: AnalysisMode) -> Self {
        Self { mode }
    }

    /// Parse a raw reply. Only fails when the reply is non-empty and nothing
    /// structured can be recovered from it.
    pub fn parse(&self, raw: &str) -> Result<ParsedReply> {
        let text = strip_code_fences(raw);
        if text.is_empty() {
            debug!("Empty model reply");
            return Ok(ParsedReply::default());
        }

        let Some(document) = decode_document(text) else {
            if text.contains(NO_INSIGHTS_MARKER) {
                return Ok(ParsedReply::default());
            }
            return Err(IntelError::MalformedOutput(format!(
                "no JSON object in reply: {}",
                crate::utils::truncate_chars(text, 200)
            )));
        };

        let keys = match self.mode {
            AnalysisMode::Opportunities => OPPORTUNITY_KEYS,
            AnalysisMode::News => NEWS_KEYS,
        };

        let (entries, executive_summary, secondary) = match &document {
            Value::Array(entries) => (entries.as_slice(), String::new(), SecondaryFindings::default()),
            Value::Object(map) => {
                let summary = map
                    .get("executive_summary")
                    .or_else(|| map.get("summary"))
                    .map(text_of)
                    .unwrap_or_default();
                let secondary = secondary_from(map, self.mode);
                match keys.iter().find_map(|k| map.get(*k).and_then(Value::as_array)) {
                    Some(entries) => (entries.as_slice(), summary, secondary),
                    None if text.contains(NO_INSIGHTS_MARKER) || !secondary.is_empty() => {
                        return Ok(ParsedReply {
                            executive_summary: summary,
                            secondary,
                            ..Default::default()
                        })
                    }
                    None => {
                        return Err(IntelError::MalformedOutput(format!(
                            "reply has no '{}' array",
                            keys[0]
                        )))
                    }
                }
            }
            _ => {
                return Err(IntelError::MalformedOutput(
                    "reply is neither an object nor an array".to_string(),
                ))
            }
        };

        let mut records = Vec::new();
        let mut dropped = 0;
        for (idx, entry) in entries.iter().enumerate() {
            let Some(fields) = entry.as_object() else {
                warn!(index = idx, "Dropping non-object record");
                dropped += 1;
                continue;
            };
            let record = match self.mode {
                AnalysisMode::Opportunities => opportunity_from(fields),
                AnalysisMode::News => news_from(fields),
            };
            match record {
                Some(record) => records.push(record),
                None => {
                    warn!(index = idx, mode = %self.mode, "Dropping record without a title or source reference");
                    dropped += 1;
                }
            }
        }

        if records.is_empty() && dropped > 0 {
            return Err(IntelError::MalformedOutput(format!(
                "all {} records were missing required fields",
                dropped
            )));
        }

        Ok(ParsedReply {
            records,
            executive_summary,
            secondary,
            dropped,
        })
    }
}

/// Convenience wrapper over [`ResponseParser`].
pub fn parse(raw: &str, mode: AnalysisMode) -> Result<ParsedReply> {
    ResponseParser::new(mode).parse(raw)
}

/// The first JSON document in the reply. Prose before and after it is
/// ignored; punctuation slips are repaired on a second attempt.
fn decode_document(text: &str) -> Option<Value> {
    for start in json_starts(text) {
        let tail = &text[start..];
        if let Some(value) = leading_json_value(tail).filter(is_document) {
            return Some(value);
        }
        if let Some(value) = leading_json_value(&repair_json(tail)).filter(is_document) {
            debug!(offset = start, "Recovered reply after JSON repair");
            return Some(value);
        }
    }
    debug!("Reply JSON could not be decoded");
    None
}

/// An object, or an array of objects. Rules out prose such as `[1]`.
fn is_document(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().all(Value::is_object),
        _ => false,
    }
}

fn opportunity_from(fields: &Map<String, Value>) -> Option<InsightRecord> {
    let title = first_text(fields, &["title", "name", "opportunity"])?;
    let evidence = source_ids(fields);
    if evidence.is_empty() {
        return None;
    }

    let mut record = InsightRecord::Opportunity(Opportunity {
        title,
        description: first_text(fields, &["description", "summary"]).unwrap_or_default(),
        evidence,
        demand_signals: first_text(fields, &["demand_signals", "demand_signal", "signals"]).unwrap_or_default(),
        suggested_action: first_text(fields, &["suggested_action", "next_step", "action"]).unwrap_or_default(),
        competition: first_text(fields, &["competition", "competitors", "alternatives"]).unwrap_or_default(),
        difficulty: first_text(fields, &["difficulty"]).unwrap_or_default(),
        potential: first_text(fields, &["potential"]).unwrap_or_default(),
        priority: fields
            .get("priority")
            .or_else(|| fields.get("score"))
            .and_then(parse_priority)
            .unwrap_or(DEFAULT_PRIORITY),
        tags: string_list(fields.get("tags")),
        fingerprint: String::new(),
        first_seen: None,
    });
    record.refresh_fingerprint();
    Some(record)
}

fn news_from(fields: &Map<String, Value>) -> Option<InsightRecord> {
    let headline = first_text(fields, &["headline", "title"])?;
    let sources = source_ids(fields);
    if sources.is_empty() {
        return None;
    }

    let mut record = InsightRecord::News(NewsItem {
        headline,
        summary: first_text(fields, &["summary", "description"]).unwrap_or_default(),
        importance: fields
            .get("importance")
            .or_else(|| fields.get("rank"))
            .and_then(parse_importance)
            .unwrap_or(DEFAULT_IMPORTANCE),
        category: first_text(fields, &["category"]).unwrap_or_default(),
        sentiment: first_text(fields, &["sentiment"]).unwrap_or_default(),
        sources,
        links: string_list(fields.get("links").or_else(|| fields.get("urls"))),
        tags: string_list(fields.get("tags")),
        fingerprint: String::new(),
        first_seen: None,
    });
    record.refresh_fingerprint();
    Some(record)
}

fn secondary_from(map: &Map<String, Value>, mode: AnalysisMode) -> SecondaryFindings {
    match mode {
        AnalysisMode::Opportunities => SecondaryFindings {
            pain_points: objects(map.get("pain_points"), |f| {
                Some(PainPoint {
                    problem: first_text(f, &["problem", "pain_point", "title"])?,
                    frequency: first_text(f, &["frequency"]).unwrap_or_default(),
                    severity: first_text(f, &["severity"]).unwrap_or_default(),
                    current_solutions: first_text(f, &["current_solutions", "workarounds"]).unwrap_or_default(),
                    sources: source_ids(f),
                })
            }),
            market_insights: objects(map.get("market_insights"), |f| {
                Some(MarketInsight {
                    insight: first_text(f, &["insight", "title"])?,
                    evidence: first_text(f, &["evidence"]).unwrap_or_default(),
                    actionable: f.get("actionable").is_some_and(truthy),
                })
            }),
            trending_topics: string_list(map.get("trending_topics")),
            recommended_actions: text_list(map.get("recommended_actions")),
            ..Default::default()
        },
        AnalysisMode::News => SecondaryFindings {
            notable_releases: objects(map.get("notable_releases"), |f| {
                Some(Release {
                    name: first_text(f, &["name", "title"])?,
                    description: first_text(f, &["description", "summary"]).unwrap_or_default(),
                    why_notable: first_text(f, &["why_notable"]).unwrap_or_default(),
                    sources: source_ids(f),
                    links: string_list(f.get("links").or_else(|| f.get("urls"))),
                })
            }),
            trending_discussions: objects(map.get("trending_discussions"), |f| {
                Some(Discussion {
                    topic: first_text(f, &["topic", "title"])?,
                    summary: first_text(f, &["summary"]).unwrap_or_default(),
                    sentiment: first_text(f, &["sentiment"]).unwrap_or_default(),
                    sources: source_ids(f),
                })
            }),
            tools_mentioned: objects(map.get("tools_mentioned"), |f| {
                Some(ToolMention {
                    name: first_text(f, &["name", "tool"])?,
                    mentions: first_text(f, &["mentions"]).unwrap_or_default(),
                    sentiment: first_text(f, &["sentiment"]).unwrap_or_default(),
                    url: first_text(f, &["url", "link"]),
                })
            }),
            key_takeaways: text_list(map.get("key_takeaways")),
            ..Default::default()
        },
    }
}

/// Entries of an array of objects that `build` accepts; anything else is skipped.
fn objects<T>(value: Option<&Value>, build: impl Fn(&Map<String, Value>) -> Option<T>) -> Vec<T> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).filter_map(&build).collect())
        .unwrap_or_default()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| fields.get(*k))
        .map(text_of)
        .find(|t| !t.is_empty())
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    }
}

/// Strings from an array, a single string, or a comma-separated string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::Object(obj) => ["url", "id", "name"]
                    .iter()
                    .find_map(|k| obj.get(*k))
                    .map(text_of)
                    .unwrap_or_default(),
                other => text_of(other),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Free-text entries from an array or a single string, never split on commas.
fn text_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(text_of).filter(|t| !t.is_empty()).collect(),
        Some(other) => Some(text_of(other)).filter(|t| !t.is_empty()).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Source references from any of the accepted keys, normalized to bare ids.
fn source_ids(fields: &Map<String, Value>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for key in SOURCE_KEYS {
        for raw in string_list(fields.get(*key)) {
            if let Some(id) = normalize_source(&raw) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

/// `https://reddit.com/r/x/comments/abc/...` -> `abc`, `[id: abc]` -> `abc`, `t3_abc` -> `abc`.
pub fn normalize_source(raw: &str) -> Option<String> {
    let mut s = raw.trim();

    if let Some(idx) = s.find("/comments/") {
        let rest = &s[idx + "/comments/".len()..];
        s = rest.split(['/', '?', '#']).next().unwrap_or("");
    }

    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        s = inner.trim();
    }
    if let Some(inner) = s.strip_prefix("id:") {
        s = inner.trim();
    }
    for prefix in ["t1_", "t3_"] {
        if let Some(inner) = s.strip_prefix(prefix) {
            s = inner;
        }
    }

    let s = s.trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace());
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_priority(value: &Value) -> Option<u8> {
    let score = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            match s.as_str() {
                "high" | "critical" => 8.0,
                "medium" | "moderate" => 5.0,
                "low" => 2.0,
                _ => match s.split_once('/') {
                    Some((num, den)) => {
                        let num: f64 = num.trim().parse().ok()?;
                        let den: f64 = den.trim().parse().ok()?;
                        if den <= 0.0 {
                            return None;
                        }
                        num / den * 10.0
                    }
                    None => s.parse().ok()?,
                },
            }
        }
        _ => return None,
    };
    // 0.8 means 8/10
    let score = if score > 0.0 && score < 1.0 { score * 10.0 } else { score };
    Some(score.round().clamp(1.0, 10.0) as u8)
}

fn parse_importance(value: &Value) -> Option<u8> {
    let rank = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "high" | "critical" => 1.0,
            "medium" => 2.0,
            "low" => 3.0,
            other => other.parse().ok()?,
        },
        _ => return None,
    };
    Some(rank.round().clamp(1.0, 10.0) as u8)
}
