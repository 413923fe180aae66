use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::fingerprint;

/// How a focus area is analyzed. Determines the record shape and the ranking key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Opportunities,
    News,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Opportunities => "opportunities",
            AnalysisMode::News => "news",
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusArea {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: AnalysisMode,
    pub communities: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Post,
    Comment,
}

/// One fetched post or comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    pub community: String,
    pub kind: ItemKind,
    pub author: String,
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    pub score: i64,
    #[serde(default)]
    pub num_comments: Option<u64>,
    pub created_at: DateTime<Utc>,
    /// Post id for comments, `None` for posts.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub flair: Option<String>,
}

impl RawItem {
    /// Dedup key at the fetch layer.
    pub fn key(&self) -> String {
        format!("{}/{}", self.community, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Ids of the source items that show demand.
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub demand_signals: String,
    #[serde(default)]
    pub suggested_action: String,
    /// Known competitors or alternatives mentioned.
    #[serde(default)]
    pub competition: String,
    /// low/medium/high as judged by the model.
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub potential: String,
    /// 1 (weak) to 10 (strong).
    pub priority: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    pub fingerprint: String,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    /// 1 is the most important.
    pub importance: u8,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub fingerprint: String,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightRecord {
    Opportunity(Opportunity),
    News(NewsItem),
}

impl InsightRecord {
    pub fn mode(&self) -> AnalysisMode {
        match self {
            InsightRecord::Opportunity(_) => AnalysisMode::Opportunities,
            InsightRecord::News(_) => AnalysisMode::News,
        }
    }

    /// Title for opportunities, headline for news.
    pub fn primary_text(&self) -> &str {
        match self {
            InsightRecord::Opportunity(o) => &o.title,
            InsightRecord::News(n) => &n.headline,
        }
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            InsightRecord::Opportunity(o) => &o.fingerprint,
            InsightRecord::News(n) => &n.fingerprint,
        }
    }

    /// Recomputes the fingerprint from the primary text.
    pub fn refresh_fingerprint(&mut self) {
        let fp = fingerprint(self.primary_text());
        match self {
            InsightRecord::Opportunity(o) => o.fingerprint = fp,
            InsightRecord::News(n) => n.fingerprint = fp,
        }
    }

    pub fn sources(&self) -> &[String] {
        match self {
            InsightRecord::Opportunity(o) => &o.evidence,
            InsightRecord::News(n) => &n.sources,
        }
    }

    pub fn sources_mut(&mut self) -> &mut Vec<String> {
        match self {
            InsightRecord::Opportunity(o) => &mut o.evidence,
            InsightRecord::News(n) => &mut n.sources,
        }
    }

    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        match self {
            InsightRecord::Opportunity(o) => o.first_seen,
            InsightRecord::News(n) => n.first_seen,
        }
    }

    pub fn set_first_seen(&mut self, at: DateTime<Utc>) {
        match self {
            InsightRecord::Opportunity(o) => o.first_seen = Some(at),
            InsightRecord::News(n) => n.first_seen = Some(at),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PainPoint {
    pub problem: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub current_solutions: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketInsight {
    pub insight: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub actionable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub why_notable: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub topic: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMention {
    pub name: String,
    #[serde(default)]
    pub mentions: String,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Findings reported alongside the ranked records. The first four sections
/// belong to opportunity reports, the rest to news reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryFindings {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pain_points: Vec<PainPoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub market_insights: Vec<MarketInsight>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trending_topics: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recommended_actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notable_releases: Vec<Release>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trending_discussions: Vec<Discussion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools_mentioned: Vec<ToolMention>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key_takeaways: Vec<String>,
}

impl SecondaryFindings {
    pub fn is_empty(&self) -> bool {
        self.pain_points.is_empty()
            && self.market_insights.is_empty()
            && self.trending_topics.is_empty()
            && self.recommended_actions.is_empty()
            && self.notable_releases.is_empty()
            && self.trending_discussions.is_empty()
            && self.tools_mentioned.is_empty()
            && self.key_takeaways.is_empty()
    }
}

/// One entry per analysis run merged into a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub scanned_at: DateTime<Utc>,
    pub items_analyzed: usize,
    pub new_records: usize,
    pub updated_records: usize,
    /// Pain points for opportunity reports, releases for news reports.
    #[serde(default)]
    pub new_secondary: usize,
    #[serde(default)]
    pub communities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub focus_area: String,
    pub focus_name: String,
    pub mode: AnalysisMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of merge cycles applied to this report.
    pub total_scans: u32,
    #[serde(default)]
    pub total_items_analyzed: u64,
    #[serde(default)]
    pub communities: Vec<String>,
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub records: Vec<InsightRecord>,
    #[serde(default)]
    pub secondary: SecondaryFindings,
    #[serde(default)]
    pub scan_history: Vec<ScanEntry>,
}

impl Report {
    pub fn new(focus: &FocusArea, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("report_{}", focus.id),
            focus_area: focus.id.clone(),
            focus_name: focus.name.clone(),
            mode: focus.mode,
            created_at: now,
            updated_at: now,
            total_scans: 0,
            total_items_analyzed: 0,
            communities: Vec::new(),
            executive_summary: String::new(),
            records: Vec::new(),
            secondary: SecondaryFindings::default(),
            scan_history: Vec::new(),
        }
    }
}

/// Recent-call log capacity of the usage ledger.
pub const USAGE_LOG_CAPACITY: usize = 500;

/// Token counts reported by the backend for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl CallUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub focus_area: String,
    #[serde(default)]
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub latency_ms: u64,
}

/// Cumulative usage plus the most recent calls, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub totals: UsageCounters,
    #[serde(default)]
    pub requests: VecDeque<UsageEntry>,
}

impl UsageTotals {
    pub fn apply(&mut self, entry: UsageEntry) {
        self.totals.requests = self.totals.requests.saturating_add(1);
        self.totals.prompt_tokens = self.totals.prompt_tokens.saturating_add(entry.prompt_tokens);
        self.totals.completion_tokens = self
            .totals
            .completion_tokens
            .saturating_add(entry.completion_tokens);
        self.totals.total_tokens = self.totals.total_tokens.saturating_add(entry.total_tokens);

        self.requests.push_front(entry);
        self.requests.truncate(USAGE_LOG_CAPACITY);
    }
}
