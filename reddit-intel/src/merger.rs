use crate::types::{AnalysisMode, InsightRecord, NewsItem, Opportunity, Report, ScanEntry, SecondaryFindings};
use chrono::{DateTime, Utc};
use interfaces::fingerprint;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

const TRENDING_TOPICS_CAP: usize = 20;
const RECOMMENDED_ACTIONS_CAP: usize = 10;
const RELEASES_CAP: usize = 20;
const DISCUSSIONS_CAP: usize = 20;
const TOOLS_CAP: usize = 25;
const TAKEAWAYS_CAP: usize = 15;

/// Result of merging one run's records into a report.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub report: Report,
    /// Records appended because no existing record shared their fingerprint.
    pub added: usize,
    /// Existing records whose contents changed by absorbing a duplicate.
    pub updated: usize,
}

/// Merge `new_records` into `existing`.
///
/// Records are keyed by the fingerprint of their primary text. A duplicate
/// unions its sources, tags and links into the existing record, keeps the
/// stronger priority (or higher importance rank) and fills empty fields; new
/// records are appended with `first_seen = now`. The result is re-sorted by
/// the mode's ranking key, stable on ties, and the run count is incremented
/// whether or not anything changed.
///
/// Merging the same records twice leaves the record list unchanged the second
/// time; only `updated_at` and `total_scans` move.
pub fn merge(existing: Report, new_records: Vec<InsightRecord>, now: DateTime<Utc>) -> MergeOutcome {
    let mut report = existing;
    let mut added = 0;
    let mut updated = 0;

    // Stored reports written by hand or by older builds may hold duplicates.
    let stored = std::mem::take(&mut report.records);
    let mut index: HashMap<String, usize> = HashMap::with_capacity(stored.len());
    for mut record in stored {
        record.refresh_fingerprint();
        match index.get(record.fingerprint()) {
            Some(&pos) => {
                warn!(report = %report.id, record = record.primary_text(), "Folding duplicate stored record");
                absorb(&mut report.records[pos], record);
            }
            None => {
                index.insert(record.fingerprint().to_string(), report.records.len());
                report.records.push(record);
            }
        }
    }

    for mut record in new_records {
        if record.mode() != report.mode {
            warn!(
                report = %report.id,
                record = record.primary_text(),
                "Skipping record of the wrong kind for this report"
            );
            continue;
        }
        record.refresh_fingerprint();

        match index.get(record.fingerprint()) {
            Some(&pos) => {
                if absorb(&mut report.records[pos], record) {
                    updated += 1;
                }
            }
            None => {
                if record.first_seen().is_none() {
                    record.set_first_seen(now);
                }
                index.insert(record.fingerprint().to_string(), report.records.len());
                report.records.push(record);
                added += 1;
            }
        }
    }

    rank(&mut report.records, report.mode);
    report.updated_at = now;
    report.total_scans = report.total_scans.saturating_add(1);

    debug!(report = %report.id, added, updated, total = report.records.len(), "Merged records");

    MergeOutcome { report, added, updated }
}

/// Fold one run's secondary findings into `target`.
///
/// Entries are keyed by the fingerprint of their name (problem, insight,
/// release name, topic, tool name or the text itself); earlier entries win
/// and each capped section stops growing once full. Recommended actions are
/// kept newest first. Returns how many pain points or releases were added.
pub fn merge_secondary(target: &mut SecondaryFindings, incoming: SecondaryFindings) -> usize {
    let mut added = merge_keyed(&mut target.pain_points, incoming.pain_points, |p| p.problem.as_str(), None);
    merge_keyed(&mut target.market_insights, incoming.market_insights, |i| i.insight.as_str(), None);
    merge_keyed(&mut target.trending_topics, incoming.trending_topics, String::as_str, Some(TRENDING_TOPICS_CAP));

    let mut actions = Vec::new();
    merge_keyed(&mut actions, incoming.recommended_actions, String::as_str, None);
    merge_keyed(
        &mut actions,
        std::mem::take(&mut target.recommended_actions),
        String::as_str,
        Some(RECOMMENDED_ACTIONS_CAP),
    );
    target.recommended_actions = actions;

    added += merge_keyed(&mut target.notable_releases, incoming.notable_releases, |r| r.name.as_str(), Some(RELEASES_CAP));
    merge_keyed(
        &mut target.trending_discussions,
        incoming.trending_discussions,
        |d| d.topic.as_str(),
        Some(DISCUSSIONS_CAP),
    );
    merge_keyed(&mut target.tools_mentioned, incoming.tools_mentioned, |t| t.name.as_str(), Some(TOOLS_CAP));
    merge_keyed(&mut target.key_takeaways, incoming.key_takeaways, String::as_str, Some(TAKEAWAYS_CAP));
    added
}

/// Append entries whose key fingerprint is not present yet, up to `cap`.
fn merge_keyed<T>(target: &mut Vec<T>, incoming: Vec<T>, key: fn(&T) -> &str, cap: Option<usize>) -> usize {
    let cap = cap.unwrap_or(usize::MAX);
    let mut seen: HashSet<String> = target.iter().map(|item| fingerprint(key(item))).collect();
    let mut added = 0;
    for item in incoming {
        if target.len() >= cap {
            break;
        }
        if key(&item).trim().is_empty() {
            continue;
        }
        if seen.insert(fingerprint(key(&item))) {
            target.push(item);
            added += 1;
        }
    }
    target.truncate(cap);
    added
}

/// Record one analysis run's metadata on the report.
pub fn apply_scan(report: &mut Report, entry: ScanEntry, executive_summary: &str) {
    if !executive_summary.trim().is_empty() {
        report.executive_summary = executive_summary.trim().to_string();
    }
    report.total_items_analyzed = report
        .total_items_analyzed
        .saturating_add(entry.items_analyzed as u64);
    for community in &entry.communities {
        if !report.communities.contains(community) {
            report.communities.push(community.clone());
        }
    }
    report.scan_history.push(entry);
}

/// Stable sort: priority descending for opportunities, importance rank ascending for news.
fn rank(records: &mut [InsightRecord], mode: AnalysisMode) {
    match mode {
        AnalysisMode::Opportunities => records.sort_by_key(|r| match r {
            InsightRecord::Opportunity(o) => std::cmp::Reverse(o.priority),
            InsightRecord::News(_) => std::cmp::Reverse(0),
        }),
        AnalysisMode::News => records.sort_by_key(|r| match r {
            InsightRecord::News(n) => n.importance,
            InsightRecord::Opportunity(_) => u8::MAX,
        }),
    }
}

/// Fold `incoming` into `target`. Returns whether `target` changed.
fn absorb(target: &mut InsightRecord, incoming: InsightRecord) -> bool {
    match (target, incoming) {
        (InsightRecord::Opportunity(t), InsightRecord::Opportunity(i)) => absorb_opportunity(t, i),
        (InsightRecord::News(t), InsightRecord::News(i)) => absorb_news(t, i),
        _ => false,
    }
}

fn absorb_opportunity(target: &mut Opportunity, incoming: Opportunity) -> bool {
    let mut changed = union_into(&mut target.evidence, incoming.evidence);
    changed |= union_into(&mut target.tags, incoming.tags);
    if incoming.priority > target.priority {
        target.priority = incoming.priority;
        changed = true;
    }
    changed |= fill_empty(&mut target.description, incoming.description);
    changed |= fill_empty(&mut target.demand_signals, incoming.demand_signals);
    changed |= fill_empty(&mut target.suggested_action, incoming.suggested_action);
    changed |= fill_empty(&mut target.competition, incoming.competition);
    changed |= fill_empty(&mut target.difficulty, incoming.difficulty);
    changed |= fill_empty(&mut target.potential, incoming.potential);
    changed
}

fn absorb_news(target: &mut NewsItem, incoming: NewsItem) -> bool {
    let mut changed = union_into(&mut target.sources, incoming.sources);
    changed |= union_into(&mut target.links, incoming.links);
    changed |= union_into(&mut target.tags, incoming.tags);
    if incoming.importance < target.importance {
        target.importance = incoming.importance;
        changed = true;
    }
    changed |= fill_empty(&mut target.summary, incoming.summary);
    changed |= fill_empty(&mut target.category, incoming.category);
    changed |= fill_empty(&mut target.sentiment, incoming.sentiment);
    changed
}

fn union_into(target: &mut Vec<String>, incoming: Vec<String>) -> bool {
    let before = target.len();
    for value in incoming {
        if !target.contains(&value) {
            target.push(value);
        }
    }
    target.len() != before
}

fn fill_empty(target: &mut String, incoming: String) -> bool {
    if target.trim().is_empty() && !incoming.trim().is_empty() {
        *target = incoming;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FocusArea, PainPoint, Release};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn report(mode: AnalysisMode) -> Report {
        let focus = FocusArea {
            id: "saas".to_string(),
            name: "SaaS".to_string(),
            description: String::new(),
            mode,
            communities: vec!["saas".to_string()],
            keywords: Vec::new(),
            provider: None,
        };
        Report::new(&focus, t0())
    }

    fn opp(title: &str, evidence: &[&str], priority: u8) -> InsightRecord {
        InsightRecord::Opportunity(Opportunity {
            title: title.to_string(),
            description: String::new(),
            evidence: evidence.iter().map(|s| s.to_string()).collect(),
            demand_signals: String::new(),
            suggested_action: String::new(),
            competition: String::new(),
            difficulty: String::new(),
            potential: String::new(),
            priority,
            tags: Vec::new(),
            fingerprint: String::new(),
            first_seen: None,
        })
    }

    fn news(headline: &str, importance: u8) -> InsightRecord {
        InsightRecord::News(NewsItem {
            headline: headline.to_string(),
            summary: String::new(),
            importance,
            category: String::new(),
            sentiment: String::new(),
            sources: vec!["s1".to_string()],
            links: Vec::new(),
            tags: Vec::new(),
            fingerprint: String::new(),
            first_seen: None,
        })
    }

    fn titles(report: &Report) -> Vec<&str> {
        report.records.iter().map(|r| r.primary_text()).collect()
    }

    #[test]
    fn test_merge_appends_new_records() {
        let out = merge(report(AnalysisMode::Opportunities), vec![opp("A", &["1"], 5)], t0());
        assert_eq!(out.added, 1);
        assert_eq!(out.updated, 0);
        assert_eq!(out.report.total_scans, 1);
        assert_eq!(out.report.records[0].first_seen(), Some(t0()));
        assert!(!out.report.records[0].fingerprint().is_empty());
    }

    #[test]
    fn test_duplicates_union_evidence_and_keep_max_priority() {
        let first = merge(report(AnalysisMode::Opportunities), vec![opp("Invoice Tool", &["a", "b"], 4)], t0());
        let later = t0() + Duration::hours(6);
        let out = merge(first.report, vec![opp("  invoice   TOOL ", &["b", "c"], 9)], later);

        assert_eq!(out.added, 0);
        assert_eq!(out.updated, 1);
        assert_eq!(out.report.records.len(), 1);
        match &out.report.records[0] {
            InsightRecord::Opportunity(o) => {
                assert_eq!(o.title, "Invoice Tool");
                assert_eq!(o.evidence, vec!["a", "b", "c"]);
                assert_eq!(o.priority, 9);
                assert_eq!(o.first_seen, Some(t0()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(out.report.updated_at, later);
        assert_eq!(out.report.total_scans, 2);
    }

    #[test]
    fn test_lower_priority_duplicate_does_not_downgrade() {
        let first = merge(report(AnalysisMode::Opportunities), vec![opp("A", &["1"], 9)], t0());
        let out = merge(first.report, vec![opp("a", &["1"], 2)], t0());
        assert_eq!(out.updated, 0);
        match &out.report.records[0] {
            InsightRecord::Opportunity(o) => assert_eq!(o.priority, 9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_merge_is_idempotent_on_records() {
        let batch = vec![opp("A", &["1"], 3), opp("B", &["2"], 8), opp("a", &["3"], 1)];
        let once = merge(report(AnalysisMode::Opportunities), batch.clone(), t0());
        let twice = merge(once.report.clone(), batch, t0() + Duration::minutes(5));

        assert_eq!(twice.report.records, once.report.records);
        assert_eq!(twice.added, 0);
        assert_eq!(twice.updated, 0);
        assert_eq!(twice.report.total_scans, once.report.total_scans + 1);
    }

    #[test]
    fn test_duplicates_within_one_batch_collapse() {
        let out = merge(
            report(AnalysisMode::Opportunities),
            vec![opp("Same", &["1"], 3), opp("same", &["2"], 6)],
            t0(),
        );
        assert_eq!(out.added, 1);
        assert_eq!(out.report.records.len(), 1);
        assert_eq!(out.report.records[0].sources(), &["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_opportunities_rank_by_priority_stable() {
        let out = merge(
            report(AnalysisMode::Opportunities),
            vec![opp("low", &["1"], 2), opp("tie-first", &["2"], 7), opp("top", &["3"], 9), opp("tie-second", &["4"], 7)],
            t0(),
        );
        assert_eq!(titles(&out.report), vec!["top", "tie-first", "tie-second", "low"]);
    }

    #[test]
    fn test_news_rank_ascending_and_keeps_best_rank() {
        let first = merge(report(AnalysisMode::News), vec![news("Minor", 3), news("Big", 2)], t0());
        assert_eq!(titles(&first.report), vec!["Big", "Minor"]);

        let out = merge(first.report, vec![news("minor", 1)], t0());
        assert_eq!(titles(&out.report), vec!["Minor", "Big"]);
    }

    #[test]
    fn test_empty_merge_still_counts_a_run() {
        let out = merge(report(AnalysisMode::News), Vec::new(), t0() + Duration::days(1));
        assert_eq!(out.report.total_scans, 1);
        assert_eq!(out.report.updated_at, t0() + Duration::days(1));
        assert!(out.report.records.is_empty());
    }

    #[test]
    fn test_wrong_kind_is_skipped() {
        let out = merge(report(AnalysisMode::News), vec![opp("A", &["1"], 5)], t0());
        assert_eq!(out.added, 0);
        assert!(out.report.records.is_empty());
    }

    #[test]
    fn test_apply_scan_updates_metadata() {
        let mut r = report(AnalysisMode::Opportunities);
        r.executive_summary = "old".to_string();
        let entry = ScanEntry {
            scanned_at: t0(),
            items_analyzed: 40,
            new_records: 2,
            updated_records: 1,
            new_secondary: 0,
            communities: vec!["saas".to_string(), "startups".to_string()],
        };
        apply_scan(&mut r, entry.clone(), "");
        assert_eq!(r.executive_summary, "old");
        apply_scan(&mut r, entry, "new summary");
        assert_eq!(r.executive_summary, "new summary");
        assert_eq!(r.total_items_analyzed, 80);
        assert_eq!(r.communities, vec!["saas", "startups"]);
        assert_eq!(r.scan_history.len(), 2);
    }

    #[test]
    fn test_stored_duplicates_are_folded() {
        let mut stored = report(AnalysisMode::Opportunities);
        stored.records = vec![opp("Invoice tool", &["a"], 4), opp("B", &["x"], 6), opp("invoice  TOOL", &["b"], 8)];

        let out = merge(stored, Vec::new(), t0());
        assert_eq!(titles(&out.report), vec!["Invoice tool", "B"]);
        assert_eq!(out.report.records[0].sources(), &["a".to_string(), "b".to_string()]);
        assert_eq!(out.added, 0);
        assert_eq!(out.updated, 0);
    }

    fn pain(problem: &str) -> PainPoint {
        PainPoint {
            problem: problem.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_secondary_sections_dedup_by_key() {
        let mut target = SecondaryFindings {
            pain_points: vec![pain("Late payments")],
            trending_topics: vec!["invoicing".to_string()],
            recommended_actions: vec!["old action".to_string()],
            ..Default::default()
        };
        let added = merge_secondary(
            &mut target,
            SecondaryFindings {
                pain_points: vec![pain("late  PAYMENTS"), pain("Tax season stress"), pain("  ")],
                trending_topics: vec!["Invoicing".to_string(), "AI".to_string()],
                recommended_actions: vec!["new action".to_string(), "Old Action".to_string()],
                ..Default::default()
            },
        );
        assert_eq!(added, 1);
        let problems: Vec<&str> = target.pain_points.iter().map(|p| p.problem.as_str()).collect();
        assert_eq!(problems, vec!["Late payments", "Tax season stress"]);
        assert_eq!(target.trending_topics, vec!["invoicing", "AI"]);
        assert_eq!(target.recommended_actions, vec!["new action", "Old Action"]);
    }

    #[test]
    fn test_secondary_caps_keep_earlier_entries() {
        let mut target = SecondaryFindings::default();
        let releases = |prefix: &str| -> Vec<Release> {
            (0..15)
                .map(|i| Release {
                    name: format!("{prefix} {i}"),
                    ..Default::default()
                })
                .collect()
        };
        assert_eq!(merge_secondary(&mut target, SecondaryFindings { notable_releases: releases("first"), ..Default::default() }), 15);
        assert_eq!(merge_secondary(&mut target, SecondaryFindings { notable_releases: releases("second"), ..Default::default() }), 5);
        assert_eq!(target.notable_releases.len(), RELEASES_CAP);
        assert_eq!(target.notable_releases[0].name, "first 0");
        assert_eq!(target.notable_releases[19].name, "second 4");

        let takeaways: Vec<String> = (0..40).map(|i| format!("takeaway {i}")).collect();
        merge_secondary(&mut target, SecondaryFindings { key_takeaways: takeaways, ..Default::default() });
        assert_eq!(target.key_takeaways.len(), TAKEAWAYS_CAP);
    }
}
