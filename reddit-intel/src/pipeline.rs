use crate::chunker::CorpusChunker;
use crate::config::Config;
use crate::fetcher::{RateLimitedFetcher, Transport};
use crate::ledger::{entry_for_call, UsageLedger};
use crate::llm_adapter::{complete_with_retry, GatewayError, ModelGateway, ProviderConfig};
use crate::merger::{apply_scan, merge, merge_secondary};
use crate::parser::ResponseParser;
use crate::prompts::build_prompt;
use crate::state::{CorpusStore, ReportStore};
use crate::types::{
    Corpus, FocusArea, InsightRecord, IntelError, Report, Result, RunSummary, ScanEntry, SecondaryFindings,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives one focus area through fetch, chunk, analyze and merge.
///
/// Batches run one at a time. The report is written once, after the merge,
/// so an interrupted run leaves the previous report in place.
pub struct Pipeline {
    config: Config,
    gateway: Arc<dyn ModelGateway>,
    ledger: Arc<dyn UsageLedger>,
    reports: ReportStore,
    corpora: CorpusStore,
}

impl Pipeline {
    pub fn new(config: Config, gateway: Arc<dyn ModelGateway>, ledger: Arc<dyn UsageLedger>) -> Self {
        let reports = ReportStore::new(config.paths.reports_dir.clone());
        let corpora = CorpusStore::new(config.paths.data_dir.clone());
        Self {
            config,
            gateway,
            ledger,
            reports,
            corpora,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    pub fn corpora(&self) -> &CorpusStore {
        &self.corpora
    }

    pub fn ledger(&self) -> &Arc<dyn UsageLedger> {
        &self.ledger
    }

    /// Scrape a focus area, store the corpus, then analyze it.
    pub async fn scan<T: Transport>(
        &self,
        fetcher: &RateLimitedFetcher<T>,
        focus_id: Option<&str>,
    ) -> Result<RunSummary> {
        let focus = self.config.focus_area(focus_id)?;
        info!(focus = %focus.id, communities = focus.communities.len(), "Starting scan");

        let corpus = fetcher.scrape_focus_area(&focus).await;
        info!(
            focus = %focus.id,
            posts = corpus.post_count(),
            items = corpus.items.len(),
            skipped = corpus.skipped_requests,
            "Scrape finished"
        );
        let corpus_path = self.corpora.save(&corpus)?;

        let mut summary = self.analyze(&corpus).await?;
        summary.corpus_path = Some(corpus_path);
        Ok(summary)
    }

    /// Analyze the most recently stored corpus for a focus area.
    pub async fn analyze_latest(&self, focus_id: Option<&str>) -> Result<RunSummary> {
        let focus = self.config.focus_area(focus_id)?;
        let path = self.corpora.latest(&focus.id)?.ok_or_else(|| {
            IntelError::storage(
                &self.config.paths.data_dir,
                format!("no stored corpus for '{}', run a scan first", focus.id),
            )
        })?;
        info!(path = %path.display(), "Analyzing stored corpus");

        let corpus = self.corpora.load(&path)?;
        let mut summary = self.analyze(&corpus).await?;
        summary.corpus_path = Some(path);
        Ok(summary)
    }

    /// Analyze a corpus and merge the results into its focus area's report.
    ///
    /// Malformed replies and batches that stay transient after retries are
    /// skipped. A fatal backend error aborts the run without touching the
    /// stored report, as does every batch failing.
    pub async fn analyze(&self, corpus: &Corpus) -> Result<RunSummary> {
        let focus = self.focus_for(corpus);
        let provider = ProviderConfig::resolve(&self.config.llm, focus.provider.as_deref())?;

        let existing = match self.reports.load(&focus.id)? {
            Some(report) => report,
            None => Report::new(&focus, Utc::now()),
        };

        let batches = CorpusChunker::new(self.config.llm.token_budget).chunk(&corpus.items);
        let parser = ResponseParser::new(corpus.mode);
        info!(
            focus = %focus.id,
            items = corpus.items.len(),
            batches = batches.len(),
            provider = provider.provider.name(),
            model = %provider.model,
            "Analyzing corpus"
        );

        let mut records: Vec<InsightRecord> = Vec::new();
        let mut secondary = SecondaryFindings::default();
        let mut executive_summary = String::new();
        let mut failed = 0;

        for batch in &batches {
            let prompt = build_prompt(corpus, batch);
            debug!(batch = batch.sequence, items = batch.items.len(), tokens = batch.estimated_tokens, "Sending batch");

            let completion = match complete_with_retry(
                self.gateway.as_ref(),
                &prompt,
                &provider,
                self.config.llm.max_retries,
            )
            .await
            {
                Ok(completion) => completion,
                Err(GatewayError::Transient(msg)) => {
                    warn!(batch = batch.sequence, error = %msg, "Backend still unavailable after retries, skipping batch");
                    failed += 1;
                    continue;
                }
                Err(GatewayError::Fatal(msg)) => {
                    error!(batch = batch.sequence, error = %msg, "Fatal backend error, aborting analysis");
                    return Err(IntelError::FatalBackend(msg));
                }
            };

            self.ledger
                .record(entry_for_call(&focus.id, &completion.model, completion.usage, completion.latency_ms))
                .await?;

            if completion.text.trim().is_empty() && completion.reasoning.is_some() {
                debug!(batch = batch.sequence, "Reply has reasoning content but no answer");
            }

            match parser.parse(&completion.text) {
                Ok(reply) => {
                    if reply.dropped > 0 {
                        warn!(batch = batch.sequence, dropped = reply.dropped, "Dropped incomplete records");
                    }
                    info!(batch = batch.sequence, records = reply.records.len(), "Batch analyzed");
                    if !reply.executive_summary.is_empty() {
                        executive_summary = reply.executive_summary;
                    }
                    records.extend(reply.records);
                    merge_secondary(&mut secondary, reply.secondary);
                }
                Err(e) => {
                    warn!(batch = batch.sequence, error = %e, "Skipping batch with unusable reply");
                    failed += 1;
                }
            }
        }

        if !batches.is_empty() && failed == batches.len() {
            return Err(IntelError::AllBatchesFailed { batches: failed });
        }

        let now = Utc::now();
        let outcome = merge(existing, records, now);
        let mut report = outcome.report;
        report.focus_name = focus.name.clone();
        let new_secondary = merge_secondary(&mut report.secondary, secondary);
        apply_scan(
            &mut report,
            ScanEntry {
                scanned_at: now,
                items_analyzed: corpus.items.len(),
                new_records: outcome.added,
                updated_records: outcome.updated,
                new_secondary,
                communities: corpus.communities.clone(),
            },
            &executive_summary,
        );
        let report_path = self.reports.save(&report)?;

        info!(
            focus = %focus.id,
            new = outcome.added,
            updated = outcome.updated,
            total = report.records.len(),
            failed_batches = failed,
            "Report updated"
        );

        Ok(RunSummary {
            focus_area: focus.id,
            items_analyzed: corpus.items.len(),
            batches: batches.len(),
            failed_batches: failed,
            skipped_requests: corpus.skipped_requests,
            new_records: outcome.added,
            updated_records: outcome.updated,
            new_secondary,
            total_records: report.records.len(),
            report_path,
            corpus_path: None,
        })
    }

    /// The configured focus area, or one rebuilt from the corpus if it has since been removed.
    fn focus_for(&self, corpus: &Corpus) -> FocusArea {
        self.config
            .focus_area(Some(&corpus.focus_area))
            .unwrap_or_else(|_| FocusArea {
                id: corpus.focus_area.clone(),
                name: corpus.focus_name.clone(),
                description: corpus.focus_description.clone(),
                mode: corpus.mode,
                communities: corpus.communities.clone(),
                keywords: corpus.keywords.clone(),
                provider: None,
            })
    }
}
