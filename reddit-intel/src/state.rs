use crate::types::{Corpus, IntelError, Report, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Serialize `value` as pretty JSON and replace `path` atomically: the data is
/// written to a temp file in the same directory, then renamed over the target.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| IntelError::storage(dir, e))?;

    let json = serde_json::to_vec_pretty(value).map_err(|e| IntelError::storage(path, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| IntelError::storage(dir, e))?;
    tmp.write_all(&json).map_err(|e| IntelError::storage(path, e))?;
    tmp.as_file().sync_all().map_err(|e| IntelError::storage(path, e))?;
    tmp.persist(path).map_err(|e| IntelError::storage(path, e.error))?;
    Ok(())
}

/// Read a JSON file. A missing file is `Ok(None)`; an unreadable or corrupt one is a storage error.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IntelError::storage(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| IntelError::storage(path, e))
}

/// Persisted reports, one file per focus area.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, focus_area: &str) -> PathBuf {
        self.dir.join(format!("report_{}.json", focus_area))
    }

    pub fn load(&self, focus_area: &str) -> Result<Option<Report>> {
        let path = self.path_for(focus_area);
        let report = read_json(&path)?;
        if report.is_some() {
            debug!(path = %path.display(), "Loaded existing report");
        }
        Ok(report)
    }

    pub fn save(&self, report: &Report) -> Result<PathBuf> {
        let path = self.path_for(&report.focus_area);
        write_json_atomic(&path, report)?;
        info!(path = %path.display(), records = report.records.len(), "Saved report");
        Ok(path)
    }
}

/// Scraped corpora, kept so analysis can be re-run without scraping again.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    dir: PathBuf,
}

impl CorpusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn prefix(focus_area: &str) -> String {
        format!("scrape_{}_", focus_area)
    }

    pub fn save(&self, corpus: &Corpus) -> Result<PathBuf> {
        let name = format!(
            "{}{}.json",
            Self::prefix(&corpus.focus_area),
            corpus.scraped_at.format("%Y%m%d_%H%M%S")
        );
        let path = self.dir.join(name);
        write_json_atomic(&path, corpus)?;
        info!(path = %path.display(), items = corpus.items.len(), "Saved corpus");
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<Corpus> {
        read_json(path)?.ok_or_else(|| IntelError::storage(path, "corpus file not found"))
    }

    /// Newest stored corpus for a focus area. Timestamped names sort chronologically.
    pub fn latest(&self, focus_area: &str) -> Result<Option<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IntelError::storage(&self.dir, e)),
        };

        let prefix = Self::prefix(focus_area);
        let mut newest: Option<(String, PathBuf)> = None;
        for entry in entries {
            let entry = entry.map_err(|e| IntelError::storage(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stamp) = name.strip_prefix(&prefix).and_then(|s| s.strip_suffix(".json")) else {
                continue;
            };
            // focus ids may share a prefix ("ai" vs "ai_tools"); stamps are all digits and one '_'
            if !stamp.chars().all(|c| c.is_ascii_digit() || c == '_') {
                continue;
            }
            if newest.as_ref().map_or(true, |(best, _)| name > *best) {
                newest = Some((name, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}
