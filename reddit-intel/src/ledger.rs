use crate::state::{read_json, write_json_atomic};
use crate::types::{CallUsage, IntelError, Result, UsageEntry, UsageTotals};
use async_trait::async_trait;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// Cumulative token and request accounting across every model call.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Add one call to the totals and the recent-call log.
    async fn record(&self, entry: UsageEntry) -> Result<()>;

    /// Replace the ledger with zeroed totals and an empty log.
    async fn reset(&self) -> Result<()>;

    async fn snapshot(&self) -> Result<UsageTotals>;
}

/// Build a ledger entry for one completed model call.
pub fn entry_for_call(focus_area: &str, model: &str, usage: CallUsage, latency_ms: u64) -> UsageEntry {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    UsageEntry {
        id,
        timestamp: Utc::now(),
        focus_area: focus_area.to_string(),
        model: model.to_string(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        latency_ms,
    }
}

/// In-process ledger, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryLedger {
    totals: Mutex<UsageTotals>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    async fn record(&self, entry: UsageEntry) -> Result<()> {
        self.totals.lock().await.apply(entry);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        *self.totals.lock().await = UsageTotals::default();
        Ok(())
    }

    async fn snapshot(&self) -> Result<UsageTotals> {
        Ok(self.totals.lock().await.clone())
    }
}

/// Ledger persisted as one JSON document. Each read-modify-write runs under an
/// in-process mutex and an exclusive lock file, so concurrent recorders in
/// other processes do not lose updates.
pub struct FileLedger {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "usage.json".into());
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<UsageTotals> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    /// Run `update` on the stored totals inside the critical section.
    async fn update<F>(&self, update: F) -> Result<UsageTotals>
    where
        F: FnOnce(&mut UsageTotals) + Send,
    {
        let _in_process = self.guard.lock().await;
        let _file_lock = LockFile::acquire(&self.lock_path).await?;

        let mut totals = self.load()?;
        update(&mut totals);
        write_json_atomic(&self.path, &totals)?;
        Ok(totals)
    }
}

#[async_trait]
impl UsageLedger for FileLedger {
    async fn record(&self, entry: UsageEntry) -> Result<()> {
        let tokens = entry.total_tokens;
        let totals = self.update(move |totals| totals.apply(entry)).await?;
        debug!(
            tokens,
            total_tokens = totals.totals.total_tokens,
            requests = totals.totals.requests,
            "Recorded usage"
        );
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.update(|totals| *totals = UsageTotals::default()).await?;
        info!(path = %self.path.display(), "Usage ledger reset");
        Ok(())
    }

    async fn snapshot(&self) -> Result<UsageTotals> {
        let _in_process = self.guard.lock().await;
        self.load()
    }
}

/// Exclusive lock file holding a per-holder token. Removed on drop only if
/// the token is still ours.
struct LockFile {
    path: PathBuf,
    token: String,
}

impl LockFile {
    async fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| IntelError::storage(dir, e))?;
        }
        let token = Uuid::new_v4().simple().to_string();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        let _ = std::fs::remove_file(path);
                        return Err(IntelError::storage(path, e));
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        break_stale(path);
                        continue;
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(IntelError::storage(path, e)),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(holder) if holder == self.token => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove ledger lock");
                }
            }
            _ => warn!(path = %self.path.display(), "Ledger lock was taken over, leaving it in place"),
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

/// Move a stale lock aside, then delete it. Several waiters can judge the
/// same lock stale; the rename lets only one of them take it, and a lock that
/// turns out to be fresh once moved (another waiter already replaced the
/// stale one) is linked back into place.
fn break_stale(path: &Path) {
    let mut aside = path.as_os_str().to_os_string();
    aside.push(format!(".stale-{}", Uuid::new_v4().simple()));
    let aside = PathBuf::from(aside);

    if std::fs::rename(path, &aside).is_err() {
        return;
    }
    if is_stale(&aside) {
        warn!(path = %path.display(), "Removing stale ledger lock");
    } else if let Err(e) = std::fs::hard_link(&aside, path) {
        warn!(path = %path.display(), error = %e, "Could not restore a live ledger lock");
    }
    let _ = std::fs::remove_file(&aside);
}
