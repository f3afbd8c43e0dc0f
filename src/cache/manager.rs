//! Build cache manager
//!
//! Guarantees a usable local copy of a requested build while keeping the
//! cache under its disk quota.
//!
//! # Layout
//!
//! ```text
//! <storage-path>/
//!   autobisect.db        ledger (builds, download_queue, in_use)
//!   builds/<prefix>/     materialized builds
//!   tmp/<prefix>.partial staging for in-flight fetches
//!   locks/<prefix>.lock  per-build advisory locks
//! ```
//!
//! # Protocol
//!
//! | Operation | Locks | Ledger |
//! |-----------|-------|--------|
//! | materialize (miss) | `flock` on the prefix for the whole fetch | queue row, then build row |
//! | acquire / release | none | `in_use` reference count |
//! | evict | non-blocking `flock`, busy builds skipped | row removed only if not in use |

use crate::build::BuildDescriptor;
use crate::cache::fetch::BuildFetcher;
use crate::cache::ledger::{CacheLedger, LedgerBuild, QueueStatus, LEDGER_FILENAME};
use crate::cache::lock::{DirLock, Owner};
use crate::error::{BisectError, BisectResult};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const BUILDS_DIR: &str = "builds";
const TMP_DIR: &str = "tmp";
const LOCKS_DIR: &str = "locks";
const PARTIAL_SUFFIX: &str = ".partial";
const EVICTED_SUFFIX: &str = ".evicted";

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Convert MB to bytes
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// Cache size status relative to the quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSizeStatus {
    /// Under 80% of quota
    Ok,
    /// Between 80% and 100% of quota
    Warning,
    /// At or over the quota
    Exceeded,
}

impl CacheSizeStatus {
    pub fn from_usage(current_bytes: u64, limit_bytes: u64) -> Self {
        if limit_bytes == 0 {
            return Self::Ok;
        }
        let percent = Self::percentage(current_bytes, limit_bytes);
        if percent >= 100.0 {
            Self::Exceeded
        } else if percent >= 80.0 {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    pub fn percentage(current_bytes: u64, limit_bytes: u64) -> f64 {
        if limit_bytes == 0 {
            return 0.0;
        }
        (current_bytes as f64 / limit_bytes as f64) * 100.0
    }
}

/// Settings the manager needs from the configuration
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Cache root directory
    pub storage_path: PathBuf,
    /// Keep builds across runs
    pub persist: bool,
    /// Quota in bytes; ignored when `persist` is false
    pub persist_limit: u64,
    /// Age after which another holder's ledger rows may be reclaimed
    pub stale_after_secs: u64,
}

/// A cached build as seen by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBuildRecord {
    pub prefix: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_access: DateTime<Utc>,
    pub in_use: bool,
}

/// Result of an eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionSummary {
    /// Prefixes removed, oldest first
    pub removed: Vec<String>,
    pub reclaimed_bytes: u64,
    /// Candidates skipped because they were in use
    pub protected: usize,
    /// Candidates skipped because another process held their lock
    pub busy: usize,
    /// Ledger total after the pass
    pub remaining_bytes: u64,
}

/// Repairs made while reconciling the ledger with the filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub dropped_rows: usize,
    pub adopted: usize,
    pub removed_leftovers: usize,
    pub reclaimed_queue: usize,
    pub reclaimed_holders: usize,
}

impl ReconcileSummary {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Façade over the storage directory and its ledger
pub struct BuildManager {
    settings: CacheSettings,
    ledger: CacheLedger,
    holder: String,
    fetcher: Option<Arc<dyn BuildFetcher>>,
}

impl BuildManager {
    /// Open the cache, bootstrapping the layout and reconciling the ledger
    pub fn open(settings: CacheSettings) -> BisectResult<Self> {
        for dir in [BUILDS_DIR, TMP_DIR, LOCKS_DIR] {
            let path = settings.storage_path.join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| BisectError::io(format!("creating {}", path.display()), e))?;
        }

        let ledger = CacheLedger::open(&settings.storage_path.join(LEDGER_FILENAME))?;
        let manager = Self {
            settings,
            ledger,
            holder: Owner::current().to_string(),
            fetcher: None,
        };

        let summary = manager.reconcile()?;
        if !summary.is_clean() {
            info!(
                dropped = summary.dropped_rows,
                adopted = summary.adopted,
                leftovers = summary.removed_leftovers,
                queue = summary.reclaimed_queue,
                holders = summary.reclaimed_holders,
                "Repaired build cache"
            );
        }

        if !manager.settings.persist {
            manager.purge_unused()?;
        }

        Ok(manager)
    }

    /// Attach the collaborator used on cache misses
    pub fn with_fetcher(mut self, fetcher: Arc<dyn BuildFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &CacheLedger {
        &self.ledger
    }

    /// Marker this manager writes into `in_use` rows
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Effective quota in bytes (0 when persistence is off)
    pub fn quota(&self) -> u64 {
        if self.settings.persist {
            self.settings.persist_limit
        } else {
            0
        }
    }

    /// Directory a build lives in once materialized
    pub fn build_dir(&self, build: &BuildDescriptor) -> PathBuf {
        self.build_dir_for(&build.prefix())
    }

    fn build_dir_for(&self, prefix: &str) -> PathBuf {
        self.settings.storage_path.join(BUILDS_DIR).join(prefix)
    }

    fn staging_dir_for(&self, prefix: &str) -> PathBuf {
        self.settings
            .storage_path
            .join(TMP_DIR)
            .join(format!("{}{}", prefix, PARTIAL_SUFFIX))
    }

    fn lock_path_for(&self, prefix: &str) -> PathBuf {
        self.settings
            .storage_path
            .join(LOCKS_DIR)
            .join(format!("{}.lock", prefix))
    }

    /// Ensure a local copy of `build` exists and return its directory.
    ///
    /// A ledger/filesystem mismatch triggers one reconcile and one retry.
    pub async fn materialize(&self, build: &BuildDescriptor) -> BisectResult<PathBuf> {
        match self.materialize_once(build).await {
            Err(BisectError::CacheCorruption(reason)) => {
                warn!("{}; reconciling cache and retrying", reason);
                self.reconcile()?;
                self.materialize_once(build).await
            }
            other => other,
        }
    }

    async fn materialize_once(&self, build: &BuildDescriptor) -> BisectResult<PathBuf> {
        let prefix = build.prefix();
        if let Some(path) = self.lookup(&prefix)? {
            return Ok(path);
        }

        let fetcher = self.fetcher.clone().ok_or_else(|| {
            BisectError::Configuration("no fetch collaborator configured".to_string())
        })?;

        let lock_path = self.lock_path_for(&prefix);
        let _lock = tokio::task::spawn_blocking(move || DirLock::acquire(&lock_path))
            .await
            .map_err(|e| BisectError::Internal(format!("lock task failed: {}", e)))??;

        // Another process may have produced it while we waited
        if let Some(path) = self.lookup(&prefix)? {
            return Ok(path);
        }

        let staging = self.staging_dir_for(&prefix);
        self.claim_queue(&prefix, &staging)?;

        let result = self.fetch_into_cache(build, &*fetcher, &staging).await;
        if result.is_err() {
            if staging.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                    warn!("Failed to remove staging dir {}: {}", staging.display(), e);
                }
            }
            self.ledger.dequeue(&prefix)?;
        }
        result
    }

    fn lookup(&self, prefix: &str) -> BisectResult<Option<PathBuf>> {
        let Some(_record) = self.ledger.build(prefix)? else {
            return Ok(None);
        };

        let dir = self.build_dir_for(prefix);
        if !dir.is_dir() {
            return Err(BisectError::CacheCorruption(format!(
                "ledger lists {} but {} is missing",
                prefix,
                dir.display()
            )));
        }

        self.ledger.touch(prefix, now_secs())?;
        debug!("Cache hit: {}", prefix);
        Ok(Some(dir))
    }

    /// Insert the queue row. Called with the prefix lock held, so a row that
    /// is already there belongs to a fetch that died.
    fn claim_queue(&self, prefix: &str, staging: &Path) -> BisectResult<()> {
        match self.ledger.enqueue(prefix, staging, &self.holder, now_secs()) {
            Err(BisectError::AlreadyInUse(_)) => {
                if let Some(entry) = self.ledger.queue_entry(prefix)? {
                    warn!(
                        "Reclaiming download of {} left by {} ({})",
                        prefix, entry.owner, entry.status
                    );
                }
                self.ledger.dequeue(prefix)?;
                self.ledger
                    .enqueue(prefix, staging, &self.holder, now_secs())
            }
            other => other,
        }
    }

    async fn fetch_into_cache(
        &self,
        build: &BuildDescriptor,
        fetcher: &dyn BuildFetcher,
        staging: &Path,
    ) -> BisectResult<PathBuf> {
        let prefix = build.prefix();
        let stage_err = |e: std::io::Error| BisectError::fetch(prefix.clone(), e.to_string());

        if staging.exists() {
            tokio::fs::remove_dir_all(staging).await.map_err(stage_err)?;
        }
        tokio::fs::create_dir_all(staging).await.map_err(stage_err)?;

        info!("Fetching {} via {}", prefix, fetcher.name());
        fetcher.fetch(build, staging).await?;

        self.ledger.set_queue_status(&prefix, QueueStatus::Finalizing)?;
        let size = dir_size(staging).map_err(|e| BisectError::fetch(prefix.clone(), e.to_string()))?;

        let dest = self.build_dir_for(&prefix);
        if dest.exists() {
            debug!("Replacing untracked directory {}", dest.display());
            tokio::fs::remove_dir_all(&dest).await.map_err(stage_err)?;
        }
        tokio::fs::rename(staging, &dest).await.map_err(stage_err)?;

        let now = now_secs();
        self.ledger.complete_download(&LedgerBuild {
            prefix: prefix.clone(),
            path: dest.clone(),
            size,
            last_access: now,
            created_at: now,
        })?;

        info!("Cached {} ({})", prefix, format_bytes(size));
        Ok(dest)
    }

    /// Mark `build` in use (shared, reference counted). The returned lease
    /// releases on drop.
    pub fn acquire(&self, build: &BuildDescriptor) -> BisectResult<BuildLease<'_>> {
        self.acquire_with(build, false)
    }

    /// Mark `build` in use, failing with `AlreadyInUse` if anyone else holds it
    pub fn acquire_exclusive(&self, build: &BuildDescriptor) -> BisectResult<BuildLease<'_>> {
        self.acquire_with(build, true)
    }

    fn acquire_with(&self, build: &BuildDescriptor, exclusive: bool) -> BisectResult<BuildLease<'_>> {
        self.ledger
            .acquire(&build.prefix(), &self.holder, exclusive, now_secs())?;
        debug!("Acquired {} (exclusive={})", build.prefix(), exclusive);
        Ok(BuildLease {
            manager: self,
            build: build.clone(),
            active: true,
        })
    }

    /// Drop one in-use reference. Without persistence the build is deleted
    /// once nobody holds it; with persistence an eviction pass follows.
    pub fn release(&self, build: &BuildDescriptor) -> BisectResult<()> {
        let prefix = build.prefix();
        let remaining = self.ledger.release(&prefix, &self.holder)?;
        debug!("Released {} ({} references left)", prefix, remaining);

        if remaining > 0 {
            return Ok(());
        }

        if self.settings.persist {
            if let Err(e) = self.evict() {
                warn!("Eviction pass failed: {}", e);
            }
        } else {
            match self.delete_build(&prefix) {
                Ok(Some(size)) => debug!("Discarded {} ({})", prefix, format_bytes(size)),
                Ok(None) => {}
                Err(e) => warn!("Failed to discard {}: {}", prefix, e),
            }
        }
        Ok(())
    }

    /// Cached builds, least recently used first
    pub fn enumerate(&self) -> BisectResult<Vec<CachedBuildRecord>> {
        let in_use: Vec<String> = self
            .ledger
            .in_use_entries()?
            .into_iter()
            .map(|e| e.prefix)
            .collect();

        Ok(self
            .ledger
            .builds()?
            .into_iter()
            .map(|b| CachedBuildRecord {
                in_use: in_use.contains(&b.prefix),
                path: self.build_dir_for(&b.prefix),
                last_access: DateTime::from_timestamp(b.last_access, 0).unwrap_or_default(),
                size: b.size,
                prefix: b.prefix,
            })
            .collect())
    }

    /// Bytes on disk for `build`, whether materialized or still staging
    pub fn current_size(&self, build: &BuildDescriptor) -> BisectResult<u64> {
        let prefix = build.prefix();
        for dir in [self.build_dir_for(&prefix), self.staging_dir_for(&prefix)] {
            if dir.is_dir() {
                return dir_size(&dir)
                    .map_err(|e| BisectError::io(format!("measuring {}", dir.display()), e));
            }
        }
        Ok(0)
    }

    /// Delete least recently used builds that nobody holds until the cache
    /// fits the quota or no candidates remain. No-op without persistence.
    pub fn evict(&self) -> BisectResult<EvictionSummary> {
        let mut summary = EvictionSummary::default();
        if !self.settings.persist {
            debug!("Persistence disabled, skipping eviction");
            return Ok(summary);
        }

        self.reclaim_stale_holders()?;

        let quota = self.quota();
        let mut total = self.ledger.total_size()?;
        if total <= quota {
            summary.remaining_bytes = total;
            return Ok(summary);
        }

        for build in self.ledger.builds()? {
            if total <= quota {
                break;
            }
            if self.ledger.is_in_use(&build.prefix)? {
                summary.protected += 1;
                continue;
            }
            match self.delete_build(&build.prefix)? {
                Some(size) => {
                    total = total.saturating_sub(size);
                    summary.reclaimed_bytes += size;
                    summary.removed.push(build.prefix);
                }
                None => summary.busy += 1,
            }
        }

        summary.remaining_bytes = total;
        if total > quota {
            warn!(
                remaining = %format_bytes(total),
                quota = %format_bytes(quota),
                protected = summary.protected,
                busy = summary.busy,
                "Cache still over quota after eviction"
            );
        } else {
            info!(
                removed = summary.removed.len(),
                reclaimed = %format_bytes(summary.reclaimed_bytes),
                "Evicted builds to fit quota"
            );
        }
        Ok(summary)
    }

    /// Remove every build nobody holds
    pub fn purge_unused(&self) -> BisectResult<EvictionSummary> {
        let mut summary = EvictionSummary::default();
        for build in self.ledger.builds()? {
            if self.ledger.is_in_use(&build.prefix)? {
                summary.protected += 1;
                continue;
            }
            match self.delete_build(&build.prefix)? {
                Some(size) => {
                    summary.reclaimed_bytes += size;
                    summary.removed.push(build.prefix);
                }
                None => summary.busy += 1,
            }
        }
        summary.remaining_bytes = self.ledger.total_size()?;
        Ok(summary)
    }

    /// Remove one build if it is neither locked nor in use. Returns its size.
    fn delete_build(&self, prefix: &str) -> BisectResult<Option<u64>> {
        let Some(_lock) = DirLock::try_acquire(&self.lock_path_for(prefix))? else {
            debug!("Skipping {}: locked by another process", prefix);
            return Ok(None);
        };
        let Some(record) = self.ledger.build(prefix)? else {
            return Ok(None);
        };
        if !self.ledger.remove_build_if_unused(prefix)? {
            return Ok(None);
        }

        let dir = self.build_dir_for(prefix);
        if dir.exists() {
            // Move aside first so a failed delete never looks like a build
            let trash = self
                .settings
                .storage_path
                .join(TMP_DIR)
                .join(format!("{}{}", prefix, EVICTED_SUFFIX));
            fs::rename(&dir, &trash)
                .map_err(|e| BisectError::io(format!("moving {} aside", dir.display()), e))?;
            if let Err(e) = fs::remove_dir_all(&trash) {
                warn!("Failed to delete {}: {}", trash.display(), e);
            }
        }
        debug!("Removed {} ({})", prefix, format_bytes(record.size));
        Ok(Some(record.size))
    }

    /// Bring ledger and filesystem back into agreement:
    ///
    /// - build rows without a directory are dropped
    /// - directories without a row are adopted with their measured size
    /// - leftover staging/evicted directories and dead queue rows are removed
    /// - stale in-use rows of other holders are reclaimed
    pub fn reconcile(&self) -> BisectResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        for build in self.ledger.builds()? {
            if !self.build_dir_for(&build.prefix).is_dir() {
                warn!("Dropping ledger row for missing build {}", build.prefix);
                self.ledger.remove_build(&build.prefix)?;
                summary.dropped_rows += 1;
            }
        }

        let builds_root = self.settings.storage_path.join(BUILDS_DIR);
        for (name, path) in list_dir(&builds_root)? {
            if self.ledger.build(&name)?.is_some() {
                continue;
            }
            let Some(_lock) = DirLock::try_acquire(&self.lock_path_for(&name))? else {
                continue;
            };
            if !path.is_dir() {
                warn!("Removing stray file {}", path.display());
                fs::remove_file(&path)
                    .map_err(|e| BisectError::io(format!("removing {}", path.display()), e))?;
                summary.removed_leftovers += 1;
                continue;
            }
            let size = dir_size(&path)
                .map_err(|e| BisectError::io(format!("measuring {}", path.display()), e))?;
            let modified = modified_secs(&path).unwrap_or_else(now_secs);
            warn!("Adopting untracked build {} ({})", name, format_bytes(size));
            self.ledger.insert_build(&LedgerBuild {
                prefix: name,
                path,
                size,
                last_access: modified,
                created_at: modified,
            })?;
            summary.adopted += 1;
        }

        let tmp_root = self.settings.storage_path.join(TMP_DIR);
        for (name, path) in list_dir(&tmp_root)? {
            let prefix = name
                .strip_suffix(PARTIAL_SUFFIX)
                .or_else(|| name.strip_suffix(EVICTED_SUFFIX))
                .unwrap_or(&name);
            let Some(_lock) = DirLock::try_acquire(&self.lock_path_for(prefix))? else {
                continue;
            };
            debug!("Removing leftover {}", path.display());
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| BisectError::io(format!("removing {}", path.display()), e))?;
            summary.removed_leftovers += 1;
        }

        for entry in self.ledger.queue_entries()? {
            if let Some(_lock) = DirLock::try_acquire(&self.lock_path_for(&entry.prefix))? {
                warn!(
                    "Dropping abandoned download of {} by {}",
                    entry.prefix, entry.owner
                );
                self.ledger.dequeue(&entry.prefix)?;
                summary.reclaimed_queue += 1;
            }
        }

        summary.reclaimed_holders = self.reclaim_stale_holders()?;
        Ok(summary)
    }

    fn reclaim_stale_holders(&self) -> BisectResult<usize> {
        let now = now_secs();
        let stale_after = self.settings.stale_after_secs;
        let mut reclaimed = 0;

        for entry in self.ledger.in_use_entries()? {
            if entry.holder == self.holder {
                continue;
            }
            let stale = match Owner::parse(&entry.holder) {
                Some(owner) => owner.is_stale(entry.acquired_at, now, stale_after),
                None => now.saturating_sub(entry.acquired_at) >= stale_after as i64,
            };
            if stale {
                warn!(
                    "Reclaiming stale in-use marker on {} held by {}",
                    entry.prefix, entry.holder
                );
                self.ledger.remove_in_use(&entry.prefix, &entry.holder)?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    /// Close the ledger. Idempotent.
    pub fn close(&self) -> BisectResult<()> {
        self.ledger.close()
    }
}

/// Scoped in-use marker. Releases on drop if not released explicitly, so
/// errors and cancelled futures still clear it.
#[must_use = "dropping a lease releases the build immediately"]
pub struct BuildLease<'a> {
    manager: &'a BuildManager,
    build: BuildDescriptor,
    active: bool,
}

impl BuildLease<'_> {
    pub fn build(&self) -> &BuildDescriptor {
        &self.build
    }

    /// Release now and surface any error
    pub fn release(mut self) -> BisectResult<()> {
        self.active = false;
        self.manager.release(&self.build)
    }
}

impl Drop for BuildLease<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.manager.release(&self.build) {
                warn!("Failed to release {}: {}", self.build.prefix(), e);
            }
        }
    }
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::from)?.len();
        }
    }
    Ok(total)
}

fn modified_secs(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    i64::try_from(secs).ok()
}

/// Entries of a directory as (file name, path), sorted by name
fn list_dir(dir: &Path) -> BisectResult<Vec<(String, PathBuf)>> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries = vec![];
    for entry in fs::read_dir(dir).map_err(|e| BisectError::io(format!("reading {}", dir.display()), e))? {
        let entry = entry.map_err(|e| BisectError::io(format!("reading {}", dir.display()), e))?;
        if let Some(name) = entry.file_name().to_str() {
            entries.push((name.to_string(), entry.path()));
        }
    }
    entries.sort();
    Ok(entries)
}
