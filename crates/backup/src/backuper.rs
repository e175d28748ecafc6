use crate::config::{BackupConfig, Strategy};
use crate::error::{ErrorKind, Result};
use crate::queue::{PendingItem, WorkQueue};
use crate::{aggregate, copy};
use spool_storage::BackendHandle;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;

/// What one run achieved.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Items that reached the target and left the pending set.
    pub transferred: usize,
    /// Items dropped because their source no longer existed.
    pub vanished: usize,
    /// Archives written by the aggregate strategy, in order.
    pub archives: Vec<PathBuf>,
    /// Items still pending after the run.
    pub remaining: usize,
}

/// State owned by whichever run holds the run lock.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    /// Items taken from the queue and not yet transferred, oldest first. What
    /// is left here at the end of a run is retried by the next one.
    pub(crate) in_progress: Vec<PendingItem>,
    /// Stamp of the last archive written, so names never repeat.
    pub(crate) last_stamp: Option<OffsetDateTime>,
}

/// Backs up files from a source backend to a target backend.
///
/// Producers [`add`](Self::add) finished files at any time from any thread;
/// each call to [`backup_now`](Self::backup_now) (usually driven by a
/// [`Scheduler`](crate::Scheduler)) moves everything pending to the target.
///
/// Two locks, always taken in this order:
/// 1. the run lock (async, held for the whole run) so runs never overlap;
/// 2. the queue lock (sync, held only to swap the list out) so `add` never
///    waits for a run.
pub struct Backuper {
    config: BackupConfig,
    source: BackendHandle,
    target: BackendHandle,
    queue: WorkQueue,
    run: Mutex<RunState>,
}

impl Backuper {
    pub fn new(config: BackupConfig, source: BackendHandle, target: BackendHandle) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            target,
            queue: WorkQueue::default(),
            run: Mutex::new(RunState::default()),
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Queue a finished file (path relative to the source backend) for the
    /// next run.
    pub fn add(&self, path: impl Into<PathBuf>, timestamp: OffsetDateTime) {
        self.queue.add(PendingItem::new(path, timestamp));
    }

    /// Items queued or left over from a failed run. Waits for a running
    /// backup to finish.
    pub async fn pending(&self) -> usize {
        let run = self.run.lock().await;
        run.in_progress.len() + self.queue.len()
    }

    /// Move every pending item to the target, within `budget`.
    ///
    /// Items that fail stay pending for the next call; nothing is dropped.
    /// Returns [`ErrorKind::Incomplete`] when some copies failed (one child
    /// error per failed item),
    /// [`ErrorKind::Connection`] when a backend is unreachable,
    /// [`ErrorKind::Timeout`] when the budget ran out, or the archive error
    /// that stopped aggregation.
    #[instrument(skip(self), fields(source = self.source.name(), target = self.target.name()))]
    pub async fn backup_now(&self, budget: Duration) -> Result<RunSummary> {
        let mut run = self.run.lock().await;
        run.in_progress.extend(self.queue.drain());
        // Stable: items with equal timestamps keep their queue order.
        run.in_progress.sort_by_key(|item| item.enqueued_at);
        if run.in_progress.is_empty() {
            tracing::debug!("nothing to back up");
            return Ok(RunSummary::default());
        }

        let total = run.in_progress.len();
        let ctx = RunContext::new(&self.config, &self.source, &self.target, budget);
        let result = match self.config.strategy {
            Strategy::Copy => copy::run(&ctx, &mut run.in_progress).await,
            Strategy::Aggregate => aggregate::run(&ctx, &mut run).await,
        };
        let remaining = run.in_progress.len();
        match result {
            Ok(mut summary) => {
                summary.remaining = remaining;
                tracing::info!(
                    total,
                    transferred = summary.transferred,
                    vanished = summary.vanished,
                    remaining,
                    "backup run complete"
                );
                Ok(summary)
            },
            Err(err) => {
                tracing::warn!(total, remaining, error = ?err, "backup run incomplete");
                Err(err)
            },
        }
    }

    /// Release pooled backend resources. Both backends are closed even if the
    /// first one fails.
    pub async fn close(&self) -> Result<()> {
        let source = self.source.close().await;
        let target = self.target.close().await;
        for (side, result) in [("source", source), ("target", target)] {
            if let Err(err) = result {
                tracing::warn!(side, error = ?err, "failed to close backend");
                return Err(crate::error::storage_failure(err, ErrorKind::Connection));
            }
        }
        Ok(())
    }
}

/// Borrowed view of a [`Backuper`] for the duration of one run.
pub(crate) struct RunContext<'a> {
    pub(crate) config: &'a BackupConfig,
    pub(crate) source: &'a BackendHandle,
    pub(crate) target: &'a BackendHandle,
    pub(crate) invoked_at: OffsetDateTime,
    deadline: Instant,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(
        config: &'a BackupConfig,
        source: &'a BackendHandle,
        target: &'a BackendHandle,
        budget: Duration,
    ) -> Self {
        Self {
            config,
            source,
            target,
            invoked_at: OffsetDateTime::now_utc(),
            deadline: Instant::now() + budget,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Run one unit of work under the item timeout, clipped to what is left
    /// of the run budget.
    pub(crate) async fn bounded<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            exn::bail!(ErrorKind::Timeout);
        }
        match tokio::time::timeout(remaining.min(self.config.item_timeout), work).await {
            Ok(result) => result,
            Err(_) => exn::bail!(ErrorKind::Timeout),
        }
    }

    /// Where a copied item lands in the target backend.
    pub(crate) fn destination_for(&self, path: &Path) -> PathBuf {
        let relative = match &self.config.strip_prefix {
            Some(prefix) => match path.strip_prefix(prefix) {
                Ok(rest) if !rest.as_os_str().is_empty() => rest,
                _ => path,
            },
            None => path,
        };
        match &self.config.target_root {
            Some(root) => root.join(relative),
            None => relative.to_path_buf(),
        }
    }

    /// Delete a transferred source if configured to. Failures are logged and
    /// never retried.
    pub(crate) async fn delete_source(&self, path: &Path) {
        if !self.config.delete_after_backup {
            return;
        }
        match self.bounded(async { Ok(self.source.delete(path).await) }).await {
            Ok(Ok(())) => tracing::debug!(path = %path.display(), "deleted source"),
            Ok(Err(err)) => tracing::warn!(path = %path.display(), error = ?err, "failed to delete source"),
            Err(err) => tracing::warn!(path = %path.display(), error = ?err, "failed to delete source"),
        }
    }
}
