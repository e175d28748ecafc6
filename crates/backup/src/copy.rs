//! Direct copy strategy: every pending file is copied on its own, bytes
//! untouched, so a `.gz` source stays a `.gz` destination.

use crate::backuper::{RunContext, RunSummary};
use crate::error::{Error, ErrorKind, Result, storage_failure};
use crate::queue::PendingItem;
use exn::ResultExt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Copy the batch in order. Transferred items are removed from `batch`;
/// failed ones stay, so afterwards `batch` is exactly the failed subset plus
/// anything not reached.
///
/// Per-item failures don't stop the pass. They come back together as the
/// children of one [`ErrorKind::Incomplete`].
pub(crate) async fn run(ctx: &RunContext<'_>, batch: &mut Vec<PendingItem>) -> Result<RunSummary> {
    let total = batch.len();
    let mut summary = RunSummary::default();
    let mut failures = Vec::new();
    let mut cursor = 0;
    while cursor < batch.len() {
        let path = batch[cursor].path.clone();
        let destination = ctx.destination_for(&path);
        match ctx.bounded(copy_item(ctx, &path, &destination)).await {
            Ok(bytes) => {
                tracing::info!(source = %path.display(), destination = %destination.display(), bytes, "copied");
                batch.remove(cursor);
                summary.transferred += 1;
                ctx.delete_source(&path).await;
            },
            Err(err) if matches!(&*err, ErrorKind::Connection) => {
                tracing::error!(source = %path.display(), error = ?err, "backend unreachable, stopping run");
                return Err(err);
            },
            Err(err) if matches!(&*err, ErrorKind::Timeout) && ctx.expired() => {
                tracing::warn!(remaining = batch.len(), "run budget exhausted");
                return Err(err);
            },
            Err(err) => {
                tracing::warn!(source = %path.display(), error = ?err, "copy failed, will retry next run");
                failures.push(err);
                cursor += 1;
            },
        }
    }
    match batch.len() {
        0 => Ok(summary),
        failed => {
            tracing::info!(transferred = summary.transferred, failed, "copy pass finished with failures");
            Err(Error::raise_all(ErrorKind::Incomplete { failed, total }, failures))
        },
    }
}

async fn copy_item(ctx: &RunContext<'_>, path: &Path, destination: &Path) -> Result<u64> {
    if !ctx.config.overwrite {
        let taken = ctx
            .target
            .exists(destination)
            .await
            .map_err(|e| storage_failure(e, ErrorKind::Destination(destination.to_path_buf())))?;
        if taken {
            exn::bail!(ErrorKind::Exists(destination.to_path_buf()));
        }
    }

    let mut reader = ctx
        .source
        .reader(path)
        .await
        .map_err(|e| storage_failure(e, ErrorKind::Transfer(path.to_path_buf())))?;
    let mut writer = ctx
        .target
        .writer(destination)
        .await
        .map_err(|e| storage_failure(e, ErrorKind::Destination(destination.to_path_buf())))?;

    let source: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<u64> {
        let copied = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(copied)
    })
    .await
    .or_raise(|| ErrorKind::Task)?
    .or_raise(|| ErrorKind::Transfer(source))
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::{BackupConfig, Backuper, Strategy};
    use spool_storage::BackendHandle;
    use spool_storage::backend::MockBackend;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use time::macros::datetime;

    const BUDGET: Duration = Duration::from_secs(10);

    fn copying(config: BackupConfig, source: &Arc<MockBackend>, target: &Arc<MockBackend>) -> Backuper {
        let config = BackupConfig {
            strategy: Strategy::Copy,
            ..config
        };
        let source: BackendHandle = source.clone();
        let target: BackendHandle = target.clone();
        Backuper::new(config, source, target).unwrap()
    }

    #[tokio::test]
    async fn bytes_are_copied_untouched() {
        let source = Arc::new(MockBackend::with_files([("spool/2024/a.pb.gz", b"not really gzip".to_vec())]));
        let target = Arc::new(MockBackend::default());
        let config = BackupConfig {
            strip_prefix: Some(PathBuf::from("spool")),
            target_root: Some(PathBuf::from("backup")),
            ..BackupConfig::default()
        };
        let backuper = copying(config, &source, &target);
        backuper.add("spool/2024/a.pb.gz", datetime!(2024-01-01 10:00 UTC));

        let summary = backuper.backup_now(BUDGET).await.unwrap();
        assert_eq!(summary.transferred, 1);
        assert!(summary.archives.is_empty());
        assert_eq!(target.contents("backup/2024/a.pb.gz").unwrap(), b"not really gzip");
        assert!(source.contents("spool/2024/a.pb.gz").is_some());
    }

    #[tokio::test]
    async fn failed_items_are_retried_next_run() {
        let source = Arc::new(MockBackend::with_files([
            ("a.pb", b"a".to_vec()),
            ("b.pb", b"b".to_vec()),
            ("c.pb", b"c".to_vec()),
        ]));
        let target = Arc::new(MockBackend::default());
        let backuper = copying(BackupConfig::default(), &source, &target);
        backuper.add("a.pb", datetime!(2024-01-01 10:00 UTC));
        backuper.add("b.pb", datetime!(2024-01-01 10:01 UTC));
        backuper.add("c.pb", datetime!(2024-01-01 10:02 UTC));
        source.fail_path("b.pb");

        let err = backuper.backup_now(BUDGET).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Incomplete { failed: 1, total: 3 }));
        let failures = err.frame().children();
        assert_eq!(failures.len(), 1);
        let failure = failures[0].error().downcast_ref::<ErrorKind>().unwrap();
        assert!(matches!(failure, ErrorKind::Transfer(path) if path == &PathBuf::from("b.pb")));
        assert_eq!(backuper.pending().await, 1);
        assert_eq!(target.paths(), vec![PathBuf::from("a.pb"), PathBuf::from("c.pb")]);

        source.heal_path("b.pb");
        let summary = backuper.backup_now(BUDGET).await.unwrap();
        assert_eq!(summary.transferred, 1);
        assert_eq!(summary.remaining, 0);
        assert_eq!(target.contents("b.pb").unwrap(), b"b");
    }

    #[tokio::test]
    async fn existing_destination_is_kept_without_overwrite() {
        let source = Arc::new(MockBackend::with_files([("a.pb", b"new".to_vec())]));
        let target = Arc::new(MockBackend::with_files([("a.pb", b"old".to_vec())]));
        let config = BackupConfig {
            overwrite: false,
            ..BackupConfig::default()
        };
        let backuper = copying(config, &source, &target);
        backuper.add("a.pb", datetime!(2024-01-01 10:00 UTC));

        let err = backuper.backup_now(BUDGET).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Incomplete { failed: 1, total: 1 }));
        let failure = err.frame().children()[0].error().downcast_ref::<ErrorKind>().unwrap();
        assert!(matches!(failure, ErrorKind::Exists(path) if path == &PathBuf::from("a.pb")));
        assert_eq!(target.contents("a.pb").unwrap(), b"old");
        assert_eq!(backuper.pending().await, 1);
    }

    #[tokio::test]
    async fn unreachable_source_stops_the_run() {
        let source = Arc::new(MockBackend::with_files([("a.pb", b"a".to_vec()), ("b.pb", b"b".to_vec())]));
        let target = Arc::new(MockBackend::default());
        let backuper = copying(BackupConfig::default(), &source, &target);
        backuper.add("a.pb", datetime!(2024-01-01 10:00 UTC));
        backuper.add("b.pb", datetime!(2024-01-01 10:01 UTC));
        source.set_offline(true);

        let err = backuper.backup_now(BUDGET).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Connection));
        assert_eq!(backuper.pending().await, 2);
        assert!(target.paths().is_empty());
    }

    #[tokio::test]
    async fn sources_deleted_after_backup() {
        let source = Arc::new(MockBackend::with_files([("a.pb", b"a".to_vec())]));
        let target = Arc::new(MockBackend::default());
        let config = BackupConfig {
            delete_after_backup: true,
            ..BackupConfig::default()
        };
        let backuper = copying(config, &source, &target);
        backuper.add("a.pb", datetime!(2024-01-01 10:00 UTC));

        backuper.backup_now(BUDGET).await.unwrap();
        assert!(source.paths().is_empty());
        assert_eq!(target.contents("a.pb").unwrap(), b"a");
    }
}
