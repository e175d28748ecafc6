//! Aggregate strategy: the frames of up to `max_group_size` same-day sources
//! are concatenated into one compressed archive named after the run time.

use crate::backuper::{RunContext, RunState, RunSummary};
use crate::error::{ErrorKind, Result, storage_failure};
use crate::frame::{FrameError, StreamEnd, copy_frames};
use crate::queue::PendingItem;
use exn::ResultExt;
use spool_compress::Compression;
use spool_storage::backend::BoxSyncRead;
use spool_storage::error::ErrorKind as StorageErrorKind;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};

/// Length of the group at the front of a time-sorted batch: the oldest item
/// plus every following item on the same calendar day (in the item's own
/// offset), up to `cap` items.
pub fn day_group_len(items: &[PendingItem], cap: usize) -> usize {
    let Some(first) = items.first() else {
        return 0;
    };
    let day = first.enqueued_at.date();
    items.iter().take(cap.max(1)).take_while(|item| item.enqueued_at.date() == day).count()
}

/// Stamp for the next archive: the run time truncated to seconds, pushed
/// forward when needed so it is strictly later than `previous`.
pub(crate) fn next_stamp(previous: Option<OffsetDateTime>, invoked_at: OffsetDateTime) -> OffsetDateTime {
    let invoked_at = invoked_at.to_offset(UtcOffset::UTC);
    let stamp = invoked_at - Duration::nanoseconds(i64::from(invoked_at.nanosecond()));
    match previous {
        Some(previous) if stamp <= previous => previous + Duration::SECOND,
        _ => stamp,
    }
}

/// `<root>/YYYY/MM/DD/HHMMSS.pb<ext>`
pub fn archive_path(root: Option<&Path>, stamp: OffsetDateTime, compression: Compression) -> Result<PathBuf> {
    let format = format_description!("[year]/[month]/[day]/[hour][minute][second]");
    let name = stamp
        .to_offset(UtcOffset::UTC)
        .format(&format)
        .or_raise(|| ErrorKind::Config(format!("cannot format archive time {stamp}")))?;
    let relative = PathBuf::from(format!("{name}.pb{}", compression.extension()));
    Ok(match root {
        Some(root) => root.join(relative),
        None => relative,
    })
}

#[derive(Debug, Default)]
struct ArchiveStats {
    sources: usize,
    frames: u64,
    corrupt: usize,
    /// Group members that no longer exist at the source.
    vanished: Vec<PathBuf>,
}

impl ArchiveStats {
    fn written(&self) -> bool {
        self.sources > 0
    }
}

struct OpenSource {
    path: PathBuf,
    compression: Compression,
    reader: BoxSyncRead,
}

/// Archive groups from the front of the batch until it is empty or a group
/// fails. A failed group leaves itself and everything after it in the batch.
pub(crate) async fn run(ctx: &RunContext<'_>, state: &mut RunState) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    while !state.in_progress.is_empty() {
        let len = day_group_len(&state.in_progress, ctx.config.max_group_size);
        let stamp = next_stamp(state.last_stamp, ctx.invoked_at);
        let destination = archive_path(ctx.config.target_root.as_deref(), stamp, ctx.config.archive_compression)?;
        let written = ctx.bounded(write_archive(ctx, &state.in_progress[..len], &destination)).await;
        match written {
            Ok(stats) => {
                let done: Vec<PendingItem> = state.in_progress.drain(..len).collect();
                summary.vanished += stats.vanished.len();
                summary.transferred += done.len() - stats.vanished.len();
                if stats.written() {
                    state.last_stamp = Some(stamp);
                    tracing::info!(
                        archive = %destination.display(),
                        items = done.len(),
                        sources = stats.sources,
                        frames = stats.frames,
                        corrupt = stats.corrupt,
                        vanished = stats.vanished.len(),
                        "archive written"
                    );
                    summary.archives.push(destination);
                } else {
                    tracing::warn!(items = done.len(), "every source in the group vanished, no archive written");
                }
                for item in done.iter().filter(|item| !stats.vanished.contains(&item.path)) {
                    ctx.delete_source(&item.path).await;
                }
            },
            Err(err) => {
                tracing::error!(
                    archive = %destination.display(),
                    remaining = state.in_progress.len(),
                    error = ?err,
                    "archive failed, leaving batch for next run"
                );
                discard_partial(ctx, &err, &destination).await;
                return Err(err);
            },
        }
    }
    Ok(summary)
}

/// Best-effort removal of a half-written archive.
async fn discard_partial(ctx: &RunContext<'_>, err: &crate::error::Error, destination: &Path) {
    // The destination belongs to someone else, or nothing can be reached.
    if matches!(&**err, ErrorKind::Exists(_) | ErrorKind::Connection) {
        return;
    }
    match ctx.target.delete(destination).await {
        Ok(()) => tracing::debug!(archive = %destination.display(), "removed partial archive"),
        Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {},
        Err(e) => tracing::warn!(archive = %destination.display(), error = ?e, "failed to remove partial archive"),
    }
}

/// Write one group into `destination`. Sources that have vanished are
/// skipped; when none are left nothing is written at all.
async fn write_archive(ctx: &RunContext<'_>, group: &[PendingItem], destination: &Path) -> Result<ArchiveStats> {
    let mut sources = Vec::with_capacity(group.len());
    let mut vanished = Vec::new();
    for item in group {
        match ctx.source.reader(&item.path).await {
            Ok(reader) => sources.push(OpenSource {
                path: item.path.clone(),
                compression: Compression::from_path(&item.path),
                reader,
            }),
            Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
                tracing::warn!(source = %item.path.display(), "source vanished, nothing to archive");
                vanished.push(item.path.clone());
            },
            Err(err) => return Err(storage_failure(err, ErrorKind::Source(item.path.clone()))),
        }
    }
    if sources.is_empty() {
        return Ok(ArchiveStats {
            vanished,
            ..ArchiveStats::default()
        });
    }

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

    let writer = ctx
        .target
        .writer(destination)
        .await
        .map_err(|e| storage_failure(e, ErrorKind::Destination(destination.to_path_buf())))?;

    let compression = ctx.config.archive_compression;
    let max_frame_size = ctx.config.max_frame_size;
    let archive = destination.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<ArchiveStats> {
        let destination_failed = || ErrorKind::Destination(archive.clone());
        let mut encoder = compression.encoder(writer).or_raise(destination_failed)?;
        let mut stats = ArchiveStats {
            vanished,
            ..ArchiveStats::default()
        };
        for source in sources {
            let decoder =
                source.compression.wrap_reader(source.reader).or_raise(|| ErrorKind::Source(source.path.clone()))?;
            stats.sources += 1;
            match copy_frames(decoder, &mut encoder, max_frame_size) {
                StreamEnd::Clean { frames } => stats.frames += frames,
                StreamEnd::Corrupt { frames, reason } => {
                    tracing::error!(
                        source = %source.path.display(),
                        frames,
                        %reason,
                        "corrupted source, keeping its complete leading records"
                    );
                    stats.frames += frames;
                    stats.corrupt += 1;
                },
                StreamEnd::Fatal(FrameError::Source(e)) => {
                    return Err(e).or_raise(|| ErrorKind::Source(source.path.clone()));
                },
                StreamEnd::Fatal(FrameError::Destination(e)) => {
                    return Err(e).or_raise(destination_failed);
                },
            }
        }
        // Writes the trailer and flushes, which commits buffered backends.
        encoder.finish().or_raise(destination_failed)?;
        Ok(stats)
    })
    .await
    .or_raise(|| ErrorKind::Task)?
}
