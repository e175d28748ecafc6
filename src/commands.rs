use crate::cli::SearchArgs;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::TryStreamExt;
use regex::Regex;
use spool_backup::{Backuper, Scheduler};
use spool_config::Settings;
use spool_shards::{ShardPattern, ShardedSetFinder};
use spool_storage::{BackendHandle, FileInfo, Location};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tokio::time::MissedTickBehavior;

pub async fn backup(settings: &Settings, files: Vec<PathBuf>, watch: bool) -> Result<()> {
    let config = settings.backup_config().or_raise(|| ErrorKind::Config)?;
    let credentials = settings.s3_credentials();
    let source = settings
        .source_location()
        .or_raise(|| ErrorKind::Config)?
        .open("source", credentials.as_ref())
        .or_raise(|| ErrorKind::Storage("source"))?;
    let target = settings
        .target_location()
        .or_raise(|| ErrorKind::Config)?
        .open("target", credentials.as_ref())
        .or_raise(|| ErrorKind::Storage("target"))?;
    let run_timeout = config.run_timeout;
    let interval = config.interval;
    let backuper = Arc::new(Backuper::new(config, Arc::clone(&source), target).or_raise(|| ErrorKind::Config)?);

    let rescan = watch && files.is_empty();
    let mut discovered = Discovered::default();
    let queued = match files.is_empty() {
        true => discover(&backuper, &source, &mut discovered).await?,
        false => enqueue(&backuper, &source, files).await?,
    };
    tracing::info!(queued, "files queued");

    if watch {
        let scheduler = Scheduler::start(Arc::clone(&backuper));
        tokio::select! {
            signal = tokio::signal::ctrl_c() => signal.or_raise(|| ErrorKind::Backup)?,
            () = keep_discovering(&backuper, &source, interval, discovered), if rescan => {},
        }
        tracing::info!("interrupted, finishing the current run");
        return scheduler.stop().await.or_raise(|| ErrorKind::Backup);
    }

    let outcome = backuper.backup_now(run_timeout).await;
    backuper.close().await.or_raise(|| ErrorKind::Backup)?;
    let summary = outcome.or_raise(|| ErrorKind::Backup)?;
    for archive in &summary.archives {
        println!("{}", archive.display());
    }
    tracing::info!(
        transferred = summary.transferred,
        vanished = summary.vanished,
        remaining = summary.remaining,
        "done"
    );
    Ok(())
}

/// Queue the given `files`, stamped with their modification time.
async fn enqueue(backuper: &Backuper, source: &BackendHandle, files: Vec<PathBuf>) -> Result<usize> {
    let count = files.len();
    for file in files {
        let info = source.stat(&file).await.or_raise(|| ErrorKind::Argument(file.display().to_string()))?;
        backuper.add(info.path, info.modified);
    }
    Ok(count)
}

/// Source paths already handed to the backuper, so repeated walks of the
/// source only queue what is new.
#[derive(Debug, Default)]
struct Discovered {
    seen: HashSet<PathBuf>,
}

impl Discovered {
    /// Keep the listed files not queued before. Paths no longer listed are
    /// forgotten, so a name reused later is queued again.
    fn fresh(&mut self, listed: Vec<FileInfo>) -> Vec<FileInfo> {
        let current: HashSet<&PathBuf> = listed.iter().map(|info| &info.path).collect();
        self.seen.retain(|path| current.contains(path));
        listed.into_iter().filter(|info| self.seen.insert(info.path.clone())).collect()
    }
}

/// Walk the whole source and queue every file not seen by an earlier walk.
async fn discover(backuper: &Backuper, source: &BackendHandle, discovered: &mut Discovered) -> Result<usize> {
    let listed: Vec<FileInfo> = source.walk(None).try_collect().await.or_raise(|| ErrorKind::Storage("source"))?;
    let fresh = discovered.fresh(listed);
    for info in &fresh {
        backuper.add(info.path.clone(), info.modified);
    }
    Ok(fresh.len())
}

/// Walk the source again every `interval`, forever. A failed walk is logged
/// and tried again on the next tick.
async fn keep_discovering(backuper: &Backuper, source: &BackendHandle, interval: Duration, mut discovered: Discovered) {
    let mut ticks = tokio::time::interval(interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick is immediate and the startup walk already ran.
    ticks.tick().await;
    loop {
        ticks.tick().await;
        match discover(backuper, source, &mut discovered).await {
            Ok(0) => tracing::trace!("no new files"),
            Ok(queued) => tracing::info!(queued, "new files queued"),
            Err(err) => tracing::warn!(error = ?err, "walking the source failed, retrying next interval"),
        }
    }
}

pub async fn find_shards(settings: &Settings, pattern: &str, search: &SearchArgs) -> Result<()> {
    let pattern: ShardPattern = pattern.parse::<ShardPattern>().or_raise(|| ErrorKind::Argument(pattern.to_string()))?;
    let (finder, reference) = finder(settings, search)?;
    let family = finder.find(&pattern, reference).await.or_raise(|| ErrorKind::Search)?;
    for member in family {
        println!("{}", member.display());
    }
    Ok(())
}

pub async fn find_latest(settings: &Settings, pattern: &str, search: &SearchArgs) -> Result<()> {
    let pattern = Regex::new(pattern).or_raise(|| ErrorKind::Argument(pattern.to_string()))?;
    let (finder, reference) = finder(settings, search)?;
    let latest = finder.find_latest(&pattern, reference).await.or_raise(|| ErrorKind::Search)?;
    println!("{}", latest.display());
    Ok(())
}

fn finder(settings: &Settings, search: &SearchArgs) -> Result<(ShardedSetFinder, Date)> {
    let location = match &search.location {
        Some(location) => location.parse::<Location>().or_raise(|| ErrorKind::Argument(location.clone()))?,
        None => settings.shards_location().or_raise(|| ErrorKind::Config)?,
    };
    let backend = location
        .open("shards", settings.s3_credentials().as_ref())
        .or_raise(|| ErrorKind::Storage("shards"))?;
    let mut finder_settings = settings.finder_settings();
    if let Some(days) = search.lookback_days {
        finder_settings.lookback_days = days;
    }
    let reference = match &search.date {
        Some(date) => parse_date(date)?,
        None => OffsetDateTime::now_utc().date(),
    };
    Ok((ShardedSetFinder::new(backend, finder_settings), reference))
}

fn parse_date(value: &str) -> Result<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]")).or_raise(|| ErrorKind::Argument(value.to_string()))
}
