use crate::error::{ErrorKind, Result};
use crate::pattern::{MAX_SHARD_COUNT, ShardPattern, shard_paths};
use exn::ResultExt;
use futures::TryStreamExt;
use regex::Regex;
use spool_storage::BackendHandle;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use time::Date;
use tracing::instrument;

/// Days searched backward from the reference date, the reference included.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinderSettings {
    /// Namespace inside the backend holding the `YYYY/MM/DD` buckets. `None`
    /// is the backend root.
    pub root: Option<PathBuf>,
    pub lookback_days: u32,
}

impl Default for FinderSettings {
    fn default() -> Self {
        Self {
            root: None,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

/// Searches date-bucketed storage, newest day first.
pub struct ShardedSetFinder {
    backend: BackendHandle,
    settings: FinderSettings,
}

impl ShardedSetFinder {
    pub fn new(backend: BackendHandle, settings: FinderSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &FinderSettings {
        &self.settings
    }

    /// Find the first complete shard family matching `pattern`, starting at
    /// `reference` and moving back one day at a time.
    ///
    /// Every member of the returned family has been confirmed to exist. A
    /// listing failure aborts the search.
    #[instrument(skip(self, pattern), fields(backend = self.backend.name(), pattern = %pattern))]
    pub async fn find(&self, pattern: &ShardPattern, reference: Date) -> Result<Vec<PathBuf>> {
        for day in self.days(reference) {
            let prefix = self.day_prefix(day);
            tracing::debug!(prefix = %prefix.display(), "searching for shard families");
            if let Some(family) = self.find_in(&prefix, pattern).await? {
                tracing::info!(prefix = %prefix.display(), shards = family.len(), "found complete shard family");
                return Ok(family);
            }
        }
        exn::bail!(ErrorKind::NotFound(self.settings.lookback_days))
    }

    /// Find the lexicographically greatest object directly inside the newest
    /// day bucket that has any object matching `pattern`.
    #[instrument(skip(self, pattern), fields(backend = self.backend.name(), pattern = %pattern))]
    pub async fn find_latest(&self, pattern: &Regex, reference: Date) -> Result<PathBuf> {
        for day in self.days(reference) {
            let prefix = self.day_prefix(day);
            let listed = self.backend.list(Some(&prefix)).await.or_raise(|| ErrorKind::Storage)?;
            let latest = listed
                .into_iter()
                .map(|info| info.path)
                .filter(|path| pattern.is_match(&path.to_string_lossy()))
                .max();
            if let Some(latest) = latest {
                tracing::info!(path = %latest.display(), "found latest object");
                return Ok(latest);
            }
        }
        exn::bail!(ErrorKind::NotFound(self.settings.lookback_days))
    }

    async fn find_in(&self, prefix: &Path, pattern: &ShardPattern) -> Result<Option<Vec<PathBuf>>> {
        let mut visited = HashSet::new();
        let mut objects = self.backend.walk(Some(prefix));
        while let Some(info) = objects.try_next().await.or_raise(|| ErrorKind::Storage)? {
            if visited.contains(&info.path) {
                continue;
            }
            let name = info.path.to_string_lossy();
            let Some(family) = pattern.family(&name) else {
                tracing::trace!(path = %name, "no match");
                continue;
            };
            // Counts outside 1..=MAX_SHARD_COUNT can't name a family.
            let count = match family.count.parse::<u64>() {
                Ok(count @ 1..=MAX_SHARD_COUNT) => count,
                _ => {
                    tracing::debug!(path = %name, count = family.count, "unusable shard count");
                    continue;
                },
            };
            let members = shard_paths(info.parent(), family.prefix, count, family.suffix);
            visited.extend(members.iter().cloned());
            if self.all_exist(&members).await {
                return Ok(Some(members));
            }
            tracing::debug!(path = %name, count, "shard family incomplete");
        }
        Ok(None)
    }

    async fn all_exist(&self, members: &[PathBuf]) -> bool {
        for member in members {
            match self.backend.exists(member).await {
                Ok(true) => {},
                Ok(false) => return false,
                Err(err) => {
                    tracing::warn!(path = %member.display(), error = ?err, "existence check failed");
                    return false;
                },
            }
        }
        true
    }

    fn days(&self, reference: Date) -> impl Iterator<Item = Date> {
        std::iter::successors(Some(reference), |day| day.previous_day()).take(self.settings.lookback_days as usize)
    }

    /// `<root>/YYYY/MM/DD`
    fn day_prefix(&self, day: Date) -> PathBuf {
        let bucket = format!("{:04}/{:02}/{:02}", day.year(), u8::from(day.month()), day.day());
        match &self.settings.root {
            Some(root) => root.join(bucket),
            None => PathBuf::from(bucket),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use spool_storage::backend::MockBackend;
    use std::sync::Arc;
    use time::macros::date;

    fn pattern() -> ShardPattern {
        r"/(x)-\d{5}-of-(\d{5})(\.txt)$".parse().unwrap()
    }

    fn finder(files: &[&str], lookback_days: u32) -> ShardedSetFinder {
        let backend = MockBackend::with_files(files.iter().map(|path| (*path, b"shard".to_vec())));
        let settings = FinderSettings {
            root: Some(PathBuf::from("data")),
            lookback_days,
        };
        ShardedSetFinder::new(Arc::new(backend), settings)
    }

    #[tokio::test]
    async fn incomplete_family_is_not_found() {
        let finder = finder(&["data/2024/01/05/x-00000-of-00003.txt", "data/2024/01/05/x-00001-of-00003.txt"], 30);
        let err = finder.find(&pattern(), date!(2024 - 01 - 05)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(30)));
    }

    #[tokio::test]
    async fn complete_family_is_returned_in_order() {
        let finder = finder(
            &[
                "data/2024/01/05/x-00002-of-00003.txt",
                "data/2024/01/05/x-00000-of-00003.txt",
                "data/2024/01/05/x-00001-of-00003.txt",
                "data/2024/01/05/other.txt",
            ],
            30,
        );
        let found = finder.find(&pattern(), date!(2024 - 01 - 05)).await.unwrap();
        assert_eq!(
            found,
            vec![
                PathBuf::from("data/2024/01/05/x-00000-of-00003.txt"),
                PathBuf::from("data/2024/01/05/x-00001-of-00003.txt"),
                PathBuf::from("data/2024/01/05/x-00002-of-00003.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn previous_day_is_searched() {
        let finder = finder(
            &[
                "data/2024/01/05/x-00000-of-00002.txt",
                "data/2023/12/31/x-00000-of-00002.txt",
                "data/2023/12/31/x-00001-of-00002.txt",
            ],
            30,
        );
        let found = finder.find(&pattern(), date!(2024 - 01 - 05)).await.unwrap();
        assert_eq!(found[0], PathBuf::from("data/2023/12/31/x-00000-of-00002.txt"));
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn lookback_is_bounded() {
        let finder = finder(&["data/2024/01/01/x-00000-of-00001.txt"], 3);
        // 01-05, 01-04, 01-03 only.
        let err = finder.find(&pattern(), date!(2024 - 01 - 05)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(3)));
        let found = finder.find(&pattern(), date!(2024 - 01 - 03)).await.unwrap();
        assert_eq!(found, vec![PathBuf::from("data/2024/01/01/x-00000-of-00001.txt")]);
    }

    #[tokio::test]
    async fn zero_shard_count_is_skipped() {
        let finder = finder(&["data/2024/01/05/x-00000-of-00000.txt"], 1);
        assert!(finder.find(&pattern(), date!(2024 - 01 - 05)).await.is_err());
    }

    #[rstest]
    #[case("data/2024/01/05/x-00000-of-4000000000.txt")]
    #[case("data/2024/01/05/x-00000-of-100000.txt")]
    #[case("data/2024/01/05/x-00000-of-99999999999999999999999.txt")]
    #[tokio::test]
    async fn oversized_shard_count_is_skipped(#[case] path: &str) {
        let finder = finder(&[path], 1);
        let pattern: ShardPattern = r"/(x)-\d+-of-(\d+)(\.txt)$".parse().unwrap();
        let err = finder.find(&pattern, date!(2024 - 01 - 05)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(1)));
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        let backend = MockBackend::with_files([("data/2024/01/04/x-00000-of-00001.txt", b"s".to_vec())]);
        backend.set_offline(true);
        let finder = ShardedSetFinder::new(
            Arc::new(backend),
            FinderSettings {
                root: Some(PathBuf::from("data")),
                ..FinderSettings::default()
            },
        );
        let err = finder.find(&pattern(), date!(2024 - 01 - 05)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage));
    }

    #[tokio::test]
    async fn latest_is_lexicographic_max_of_newest_day() {
        let finder = finder(
            &[
                "data/2024/01/04/dump-0900.csv",
                "data/2024/01/04/dump-1700.csv",
                "data/2024/01/04/notes.txt",
                "data/2024/01/04/nested/dump-2300.csv",
                "data/2024/01/03/dump-2359.csv",
            ],
            30,
        );
        let pattern = Regex::new(r"dump-\d{4}\.csv$").unwrap();
        let latest = finder.find_latest(&pattern, date!(2024 - 01 - 05)).await.unwrap();
        assert_eq!(latest, PathBuf::from("data/2024/01/04/dump-1700.csv"));
    }

    #[tokio::test]
    async fn latest_not_found() {
        let finder = finder(&["data/2024/01/04/notes.txt"], 2);
        let pattern = Regex::new(r"dump").unwrap();
        let err = finder.find_latest(&pattern, date!(2024 - 01 - 05)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(2)));
    }
}
