//! In-memory storage backend for testing.

use super::{BoxSyncRead, BoxSyncWrite, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::{validate as validate_path, validate_prefix};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use time::UtcDateTime;

type Files = HashMap<PathBuf, (UtcDateTime, Vec<u8>)>;

#[derive(Default)]
struct State {
    files: RwLock<Files>,
    failing: RwLock<HashSet<PathBuf>>,
    offline: AtomicBool,
    operations: AtomicUsize,
}

impl State {
    fn check(&self, path: &Path) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Network("mock backend is offline".to_string()));
        }
        if self.failing.read().unwrap_or_else(PoisonError::into_inner).contains(path) {
            exn::bail!(ErrorKind::Io(io::Error::other(format!("injected failure: {}", path.display()))));
        }
        Ok(())
    }

    fn check_io(&self, path: &Path) -> io::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock backend is offline"));
        }
        if self.failing.read().unwrap_or_else(PoisonError::into_inner).contains(path) {
            return Err(io::Error::other(format!("injected failure: {}", path.display())));
        }
        Ok(())
    }
}

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Streaming writers
/// buffer in memory and commit on `flush()`, as the S3 backend commits.
///
/// Two failure knobs are available: [`fail_path`](Self::fail_path) makes every
/// operation on one path fail with an I/O error, and
/// [`set_offline`](Self::set_offline) makes every operation fail with a
/// network error. [`operations`](Self::operations) counts trait calls, so a
/// test can assert that no backend I/O happened at all.
///
/// # Examples
///
/// ```
/// use spool_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("spool/events.pb", b"\x01a"),
/// ]);
/// assert!(backend.exists(Path::new("spool/events.pb")).await?);
///
/// backend.fail_path("spool/events.pb");
/// assert!(backend.read(Path::new("spool/events.pb")).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    state: Arc<State>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        let state = State {
            files: RwLock::new(map),
            ..State::default()
        };
        Self {
            name: "mock".to_string(),
            state: Arc::new(state),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every operation touching `path` fail with an I/O error.
    pub fn fail_path(&self, path: impl AsRef<Path>) {
        if let Ok(path) = validate_path(path) {
            self.state.failing.write().unwrap_or_else(PoisonError::into_inner).insert(path);
        }
    }

    /// Undo [`fail_path`](Self::fail_path).
    pub fn heal_path(&self, path: impl AsRef<Path>) {
        if let Ok(path) = validate_path(path) {
            self.state.failing.write().unwrap_or_else(PoisonError::into_inner).remove(&path);
        }
    }

    /// Simulate the whole backend becoming unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of trait operations performed so far.
    pub fn operations(&self) -> usize {
        self.state.operations.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored path, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Direct access to stored bytes, bypassing failure injection and the
    /// operation counter.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let path = validate_path(path).ok()?;
        self.files().get(&path).map(|(_, data)| data.clone())
    }

    fn files(&self) -> std::sync::RwLockReadGuard<'_, Files> {
        self.state.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.state.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn not_found(path: PathBuf) -> exn::Exn<ErrorKind> {
        exn::Exn::from(ErrorKind::NotFound(path))
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

/// Buffers everything and replaces the stored file on `flush()`.
struct MockWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    state: Arc<State>,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.check_io(&self.path)?;
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.check_io(&self.path)?;
        self.state
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.path.clone(), (UtcDateTime::now(), self.buffer.clone()));
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn walk<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        self.touch();
        let validated_prefix = match validate_prefix(prefix) {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        if let Some(pfx) = &validated_prefix
            && let Err(e) = self.state.check(pfx)
        {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }
        if let Err(e) = self.state.check(Path::new("")) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding.
            let mut entries: Vec<(PathBuf, UtcDateTime, u64)> = {
                self.files()
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, (inserted, data))| (path.clone(), *inserted, data.len() as u64))
                    .collect()
            };
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (path, inserted, size) in entries {
                yield Ok(FileInfo::new(path, size, inserted));
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.touch();
        let path = validate_path(path)?;
        self.state.check(&path)?;
        Ok(self.files().contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.touch();
        let path = validate_path(path)?;
        self.state.check(&path)?;
        let data = self.files().get(&path).map(|(_, data)| data.clone());
        data.ok_or_else(|| Self::not_found(path))
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let data = self.read(path).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.touch();
        let path = validate_path(path)?;
        self.state.check(&path)?;
        self.state
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, (UtcDateTime::now(), data.to_vec()));
        Ok(())
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        self.touch();
        let path = validate_path(path)?;
        self.state.check(&path)?;
        Ok(Box::new(MockWriter {
            path,
            buffer: Vec::new(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.touch();
        let path = validate_path(path)?;
        self.state.check(&path)?;
        let removed = self.state.files.write().unwrap_or_else(PoisonError::into_inner).remove(&path);
        removed.map(|_| ()).ok_or_else(|| Self::not_found(path))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.touch();
        let path = validate_path(path)?;
        self.state.check(&path)?;
        let found = self.files().get(&path).map(|(inserted, data)| (*inserted, data.len() as u64));
        let (inserted, size) = found.ok_or_else(|| Self::not_found(path.clone()))?;
        Ok(FileInfo::new(path, size, inserted))
    }
}
