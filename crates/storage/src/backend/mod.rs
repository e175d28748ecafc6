//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for storage operations across different backends (local
//! filesystem, S3-compatible services, in-memory for tests).

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::io::{Read, Write};
use std::path::Path;
use std::pin::Pin;

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;
pub type BoxSyncWrite = Box<dyn Write + Send + 'static>;

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. Streaming readers and writers are
/// synchronous [`Read`]/[`Write`] objects so they can be layered with
/// compression inside [`spawn_blocking`](tokio::task::spawn_blocking).
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Streaming
/// Copy a source object into an archive, decompressing and recompressing by
/// suffix, without buffering the whole file in memory:
///
/// ```
/// use std::path::Path;
/// use exn::ResultExt;
/// use spool_compress::Compression;
/// use spool_storage::backend::StorageBackend;
/// use spool_storage::error::{ErrorKind, Result};
///
/// async fn recompress(
///     backend: &dyn StorageBackend,
///     source: &Path,
///     target: &Path,
/// ) -> Result<u64> {
///     let source_reader = backend.reader(source).await?;
///     let source_format = Compression::from_path(source);
///     let target_writer = backend.writer(target).await?;
///     let target_format = Compression::from_path(target);
///
///     let handle = tokio::task::spawn_blocking(move || -> Result<u64> {
///         let fail = || ErrorKind::BackendError("recompress".to_string());
///         let mut decoder = source_format.wrap_reader(source_reader).or_raise(fail)?;
///         let mut encoder = target_format.encoder(target_writer).or_raise(fail)?;
///         let copied = std::io::copy(&mut decoder, &mut encoder).or_raise(fail)?;
///         encoder.finish().or_raise(fail)?;
///         Ok(copied)
///     });
///     handle.await.or_raise(|| ErrorKind::BackendError("task panicked".to_string()))?
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only.
    fn name(&self) -> &str;

    /// List the files directly under `prefix` (one level, like a delimited
    /// object-store listing). `None` lists the root.
    ///
    /// Default implementation filters [`walk()`](Self::walk) down to entries
    /// whose parent directory is exactly the prefix.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        let prefix = crate::path::validate_prefix(prefix)?;
        let parent = prefix.clone().unwrap_or_default();
        self.walk(prefix.as_deref())
            .try_filter(|info| futures::future::ready(info.parent() == parent.as_path()))
            .try_collect()
            .await
    }

    /// Recursively stream metadata for every file under `prefix`.
    ///
    /// Results are yielded incrementally. Dropping the stream stops the walk.
    /// Prefix matching is component based: the prefix `2024/01` matches
    /// `2024/01/02/a.pb` but not `2024/010/a.pb`. A prefix that does not
    /// exist yields an empty stream, not an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use spool_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.walk(Some(Path::new("2024/01/01")));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn walk<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Open a file for streaming reads.
    ///
    /// Returns a `'static` boxed [`Read`] suitable for use inside
    /// [`spawn_blocking`](tokio::task::spawn_blocking). The async setup
    /// (opening the file/connection) happens before returning.
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Write file contents, creating or replacing the file.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Open a file for streaming writes.
    ///
    /// Returns a `'static` boxed [`Write`] suitable for use inside
    /// [`spawn_blocking`](tokio::task::spawn_blocking).
    ///
    /// # Notes
    /// - Implementations create parent directories as needed.
    /// - Callers must call `flush()` once, after the last write, before
    ///   dropping. Some backends only commit on `flush()`: S3 completes its
    ///   multipart upload, the in-memory mock stores its buffer.
    /// - `flush()` must not be called from inside an async context.
    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Release pooled resources (network clients). The backend stays usable;
    /// resources are re-acquired lazily on next use.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
