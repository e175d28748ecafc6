//! S3-compatible storage backend.
//!
//! Works with AWS S3 and S3-compatible services (Backblaze B2, MinIO, Tigris
//! and friends). Credentials are provided explicitly via configuration.
//!
//! The SDK client is created lazily on first use and cached; `close()` drops
//! it so pooled connections are released, and the next operation creates a
//! fresh one.

use crate::{
    FileInfo, S3Credentials, StorageBackend,
    backend::{BoxSyncRead, BoxSyncWrite, FileInfoStream},
    error::{ErrorKind, Result},
    path::validate_prefix,
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
    types::{CompletedMultipartUpload, CompletedPart, Object},
};
use exn::{OptionExt, ResultExt};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tokio_util::io::SyncIoBridge;

/// Size of each multipart upload part. S3 requires at least 5 MiB for every
/// part but the last.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3-compatible storage backend.
///
/// Stores files in a bucket, optionally under a key prefix. All paths are
/// relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use spool_storage::{S3Credentials, backend::S3Backend};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let credentials = S3Credentials {
///     region: "us-west-004".to_string(),
///     endpoint: Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     key_id: "access_key_id".to_string(),
///     key_secret: "secret_access_key".to_string(),
/// };
/// let backend = S3Backend::new("archive", "my-bucket", Some("backups/".into()), credentials)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct S3Backend {
    name: String,
    bucket: String,
    prefix: Option<String>,
    credentials: S3Credentials,
    client: RwLock<Option<Client>>,
}

impl S3Backend {
    /// Create a new S3 storage backend. No connection is made until the first
    /// operation.
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<PathBuf>,
        credentials: S3Credentials,
    ) -> Result<Self> {
        let prefix = validate_prefix(prefix.as_deref())?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        Ok(Self {
            name: name.into(),
            bucket: bucket.into(),
            prefix,
            credentials,
            client: RwLock::new(None),
        })
    }

    fn build_client(credentials: &S3Credentials) -> Client {
        let provider = Credentials::new(&credentials.key_id, &credentials.key_secret, None, None, "spool-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(provider)
            .region(Region::new(credentials.region.clone()))
            // 1 initial attempt + 3 retries with exponential backoff
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services
            .force_path_style(true);
        if let Some(endpoint_url) = &credentials.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Client::from_conf(config_builder.build())
    }

    /// Shared client, created on first use.
    async fn client(&self) -> Client {
        if let Some(client) = self.client.read().await.as_ref() {
            return client.clone();
        }
        let mut guard = self.client.write().await;
        // Another task may have won the race for the write lock.
        if let Some(client) = guard.as_ref() {
            return client.clone();
        }
        tracing::debug!(backend = %self.name, bucket = %self.bucket, "creating S3 client");
        let client = Self::build_client(&self.credentials);
        *guard = Some(client.clone());
        client
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(join_key(self.prefix.as_deref(), path_str))
    }

    /// Key prefix for a listing. Directory-style: always ends in `/` unless
    /// listing the bucket root without a configured prefix.
    fn listing_prefix(&self, prefix: Option<&Path>) -> Result<String> {
        let relative = match validate_prefix(prefix)? {
            Some(p) => Some(p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p))?),
            None => None,
        };
        Ok(match (self.prefix.as_deref(), relative) {
            (Some(base), Some(rel)) => format!("{}/", join_key(Some(base), &rel)),
            (Some(base), None) => format!("{}/", base.trim_end_matches('/')),
            (None, Some(rel)) => format!("{rel}/"),
            (None, None) => String::new(),
        })
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        validate_path(strip_key(self.prefix.as_deref(), key))
    }

    fn file_info(&self, object: &Object) -> Result<FileInfo> {
        let key = object.key().ok_or_raise(|| ErrorKind::BackendError("S3 object without key".to_string()))?;
        let modified = match object.last_modified() {
            Some(dt) => Self::parse_datetime(dt)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        let size = object.size().unwrap_or_default().max(0) as u64;
        Ok(FileInfo::new(self.relative_path(key)?, size, modified))
    }

    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }
}

fn join_key(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path),
        None => path.to_string(),
    }
}

fn strip_key<'a>(prefix: Option<&str>, key: &'a str) -> &'a str {
    match prefix {
        Some(prefix) => {
            let prefix_normalized = prefix.trim_end_matches('/');
            key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
        },
        None => key,
    }
}

/// Sort an SDK failure into "the backend is unreachable", "no such object",
/// or a generic backend error.
fn classify<E>(err: &SdkError<E, HttpResponse>, path: &Path) -> ErrorKind
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            ErrorKind::Network(DisplayErrorContext(err).to_string())
        },
        _ if matches!(err.code(), Some("NoSuchKey" | "NotFound"))
            || err.raw_response().is_some_and(|r| r.status().as_u16() == 404) =>
        {
            ErrorKind::NotFound(path.to_path_buf())
        },
        _ if err.raw_response().is_some_and(|r| r.status().as_u16() == 403) => {
            ErrorKind::PermissionDenied(path.to_path_buf())
        },
        _ => ErrorKind::BackendError(DisplayErrorContext(err).to_string()),
    }
}

/// Streams an object to S3, holding at most one part in memory.
///
/// Objects smaller than one part are sent with a single `PutObject` on
/// `flush()`. Larger ones become a multipart upload: each filled part is
/// uploaded as it completes, and `flush()` sends the last one and completes
/// the upload. `flush()` therefore commits the object; writing afterwards is
/// an error, as is any use after a failed request. An upload dropped before
/// committing is aborted.
///
/// All requests block on the runtime captured when the writer was opened,
/// so the writer must be driven from a blocking thread.
struct S3Writer {
    client: Client,
    runtime: Handle,
    bucket: String,
    key: String,
    buffer: Vec<u8>,
    upload: Option<Upload>,
    committed: bool,
    failed: bool,
}

/// A multipart upload in progress.
struct Upload {
    id: String,
    parts: Vec<CompletedPart>,
}

/// Split a full part off the front of `buffer`, if there is one.
fn next_part(buffer: &mut Vec<u8>, part_size: usize) -> Option<Vec<u8>> {
    if buffer.len() < part_size {
        return None;
    }
    let rest = buffer.split_off(part_size);
    Some(std::mem::replace(buffer, rest))
}

fn sdk_io<E, R>(err: SdkError<E, R>) -> io::Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let kind = match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => io::ErrorKind::NotConnected,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, DisplayErrorContext(&err).to_string())
}

impl S3Writer {
    fn new(client: Client, bucket: String, key: String) -> Self {
        Self {
            client,
            runtime: Handle::current(),
            bucket,
            key,
            buffer: Vec::new(),
            upload: None,
            committed: false,
            failed: false,
        }
    }

    fn start_upload(&self) -> io::Result<Upload> {
        let request = self.client.create_multipart_upload().bucket(&self.bucket).key(&self.key);
        let created = self.runtime.block_on(request.send()).map_err(sdk_io)?;
        let id = created.upload_id().ok_or_else(|| io::Error::other("S3 returned no multipart upload id"))?;
        tracing::debug!(key = %self.key, upload = id, "started multipart upload");
        Ok(Upload {
            id: id.to_string(),
            parts: Vec::new(),
        })
    }

    fn send_part(&mut self, data: Vec<u8>) -> io::Result<()> {
        let mut upload = match self.upload.take() {
            Some(upload) => upload,
            None => self.start_upload()?,
        };
        let number = i32::try_from(upload.parts.len() + 1).map_err(io::Error::other)?;
        let request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload.id)
            .part_number(number)
            .body(ByteStream::from(data));
        let sent = self.runtime.block_on(request.send());
        if let Ok(output) = &sent {
            let part = CompletedPart::builder().part_number(number).set_e_tag(output.e_tag().map(str::to_string));
            upload.parts.push(part.build());
        }
        // Kept even on failure so the upload is aborted on drop.
        self.upload = Some(upload);
        sent.map(|_| ()).map_err(sdk_io)
    }

    fn commit(&mut self) -> io::Result<()> {
        let last = std::mem::take(&mut self.buffer);
        if self.upload.is_none() {
            let request = self.client.put_object().bucket(&self.bucket).key(&self.key).body(ByteStream::from(last));
            return self.runtime.block_on(request.send()).map(|_| ()).map_err(sdk_io);
        }
        if !last.is_empty() {
            self.send_part(last)?;
        }
        let Some(upload) = self.upload.take() else {
            return Err(io::Error::other("multipart upload vanished"));
        };
        let request = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload.id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(upload.parts.clone())).build());
        match self.runtime.block_on(request.send()) {
            Ok(_) => {
                tracing::debug!(key = %self.key, parts = upload.parts.len(), "completed multipart upload");
                Ok(())
            },
            Err(err) => {
                self.upload = Some(upload);
                Err(sdk_io(err))
            },
        }
    }
}

impl Write for S3Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.committed || self.failed {
            return Err(io::Error::other(format!("{} is no longer writable", self.key)));
        }
        self.buffer.extend_from_slice(buf);
        while let Some(part) = next_part(&mut self.buffer, PART_SIZE) {
            if let Err(err) = self.send_part(part) {
                self.failed = true;
                return Err(err);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::other(format!("{} failed to upload", self.key)));
        }
        if self.committed {
            return Ok(());
        }
        match self.commit() {
            Ok(()) => {
                self.committed = true;
                Ok(())
            },
            Err(err) => {
                self.failed = true;
                Err(err)
            },
        }
    }
}

impl Drop for S3Writer {
    fn drop(&mut self) {
        let Some(upload) = self.upload.take() else {
            return;
        };
        tracing::warn!(key = %self.key, upload = %upload.id, "aborting uncommitted multipart upload");
        let request = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload.id);
        // Drop may run on a runtime thread, where blocking is not allowed.
        self.runtime.spawn(async move {
            if let Err(err) = request.send().await {
                tracing::warn!(error = %DisplayErrorContext(&err), "failed to abort multipart upload");
            }
        });
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        let key_prefix = self.listing_prefix(prefix)?;
        let client = self.client().await;
        let mut pages = client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&key_prefix)
            .delimiter("/")
            .into_paginator()
            .send();
        let mut files = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| classify(&e, Path::new(&key_prefix)))?;
            for object in page.contents() {
                files.push(self.file_info(object)?);
            }
        }
        Ok(files)
    }

    fn walk<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let key_prefix = match self.listing_prefix(prefix) {
            Ok(p) => p,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        Box::pin(stream! {
            let client = self.client().await;
            let mut pages = client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&key_prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        // Listing can't continue past a failed page.
                        yield Err(exn::Exn::from(classify(&e, Path::new(&key_prefix))));
                        break;
                    },
                };
                for object in page.contents() {
                    yield self.file_info(object);
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.full_key(path)?;
        let client = self.client().await;
        match client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) => match classify(&e, path) {
                ErrorKind::NotFound(_) => Ok(false),
                kind => exn::bail!(kind),
            },
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let client = self.client().await;
        let output = client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(&e, path))?;
        let body = output
            .body
            .collect()
            .await
            .or_raise(|| ErrorKind::Network(format!("interrupted download: {key}")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let key = self.full_key(path)?;
        let client = self.client().await;
        let output = client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(&e, path))?;
        // The body is pulled from the network as the blocking side reads.
        let body = Box::pin(output.body.into_async_read());
        Ok(Box::new(SyncIoBridge::new(body)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.full_key(path)?;
        let client = self.client().await;
        client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| classify(&e, path))?;
        Ok(())
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let key = self.full_key(path)?;
        Ok(Box::new(S3Writer::new(self.client().await, self.bucket.clone(), key)))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // S3 deletes are idempotent; check first to keep NotFound semantics
        // consistent with the other backends.
        if !self.exists(path).await? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let key = self.full_key(path)?;
        let client = self.client().await;
        client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(&e, path))?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = self.full_key(path)?;
        let client = self.client().await;
        let head = client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(&e, path))?;
        let modified = match head.last_modified() {
            Some(dt) => Self::parse_datetime(dt)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        let size = head.content_length().unwrap_or_default().max(0) as u64;
        Ok(FileInfo::new(validate_path(path)?, size, modified))
    }

    async fn close(&self) -> Result<()> {
        if self.client.write().await.take().is_some() {
            tracing::debug!(backend = %self.name, "released S3 client");
        }
        Ok(())
    }
}
