//! Location strings and the backends they open.
//!
//! A location is how configuration and the command line name a place to read
//! from or write to:
//!
//! - `/var/spool/events` or `file:///var/spool/events`: a local directory
//! - `s3://bucket` or `s3://bucket/some/prefix`: an S3-compatible bucket

use crate::BackendHandle;
use crate::backend::LocalBackend;
use crate::error::{Error, ErrorKind, Result};
use crate::path::validate_prefix;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Connection settings for S3-compatible locations.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    /// AWS region or provider-specific region (e.g. "us-west-004" for Backblaze)
    pub region: String,
    /// Custom endpoint URL for non-AWS services
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

/// A parsed location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Absolute directory on the local filesystem.
    Local(PathBuf),
    /// Bucket plus optional key prefix.
    S3 { bucket: String, prefix: Option<PathBuf> },
}

impl Location {
    /// Short scheme tag, for logging.
    pub fn scheme(&self) -> &'static str {
        match self {
            Location::Local(_) => "file",
            Location::S3 { .. } => "s3",
        }
    }

    /// A location one or more path segments deeper.
    pub fn join(&self, segment: impl AsRef<Path>) -> Result<Location> {
        let segment = crate::validate_path(segment)?;
        Ok(match self {
            Location::Local(root) => Location::Local(root.join(segment)),
            Location::S3 { bucket, prefix } => Location::S3 {
                bucket: bucket.clone(),
                prefix: Some(match prefix {
                    Some(p) => p.join(segment),
                    None => segment,
                }),
            },
        })
    }

    /// Open the backend this location points at.
    ///
    /// S3 locations need credentials, and a build with the `s3` feature.
    pub fn open(&self, name: &str, credentials: Option<&S3Credentials>) -> Result<BackendHandle> {
        tracing::debug!(backend = name, location = %self, "opening storage backend");
        match self {
            Location::Local(root) => Ok(Arc::new(LocalBackend::new(name, root)?)),
            Location::S3 { bucket, prefix } => Self::open_s3(name, bucket, prefix.clone(), credentials),
        }
    }

    #[cfg(feature = "s3")]
    fn open_s3(
        name: &str,
        bucket: &str,
        prefix: Option<PathBuf>,
        credentials: Option<&S3Credentials>,
    ) -> Result<BackendHandle> {
        let Some(credentials) = credentials else {
            exn::bail!(ErrorKind::InvalidLocation(format!("no S3 credentials configured for s3://{bucket}")));
        };
        Ok(Arc::new(crate::backend::S3Backend::new(name, bucket, prefix, credentials.clone())?))
    }

    #[cfg(not(feature = "s3"))]
    fn open_s3(
        _name: &str,
        bucket: &str,
        _prefix: Option<PathBuf>,
        _credentials: Option<&S3Credentials>,
    ) -> Result<BackendHandle> {
        exn::bail!(ErrorKind::Unsupported(format!("s3://{bucket} (built without the `s3` feature)")))
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("s3://") {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                exn::bail!(ErrorKind::InvalidLocation(s.to_string()));
            }
            let prefix = validate_prefix(Some(Path::new(prefix)))?;
            return Ok(Location::S3 {
                bucket: bucket.to_string(),
                prefix,
            });
        }
        let path = s.strip_prefix("file://").unwrap_or(s);
        if path.contains("://") || !Path::new(path).is_absolute() {
            exn::bail!(ErrorKind::InvalidLocation(s.to_string()));
        }
        Ok(Location::Local(PathBuf::from(path)))
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(root) => write!(f, "file://{}", root.display()),
            Location::S3 { bucket, prefix: None } => write!(f, "s3://{bucket}"),
            Location::S3 {
                bucket,
                prefix: Some(prefix),
            } => write!(f, "s3://{bucket}/{}", prefix.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageBackend;
    use rstest::rstest;

    #[rstest]
    #[case("/var/spool", Location::Local(PathBuf::from("/var/spool")))]
    #[case("file:///var/spool", Location::Local(PathBuf::from("/var/spool")))]
    #[case("s3://bucket", Location::S3 { bucket: "bucket".to_string(), prefix: None })]
    #[case("s3://bucket/", Location::S3 { bucket: "bucket".to_string(), prefix: None })]
    #[case("s3://bucket/a/b/", Location::S3 { bucket: "bucket".to_string(), prefix: Some(PathBuf::from("a/b")) })]
    fn test_parse(#[case] input: &str, #[case] expected: Location) {
        assert_eq!(input.parse::<Location>().unwrap(), expected);
    }

    #[rstest]
    #[case("relative/dir")]
    #[case("file://relative")]
    #[case("gs://bucket/prefix")]
    #[case("s3://")]
    #[case("s3:///prefix")]
    #[case("s3://bucket/../escape")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(input.parse::<Location>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for input in ["file:///var/spool", "s3://bucket", "s3://bucket/a/b"] {
            let location: Location = input.parse().unwrap();
            assert_eq!(location.to_string(), input);
        }
    }

    #[test]
    fn test_scheme_and_join() {
        let local: Location = "/data".parse().unwrap();
        assert_eq!(local.scheme(), "file");
        assert_eq!(local.join("2024/01").unwrap(), Location::Local(PathBuf::from("/data/2024/01")));
        let s3: Location = "s3://bucket".parse().unwrap();
        assert_eq!(s3.scheme(), "s3");
        assert_eq!(s3.join("x").unwrap().to_string(), "s3://bucket/x");
        assert!(s3.join("../x").is_err());
    }

    #[tokio::test]
    async fn test_open_local() {
        let temp_dir = tempfile::tempdir().unwrap();
        let location = Location::Local(temp_dir.path().to_path_buf());
        let backend = location.open("local", None).unwrap();
        assert_eq!(backend.name(), "local");
        backend.write(Path::new("a.pb"), b"1").await.unwrap();
        assert!(temp_dir.path().join("a.pb").exists());
    }

    #[cfg(not(feature = "s3"))]
    #[test]
    fn test_open_s3_without_feature() {
        let location: Location = "s3://bucket".parse().unwrap();
        let err = location.open("s3", None).err().unwrap();
        assert!(matches!(&*err, ErrorKind::Unsupported(_)));
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let credentials = S3Credentials {
            region: "r".to_string(),
            endpoint: None,
            key_id: "id".to_string(),
            key_secret: "hunter2".to_string(),
        };
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
