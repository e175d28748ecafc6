//! Object metadata returned by storage backends.

use spool_compress::Compression;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// File metadata returned by storage backends.
///
/// Used for listing, walking and `stat` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
    /// Detected compression format from file extension
    pub compression: Compression,
}

impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        let path = path.into();
        let compression = Compression::from_path(&path);
        Self {
            path,
            size,
            modified: modified.into(),
            compression,
        }
    }

    /// Path of the directory holding this object, relative to the storage
    /// root. Top-level objects have an empty parent.
    pub fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn compression_is_detected_from_path() {
        let info = FileInfo::new("2024/01/01/100000.pb.gz", 10, datetime!(2024-01-01 10:00 UTC));
        assert_eq!(info.compression, Compression::Gzip);
        assert_eq!(info.parent(), Path::new("2024/01/01"));
    }

    #[test]
    fn top_level_parent_is_empty() {
        let info = FileInfo::new("events.pb", 0, datetime!(2024-01-01 10:00 UTC));
        assert_eq!(info.parent(), Path::new(""));
    }
}
