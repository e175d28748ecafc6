//! Path validation for backend-relative keys.
//!
//! Every path handed to a backend is relative to that backend's root and
//! must never leave it.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use spool_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("2024/01/01/143000.pb.gz").is_ok());
/// assert!(validate_path("spool/a/../events.pb").is_ok()); // (never leaves root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("/shards/./2024//01/../01/x-00000-of-00003.txt").unwrap(),
///     Path::new("shards/2024/01/x-00000-of-00003.txt")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but
                // truncate in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            // A leading slash is tolerated: keys are always rooted at the
            // backend root anyway.
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Like [`validate`], but an empty path (or one that normalizes to nothing)
/// means "the backend root" and yields `None`.
pub(crate) fn validate_prefix(prefix: Option<&Path>) -> Result<Option<PathBuf>> {
    match prefix {
        None => Ok(None),
        Some(p) if p.components().all(|c| matches!(c, Component::CurDir | Component::RootDir)) => Ok(None),
        Some(p) => validate(p).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate(Path::new("2024/01/01/143000.pb.gz")).unwrap(), Path::new("2024/01/01/143000.pb.gz"));
        assert_eq!(validate(Path::new("events.pb")).unwrap(), Path::new("events.pb"));
        assert_eq!(validate(Path::new("/rooted/events.pb")).unwrap(), Path::new("rooted/events.pb"));
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(validate(Path::new("a//b//c")).unwrap(), Path::new("a/b/c"));
        assert_eq!(validate(Path::new("a/./b/./c")).unwrap(), Path::new("a/b/c"));
        assert_eq!(validate(Path::new("a/b/..")).unwrap(), Path::new("a"));
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate(Path::new("../etc/passwd")).is_err());
        assert!(validate(Path::new("a/../../b")).is_err());
        assert!(validate(Path::new("..")).is_err());
        assert!(validate(Path::new("../..")).is_err());
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate(Path::new("a\0b")).is_err());
        assert!(validate(Path::new("\0")).is_err());
    }

    #[test]
    fn test_empty_paths() {
        assert!(validate(Path::new("")).is_err());
        assert!(validate(Path::new(".")).is_err());
        assert!(validate(Path::new("./.")).is_err());
        assert!(validate(Path::new("//")).is_err());
    }

    #[test]
    fn test_trailing_slashes() {
        assert_eq!(validate(Path::new("2024/01/01/")).unwrap(), Path::new("2024/01/01"));
        assert_eq!(validate(Path::new("spool///")).unwrap(), Path::new("spool"));
    }

    #[test]
    fn test_prefix_root_is_none() {
        assert_eq!(validate_prefix(None).unwrap(), None);
        assert_eq!(validate_prefix(Some(Path::new(""))).unwrap(), None);
        assert_eq!(validate_prefix(Some(Path::new("/"))).unwrap(), None);
        assert_eq!(validate_prefix(Some(Path::new("2024/"))).unwrap(), Some(PathBuf::from("2024")));
        assert!(validate_prefix(Some(Path::new("../up"))).is_err());
    }
}
