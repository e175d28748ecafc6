use crate::error::{ErrorKind, Result};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A regular expression recognising one member of a shard family.
///
/// The three capture groups are, in order, the name prefix, the shard count
/// and the suffix. For `x-00001-of-00003.txt` a suitable pattern is
/// `/(x)-\d{5}-of-(\d{5})(\.txt)$`.
#[derive(Debug, Clone)]
pub struct ShardPattern {
    regex: Regex,
}

/// What a matching path says about its family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Family<'a> {
    pub(crate) prefix: &'a str,
    pub(crate) count: &'a str,
    pub(crate) suffix: &'a str,
}

impl ShardPattern {
    pub fn new(regex: Regex) -> Result<Self> {
        // `captures_len` counts the implicit whole-match group.
        let groups = regex.captures_len() - 1;
        if groups != 3 {
            exn::bail!(ErrorKind::InvalidPattern(groups));
        }
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Split a matching path into its family parts. `None` when the path
    /// doesn't match or an optional group didn't participate.
    pub(crate) fn family<'a>(&self, path: &'a str) -> Option<Family<'a>> {
        let captures = self.regex.captures(path)?;
        Some(Family {
            prefix: captures.get(1)?.as_str(),
            count: captures.get(2)?.as_str(),
            suffix: captures.get(3)?.as_str(),
        })
    }
}

impl FromStr for ShardPattern {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let regex = Regex::new(s).map_err(|e| ErrorKind::InvalidRegex(e.to_string()))?;
        Self::new(regex)
    }
}

impl fmt::Display for ShardPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Largest shard count a family may declare: the widest count that still
/// fits the five-digit member names.
pub const MAX_SHARD_COUNT: u64 = 99_999;

/// Every member of a family of `count` shards, in index order:
/// `<dir>/<prefix>-<index:05>-of-<count:05><suffix>`.
pub fn shard_paths(dir: &Path, prefix: &str, count: u64, suffix: &str) -> Vec<PathBuf> {
    (0..count).map(|index| dir.join(format!("{prefix}-{index:05}-of-{count:05}{suffix}"))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r"(x)-(\d+)")]
    #[case(r"/(x)-\d{5}-of-(\d{5})(\.txt)(\.gz)$")]
    #[case(r"x-00000-of-00003\.txt")]
    fn wrong_group_count_is_rejected(#[case] pattern: &str) {
        let err = pattern.parse::<ShardPattern>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPattern(_)));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = "(unclosed".parse::<ShardPattern>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRegex(_)));
    }

    #[test]
    fn family_parts() {
        let pattern: ShardPattern = r"/(x)-\d{5}-of-(\d{5})(\.txt)$".parse().unwrap();
        let family = pattern.family("data/2024/01/05/x-00001-of-00003.txt").unwrap();
        assert_eq!(family, Family { prefix: "x", count: "00003", suffix: ".txt" });
        assert!(pattern.family("data/2024/01/05/y-00001-of-00003.txt").is_none());
    }

    #[test]
    fn optional_group_not_participating() {
        let pattern: ShardPattern = r"/(x)-\d{5}-of-(\d{5})(\.txt)?$".parse().unwrap();
        assert!(pattern.family("d/x-00000-of-00002").is_none());
    }

    #[test]
    fn member_names() {
        let paths = shard_paths(Path::new("d"), "x", 3, ".txt");
        assert_eq!(
            paths,
            vec![
                PathBuf::from("d/x-00000-of-00003.txt"),
                PathBuf::from("d/x-00001-of-00003.txt"),
                PathBuf::from("d/x-00002-of-00003.txt"),
            ]
        );
        assert!(shard_paths(Path::new("d"), "x", 0, ".txt").is_empty());
    }
}
