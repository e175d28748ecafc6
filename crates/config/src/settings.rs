use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::Deserialize;
use spool_backup::config::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_GROUP_SIZE};
use spool_backup::{BackupConfig, Strategy};
use spool_compress::Compression;
use spool_shards::{DEFAULT_LOOKBACK_DAYS, FinderSettings};
use spool_storage::{Location, S3Credentials};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables with this prefix override file settings. Nested keys
/// are separated by a double underscore: `SPOOL_BACKUP__INTERVAL_SECS=60`.
pub const ENV_PREFIX: &str = "SPOOL_";

/// Everything the `spool` binary can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backup: BackupSection,
    pub s3: Option<S3Section>,
    pub shards: ShardsSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    /// Location string of the spool directory or bucket.
    pub source: Option<String>,
    /// Location string of the backup destination.
    pub target: Option<String>,
    pub strategy: String,
    pub target_root: Option<PathBuf>,
    pub strip_prefix: Option<PathBuf>,
    pub delete_after_backup: bool,
    pub overwrite: bool,
    pub interval_secs: u64,
    pub run_timeout_secs: u64,
    pub item_timeout_secs: u64,
    pub max_group_size: usize,
    pub archive_compression: String,
    pub max_frame_size: u64,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            source: None,
            target: None,
            strategy: "aggregate".to_string(),
            target_root: None,
            strip_prefix: None,
            delete_after_backup: false,
            overwrite: true,
            interval_secs: 300,
            run_timeout_secs: 600,
            item_timeout_secs: 60,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            archive_compression: "gzip".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct S3Section {
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}

impl std::fmt::Debug for S3Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.credentials(), f)
    }
}

impl S3Section {
    pub fn credentials(&self) -> S3Credentials {
        S3Credentials {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            key_id: self.key_id.clone(),
            key_secret: self.key_secret.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShardsSection {
    /// Location string of the storage to search.
    pub location: Option<String>,
    /// Namespace inside that storage holding the day buckets.
    pub root: Option<PathBuf>,
    pub lookback_days: u32,
}

impl Default for ShardsSection {
    fn default() -> Self {
        Self {
            location: None,
            root: None,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

/// `<config dir>/spool/config.toml`, per platform conventions.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "spool").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Settings {
    /// Load settings from `path` (format chosen by extension, TOML otherwise)
    /// or, when `None`, from the default path if it exists; then apply
    /// `SPOOL_` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::Missing(path.to_path_buf())),
            Some(path) => figment = merge_file(figment, path),
            None => {
                if let Some(path) = default_path().filter(|path| path.is_file()) {
                    tracing::debug!(path = %path.display(), "using default configuration file");
                    figment = merge_file(figment, &path);
                }
            },
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment.extract().or_raise(|| ErrorKind::Load)
    }

    pub fn backup_config(&self) -> Result<BackupConfig> {
        let raw = &self.backup;
        let config = BackupConfig {
            strategy: raw.strategy.parse::<Strategy>().or_raise(|| ErrorKind::Invalid("backup.strategy"))?,
            target_root: raw.target_root.clone(),
            strip_prefix: raw.strip_prefix.clone(),
            delete_after_backup: raw.delete_after_backup,
            overwrite: raw.overwrite,
            interval: Duration::from_secs(raw.interval_secs),
            run_timeout: Duration::from_secs(raw.run_timeout_secs),
            item_timeout: Duration::from_secs(raw.item_timeout_secs),
            max_group_size: raw.max_group_size,
            archive_compression: raw
                .archive_compression
                .parse::<Compression>()
                .or_raise(|| ErrorKind::Invalid("backup.archive_compression"))?,
            max_frame_size: raw.max_frame_size,
        };
        config.validate().or_raise(|| ErrorKind::Invalid("backup"))?;
        Ok(config)
    }

    pub fn source_location(&self) -> Result<Location> {
        location(self.backup.source.as_deref(), "backup.source")
    }

    pub fn target_location(&self) -> Result<Location> {
        location(self.backup.target.as_deref(), "backup.target")
    }

    pub fn shards_location(&self) -> Result<Location> {
        location(self.shards.location.as_deref(), "shards.location")
    }

    pub fn s3_credentials(&self) -> Option<S3Credentials> {
        self.s3.as_ref().map(S3Section::credentials)
    }

    pub fn finder_settings(&self) -> FinderSettings {
        FinderSettings {
            root: self.shards.root.clone(),
            lookback_days: self.shards.lookback_days,
        }
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

fn location(value: Option<&str>, key: &'static str) -> Result<Location> {
    let Some(value) = value else {
        exn::bail!(ErrorKind::Invalid(key));
    };
    value.parse::<Location>().or_raise(|| ErrorKind::Invalid(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn from_toml(toml: &str) -> Result<Settings> {
        Settings::from_figment(Figment::from(Toml::string(toml)))
    }

    #[test]
    fn defaults_match_backup_defaults() {
        let settings = from_toml("").unwrap();
        assert_eq!(settings.backup_config().unwrap(), BackupConfig::default());
        assert_eq!(settings.finder_settings(), FinderSettings::default());
        assert!(settings.s3_credentials().is_none());
    }

    #[test]
    fn backup_section() {
        let settings = from_toml(
            r#"
            [backup]
            source = "/var/spool/events"
            target = "s3://backups/events"
            strategy = "copy"
            strip_prefix = "incoming"
            interval_secs = 60
            archive_compression = "bz2"
            delete_after_backup = true
            "#,
        )
        .unwrap();
        let config = settings.backup_config().unwrap();
        assert_eq!(config.strategy, Strategy::Copy);
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.archive_compression, Compression::Bzip2);
        assert_eq!(config.strip_prefix, Some(PathBuf::from("incoming")));
        assert!(config.delete_after_backup);
        assert_eq!(settings.source_location().unwrap(), Location::Local(PathBuf::from("/var/spool/events")));
        assert_eq!(
            settings.target_location().unwrap(),
            Location::S3 {
                bucket: "backups".to_string(),
                prefix: Some(PathBuf::from("events")),
            }
        );
    }

    #[rstest]
    #[case("[backup]\nstrategy = \"mirror\"", "backup.strategy")]
    #[case("[backup]\narchive_compression = \"rar\"", "backup.archive_compression")]
    #[case("[backup]\nmax_group_size = 0", "backup")]
    #[case("[backup]\nitem_timeout_secs = 0", "backup")]
    fn invalid_backup_values(#[case] toml: &str, #[case] key: &str) {
        let err = from_toml(toml).unwrap().backup_config().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(k) if *k == key));
    }

    #[test]
    fn missing_location() {
        let err = from_toml("").unwrap().source_location().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid("backup.source")));
    }

    #[test]
    fn wrong_type_fails_to_load() {
        let err = from_toml("[backup]\ninterval_secs = \"soon\"").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load));
    }

    #[test]
    fn s3_section_is_redacted() {
        let settings = from_toml(
            r#"
            [s3]
            region = "eu-west-1"
            key_id = "AKIA"
            key_secret = "hunter2"
            "#,
        )
        .unwrap();
        let credentials = settings.s3_credentials().unwrap();
        assert_eq!(credentials.region, "eu-west-1");
        assert_eq!(credentials.endpoint, None);
        assert!(!format!("{:?}", settings.s3).contains("hunter2"));
    }

    #[test]
    fn yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "shards:\n  location: /data\n  root: exports\n  lookback_days: 7").unwrap();
        let settings = Settings::from_figment(merge_file(Figment::new(), file.path())).unwrap();
        assert_eq!(
            settings.finder_settings(),
            FinderSettings {
                root: Some(PathBuf::from("exports")),
                lookback_days: 7,
            }
        );
        assert_eq!(settings.shards_location().unwrap(), Location::Local(PathBuf::from("/data")));
    }

    #[test]
    fn explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Missing(p) if *p == path));
    }
}
