//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./database/companies.db"
//!
//! [import]
//! batch_size = 10000
//! progress_interval = 10000
//! expected_total = 5600000
//! sync_strategy = "rebuild"     # or "incremental"
//!
//! [source]
//! include_globs = ["*.csv", "*.txt"]
//!
//! [mapping]
//! company_number = ["CompanyNumber", " CompanyNumber"]
//! ```
//!
//! Every section is optional. When the config file itself does not exist
//! the defaults apply, including the database path
//! [`DEFAULT_DB_PATH`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::mapping::FieldMap;

/// Fallback database location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "./database/companies.db";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub source: SourceConfig,
    /// Logical field name → candidate column names.
    #[serde(default)]
    pub mapping: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    #[serde(default = "default_expected_total")]
    pub expected_total: u64,
    #[serde(default)]
    pub sync_strategy: SyncStrategy,
    #[serde(default = "default_analyze_after")]
    pub analyze_after: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            progress_interval: default_progress_interval(),
            expected_total: default_expected_total(),
            sync_strategy: SyncStrategy::default(),
            analyze_after: default_analyze_after(),
        }
    }
}

fn default_batch_size() -> usize {
    10_000
}
fn default_progress_interval() -> u64 {
    10_000
}
fn default_expected_total() -> u64 {
    5_600_000
}
fn default_analyze_after() -> bool {
    true
}

/// How the search mirror is kept in step with the companies table.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Regenerate the whole mirror after a run.
    #[default]
    Rebuild,
    /// Keep the mirror current with triggers on every write.
    Incremental,
}

impl FromStr for SyncStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rebuild" => Ok(SyncStrategy::Rebuild),
            "incremental" => Ok(SyncStrategy::Incremental),
            other => bail!(
                "Unknown sync strategy: '{}'. Use rebuild or incremental.",
                other
            ),
        }
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStrategy::Rebuild => write!(f, "rebuild"),
            SyncStrategy::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["*.csv".to_string(), "*.txt".to_string()]
}

impl Config {
    /// Defaults with the database at `path`. Handy for tests and one-off runs.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            ..Self::default()
        }
    }

    /// The built-in field map with this config's overrides applied.
    pub fn field_map(&self) -> Result<FieldMap> {
        FieldMap::with_overrides(&self.mapping)
    }
}

/// Load and validate a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::info!(
            config = %path.display(),
            db = DEFAULT_DB_PATH,
            "config file not found, using defaults"
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.import.batch_size == 0 {
        bail!("import.batch_size must be > 0");
    }
    if config.import.progress_interval == 0 {
        bail!("import.progress_interval must be > 0");
    }
    if config.source.include_globs.is_empty() {
        bail!("source.include_globs must not be empty");
    }
    // Surface bad mapping keys at load time rather than mid-import.
    config.field_map()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Field;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.db.path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.import.batch_size, 10_000);
        assert_eq!(config.import.progress_interval, 10_000);
        assert_eq!(config.import.sync_strategy, SyncStrategy::Rebuild);
        assert!(config.import.analyze_after);
    }

    #[test]
    fn full_file() {
        let config = parse_config(
            r#"
            [db]
            path = "/tmp/companies.sqlite"

            [import]
            batch_size = 500
            expected_total = 1000
            sync_strategy = "incremental"

            [mapping]
            company_number = ["CoNo"]
            "#,
        )
        .unwrap();
        assert_eq!(config.db.path, PathBuf::from("/tmp/companies.sqlite"));
        assert_eq!(config.import.batch_size, 500);
        assert_eq!(config.import.sync_strategy, SyncStrategy::Incremental);
        let map = config.field_map().unwrap();
        assert_eq!(map.candidates(Field::CompanyNumber), ["CoNo".to_string()]);
    }

    #[test]
    fn example_config_parses() {
        let config = parse_config(include_str!("../config/coload.example.toml")).unwrap();
        assert_eq!(config.import.expected_total, 5_600_000);
        assert_eq!(config.source.include_globs, vec!["*.csv", "*.txt"]);
        assert!(config.mapping.is_empty());
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(parse_config("[import]\nbatch_size = 0\n").is_err());
    }

    #[test]
    fn rejects_unknown_mapping_key() {
        assert!(parse_config("[mapping]\nshoe_size = [\"Shoe\"]\n").is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = load_config(Path::new("/definitely/not/here/coload.toml")).unwrap();
        assert_eq!(config.db.path, PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn strategy_from_str() {
        assert_eq!("rebuild".parse::<SyncStrategy>().unwrap(), SyncStrategy::Rebuild);
        assert_eq!(
            "incremental".parse::<SyncStrategy>().unwrap(),
            SyncStrategy::Incremental
        );
        assert!("eventually".parse::<SyncStrategy>().is_err());
    }
}
