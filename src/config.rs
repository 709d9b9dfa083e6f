use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub scan: ScanConfig,
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
    PathBuf::from("./data/clausemap.sqlite")
}

/// Threshold and truncation policy for the clause matcher.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MatchingConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_matches_per_doc")]
    pub max_matches_per_doc: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_matches_per_doc: default_max_matches_per_doc(),
        }
    }
}

fn default_threshold() -> f64 {
    0.3
}
fn default_max_matches_per_doc() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_extract_bytes")]
    pub max_extract_bytes: u64,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_extract_bytes: default_max_extract_bytes(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_max_extract_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_stale_after_secs() -> u64 {
    3600
}

impl ScanConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        // capped at roughly a century
        chrono::Duration::seconds(self.stale_after_secs.min(3_153_600_000) as i64)
    }
}

impl Config {
    /// Defaults for every section; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.matching.threshold) {
            anyhow::bail!("matching.threshold must be in [0.0, 1.0]");
        }
        if self.matching.max_matches_per_doc == 0 {
            anyhow::bail!("matching.max_matches_per_doc must be >= 1");
        }
        if self.scan.workers == 0 {
            anyhow::bail!("scan.workers must be >= 1");
        }
        if self.scan.max_extract_bytes == 0 {
            anyhow::bail!("scan.max_extract_bytes must be > 0");
        }
        for pattern in &self.scan.exclude_globs {
            globset::Glob::new(pattern)
                .with_context(|| format!("invalid scan.exclude_globs pattern: {}", pattern))?;
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.matching.threshold, 0.3);
        assert_eq!(config.matching.max_matches_per_doc, 3);
        assert_eq!(config.scan.workers, 4);
        assert_eq!(config.scan.stale_after_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "/tmp/x.sqlite"

            [matching]
            threshold = 0.5

            [scan]
            exclude_globs = ["**/archive/**"]
            "#,
        )
        .unwrap();
        assert_eq!(config.db.path, PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(config.matching.threshold, 0.5);
        assert_eq!(config.matching.max_matches_per_doc, 3);
        assert_eq!(config.scan.exclude_globs, vec!["**/archive/**".to_string()]);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = Config::minimal();
        config.matching.threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.matching.max_matches_per_doc = 0;
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.scan.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::minimal();
        config.scan.exclude_globs = vec!["[".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../config/clausemap.example.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.max_extract_bytes, 50 * 1024 * 1024);
        assert_eq!(config.scan.stale_after().num_seconds(), 3600);
    }
}
