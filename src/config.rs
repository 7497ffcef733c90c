//! Processing configuration.
//!
//! The configuration lives at `~/.usgs/espa/processing.conf` and is TOML.
//! CLI flags override config file values, which override defaults.

use crate::types::{EspaError, EspaResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "processing.conf";

/// Config directory relative to the user's home.
const CONFIG_DIR_NAME: &str = ".usgs/espa";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub processing: ProcessingSection,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub warp: WarpConfig,

    /// Executable overrides keyed by application name.
    #[serde(default)]
    pub applications: HashMap<String, String>,
}

/// How finished products leave the processing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMethod {
    #[default]
    Local,
    Remote,
}

/// `[processing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSection {
    /// Root under which product directories are created.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Root of the distribution tree (`orders/`, `logs/`).
    pub distribution_dir: PathBuf,

    #[serde(default)]
    pub distribution_method: DistributionMethod,

    /// Host receiving products when distribution is remote.
    #[serde(default)]
    pub distribution_host: Option<String>,

    /// Requests finishing faster than this are padded with a sleep.
    #[serde(default)]
    pub min_request_duration_secs: u64,

    #[serde(default)]
    pub keep_intermediate_data: bool,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub max_set_scene_error_attempts: u32,

    #[serde(default = "default_attempts")]
    pub max_distribution_attempts: u32,

    #[serde(default = "default_transfer_attempts")]
    pub max_transfer_attempts: u32,

    #[serde(default = "default_sleep_seconds")]
    pub default_sleep_seconds: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_set_scene_error_attempts: default_attempts(),
            max_distribution_attempts: default_attempts(),
            max_transfer_attempts: default_transfer_attempts(),
            default_sleep_seconds: default_sleep_seconds(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    /// Sleep that follows a failed attempt, truncated to whole seconds
    pub fn next_sleep(&self, current_secs: u64) -> u64 {
        (current_secs as f64 * self.backoff_factor) as u64
    }
}

fn default_attempts() -> u32 {
    5
}
fn default_transfer_attempts() -> u32 {
    3
}
fn default_sleep_seconds() -> u64 {
    10
}
fn default_backoff_factor() -> f64 {
    1.5
}

/// `[warp]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarpConfig {
    /// gdalwarp working memory (`-wm`), in megabytes.
    #[serde(default = "default_warp_memory")]
    pub memory_mb: u32,

    /// Pass `-multi` to gdalwarp.
    #[serde(default = "default_true")]
    pub multithread: bool,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            memory_mb: default_warp_memory(),
            multithread: true,
        }
    }
}

fn default_warp_memory() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}

impl ProcessingConfig {
    /// Minimal configuration rooted at a distribution directory.
    pub fn with_distribution_dir<P: Into<PathBuf>>(distribution_dir: P) -> Self {
        Self {
            processing: ProcessingSection {
                work_dir: default_work_dir(),
                distribution_dir: distribution_dir.into(),
                distribution_method: DistributionMethod::Local,
                distribution_host: None,
                min_request_duration_secs: 0,
                keep_intermediate_data: false,
            },
            retry: RetryConfig::default(),
            warp: WarpConfig::default(),
            applications: HashMap::new(),
        }
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> EspaResult<Self> {
        let config: ProcessingConfig = toml::from_str(content)
            .map_err(|e| EspaError::Config(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file path.
    pub fn load_from(path: &Path) -> EspaResult<Self> {
        log::debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            EspaError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` or, when absent, from the default location.
    pub fn load(path: Option<&Path>) -> EspaResult<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&config_file_path()?),
        }
    }

    pub fn validate(&self) -> EspaResult<()> {
        if self.processing.distribution_dir.as_os_str().is_empty() {
            return Err(EspaError::Config("distribution_dir must not be empty".to_string()));
        }

        if self.processing.distribution_method == DistributionMethod::Remote
            && self.processing.distribution_host.as_deref().map_or(true, str::is_empty)
        {
            return Err(EspaError::Config(
                "distribution_host is required for remote distribution".to_string(),
            ));
        }

        if self.retry.backoff_factor < 1.0 {
            return Err(EspaError::Config(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            )));
        }

        Ok(())
    }

    /// Executable for a science application, honouring `[applications]`.
    pub fn program(&self, name: &str) -> String {
        self.applications
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// `<distribution_dir>/orders/<order_id>`
    pub fn order_dir(&self, order_id: &str) -> PathBuf {
        self.processing.distribution_dir.join("orders").join(order_id)
    }

    /// `<distribution_dir>/orders/<order_id>/stats`
    pub fn order_stats_dir(&self, order_id: &str) -> PathBuf {
        self.order_dir(order_id).join("stats")
    }

    /// `<distribution_dir>/logs/<order_id>`
    pub fn log_archive_dir(&self, order_id: &str) -> PathBuf {
        self.processing.distribution_dir.join("logs").join(order_id)
    }
}

/// Path of the default configuration file.
pub fn config_file_path() -> EspaResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EspaError::Config("could not determine home directory".to_string()))?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config = ProcessingConfig::from_toml(
            r#"
[processing]
distribution_dir = "/data/espa"
"#,
        )
        .unwrap();

        assert_eq!(config.processing.work_dir, PathBuf::from("."));
        assert_eq!(config.processing.distribution_method, DistributionMethod::Local);
        assert_eq!(config.retry.max_set_scene_error_attempts, 5);
        assert_eq!(config.retry.default_sleep_seconds, 10);
        assert_eq!(config.warp.memory_mb, 2048);
        assert!(config.warp.multithread);
        assert_eq!(config.program("cfmask"), "cfmask");
    }

    #[test]
    fn test_full_config() {
        let config = ProcessingConfig::from_toml(
            r#"
[processing]
work_dir = "/scratch"
distribution_dir = "/data/espa"
distribution_method = "remote"
distribution_host = "dist01"
min_request_duration_secs = 60

[retry]
max_distribution_attempts = 2
backoff_factor = 2.0

[warp]
memory_mb = 512
multithread = false

[applications]
cfmask = "/usr/local/espa/bin/cfmask"
"#,
        )
        .unwrap();

        assert_eq!(config.processing.distribution_host.as_deref(), Some("dist01"));
        assert_eq!(config.processing.min_request_duration_secs, 60);
        assert_eq!(config.retry.max_distribution_attempts, 2);
        assert_eq!(config.retry.max_transfer_attempts, 3);
        assert_eq!(config.program("cfmask"), "/usr/local/espa/bin/cfmask");
        assert_eq!(config.order_dir("o-1"), PathBuf::from("/data/espa/orders/o-1"));
        assert_eq!(config.log_archive_dir("o-1"), PathBuf::from("/data/espa/logs/o-1"));
    }

    #[test]
    fn test_remote_requires_host() {
        let result = ProcessingConfig::from_toml(
            r#"
[processing]
distribution_dir = "/data/espa"
distribution_method = "remote"
"#,
        );
        assert!(matches!(result, Err(EspaError::Config(_))));
    }

    #[test]
    fn test_missing_distribution_dir() {
        let result = ProcessingConfig::from_toml("[processing]\nwork_dir = \"/tmp\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_backoff() {
        let retry = RetryConfig::default();
        assert_eq!(retry.next_sleep(10), 15);
        assert_eq!(retry.next_sleep(15), 22);
    }
}
