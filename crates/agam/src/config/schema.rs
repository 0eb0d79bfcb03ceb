use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_directory")]
    pub data_directory: String,
    #[serde(default)]
    pub mode: ServiceMode,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            mode: ServiceMode::default(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            converter: ConverterConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Data directory with a leading `~` expanded to the home directory.
    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_directory)
    }

    pub fn temp_path(&self) -> PathBuf {
        self.data_path().join("temp")
    }

    pub fn blob_path(&self) -> PathBuf {
        self.data_path().join("blobs")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_path().join("agam.db")
    }
}

pub(crate) fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn default_data_directory() -> String {
    "~/.agam/data".to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    default_worker_count() * 4
}

/// How requests are serviced.
///
/// `Durable` records every request as a job and processes it on the worker
/// pool. `Streaming` converts on the request thread and returns the file
/// directly, keeping no job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    #[default]
    Durable,
    Streaming,
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

impl std::str::FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "durable" => Ok(Self::Durable),
            "streaming" => Ok(Self::Streaming),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Temp entries older than this are reclaimed by the sweep.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_retention_secs() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_total_size")]
    pub max_total_size: u64,
    #[serde(default = "default_max_merge_files")]
    pub max_merge_files: usize,
}

fn default_max_file_size() -> u64 {
    25 * 1024 * 1024
}

fn default_max_total_size() -> u64 {
    50 * 1024 * 1024
}

fn default_max_merge_files() -> usize {
    20
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_total_size: default_max_total_size(),
            max_merge_files: default_max_merge_files(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Explicit path to the office converter. When unset the usual install
    /// locations and `PATH` are probed.
    #[serde(default)]
    pub office_binary: Option<String>,
    #[serde(default = "default_rasterizer_binary")]
    pub rasterizer_binary: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_rasterizer_binary() -> String {
    "pdftoppm".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            office_binary: None,
            rasterizer_binary: default_rasterizer_binary(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.mode, ServiceMode::Durable);
        assert_eq!(config.storage.retention_secs, 3600);
        assert_eq!(config.limits.max_file_size, 26_214_400);
        assert_eq!(config.limits.max_total_size, 52_428_800);
        assert_eq!(config.limits.max_merge_files, 20);
        assert_eq!(config.converter.rasterizer_binary, "pdftoppm");
        assert!(config.converter.office_binary.is_none());
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert!(config.worker_count > 0);
    }

    #[test]
    fn test_mode_parsing() {
        let config: Config = serde_json::from_str(r#"{"mode": "streaming"}"#).unwrap();
        assert_eq!(config.mode, ServiceMode::Streaming);
        assert_eq!("DURABLE".parse::<ServiceMode>(), Ok(ServiceMode::Durable));
        assert!("batch".parse::<ServiceMode>().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = Config {
            data_directory: "/srv/agam".to_string(),
            ..Default::default()
        };
        assert_eq!(config.temp_path(), PathBuf::from("/srv/agam/temp"));
        assert_eq!(config.blob_path(), PathBuf::from("/srv/agam/blobs"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/agam/agam.db"));
    }

    #[test]
    fn test_home_expansion() {
        let path = expand_home("~/.agam/data");
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with(".agam/data"));
    }
}
