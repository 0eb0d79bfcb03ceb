use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "AGAM_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the file named by `AGAM_CONFIG` (or the built-in defaults when it is
/// unset), then applies the `AGAM_BIND`, `AGAM_MODE` and `AGAM_DATA_DIR`
/// overrides.
pub fn load_from_env() -> Result<Config, ConfigError> {
    let mut config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(bind) = std::env::var("AGAM_BIND") {
        config.server.bind = bind;
    }
    if let Ok(mode) = std::env::var("AGAM_MODE") {
        config.mode = mode
            .parse()
            .map_err(|message| ConfigError::Validation { message })?;
    }
    if let Ok(dir) = std::env::var("AGAM_DATA_DIR") {
        config.data_directory = dir;
    }
    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.queue_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "queue_capacity must be at least 1".to_string(),
        });
    }

    if config.data_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "data_directory must not be empty".to_string(),
        });
    }

    let limits = &config.limits;
    if limits.max_file_size == 0 || limits.max_total_size < limits.max_file_size {
        return Err(ConfigError::Validation {
            message: format!(
                "limits are inconsistent: max_file_size={} max_total_size={}",
                limits.max_file_size, limits.max_total_size
            ),
        });
    }

    if limits.max_merge_files < 2 {
        return Err(ConfigError::Validation {
            message: "max_merge_files must be at least 2".to_string(),
        });
    }

    if config.converter.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "converter.timeout_secs must be at least 1".to_string(),
        });
    }

    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Validation {
            message: format!("server.bind '{}' is not a socket address", config.server.bind),
        });
    }

    Ok(())
}
