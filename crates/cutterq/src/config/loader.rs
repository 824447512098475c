use std::path::Path;

use crate::config::schema::QueueConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<QueueConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<QueueConfig, ConfigError> {
    let config: QueueConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if !(config.cutting_speed_cm_per_min.is_finite() && config.cutting_speed_cm_per_min > 0.0) {
        return Err(ConfigError::Validation {
            message: format!(
                "cutting_speed_cm_per_min must be a positive number, got {}",
                config.cutting_speed_cm_per_min
            ),
        });
    }

    if config.search_limit == 0 {
        return Err(ConfigError::Validation {
            message: "search_limit must be at least 1".to_string(),
        });
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "poll_interval_ms must be at least 1".to_string(),
        });
    }

    if config.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "data_dir must not be empty".to_string(),
        });
    }

    Ok(())
}
