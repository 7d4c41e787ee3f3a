// ABOUTME: Configuration management for the skein application
// ABOUTME: Handles loading and merging configuration from files and environment variables

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_http_timeout() -> u64 {
    30
}

fn default_max_delay() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
            user_agent: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay_seconds: default_max_delay(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl RetryConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds)
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&contents)?
        } else {
            Config::default()
        };
        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let possible_paths = [
            PathBuf::from("skein.yaml"),
            PathBuf::from("skein.yml"),
            PathBuf::from(".skein.yaml"),
        ];

        for path in possible_paths {
            if path.exists() {
                return path;
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".skein").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from("skein.yaml")
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("SKEIN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SKEIN_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(max_tasks) = std::env::var("SKEIN_MAX_CONCURRENT") {
            self.max_concurrent_tasks = max_tasks.parse()?;
        }
        if let Ok(timeout) = std::env::var("SKEIN_HTTP_TIMEOUT") {
            self.http.timeout_seconds = timeout.parse()?;
        }
        Ok(())
    }
}
