use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RefsketchError;

pub const CONFIG_FILE_NAME: &str = "refsketch.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub remote_base_url: Option<String>,
    #[serde(default)]
    pub taxdump_url: Option<String>,
    #[serde(default)]
    pub sketch_size: Option<u32>,
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_resolve_attempts: Option<u32>,
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub tools: ToolPaths,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ToolPaths {
    #[serde(default)]
    pub mash: Option<PathBuf>,
    #[serde(default)]
    pub taxonkit: Option<PathBuf>,
    #[serde(default)]
    pub tar: Option<PathBuf>,
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub sketch_size: Option<u32>,
    pub max_resolve_attempts: Option<u32>,
    pub request_delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub schema_version: u32,
    pub remote_base_url: String,
    pub taxdump_url: String,
    pub sketch_size: u32,
    pub request_delay: Duration,
    pub max_resolve_attempts: u32,
    pub retry_base_delay: Duration,
    pub http_timeout: Duration,
    pub download_timeout: Duration,
    pub tools: ToolPaths,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            remote_base_url: "https://ftp.ncbi.nih.gov".to_string(),
            taxdump_url: "https://ftp.ncbi.nih.gov/pub/taxonomy/taxdump.tar.gz".to_string(),
            sketch_size: 10_000,
            request_delay: Duration::from_millis(500),
            max_resolve_attempts: 5,
            retry_base_delay: Duration::from_millis(1000),
            http_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(3600),
            tools: ToolPaths::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path` if given, otherwise `refsketch.json` in `output_dir` when it
    /// exists, otherwise the defaults.
    pub fn resolve(
        path: Option<&Path>,
        output_dir: &Path,
        overrides: &Overrides,
    ) -> Result<Settings, RefsketchError> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let candidate = output_dir.join(CONFIG_FILE_NAME);
                candidate.exists().then_some(candidate)
            }
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| RefsketchError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| RefsketchError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: &Overrides,
    ) -> Result<Settings, RefsketchError> {
        let defaults = Settings::default();

        let sketch_size = overrides
            .sketch_size
            .or(config.sketch_size)
            .unwrap_or(defaults.sketch_size);
        if sketch_size == 0 {
            return Err(RefsketchError::InvalidConfig(
                "sketch_size must be greater than zero".to_string(),
            ));
        }

        let max_resolve_attempts = overrides
            .max_resolve_attempts
            .or(config.max_resolve_attempts)
            .unwrap_or(defaults.max_resolve_attempts);
        if max_resolve_attempts == 0 {
            return Err(RefsketchError::InvalidConfig(
                "max_resolve_attempts must be at least 1".to_string(),
            ));
        }

        let remote_base_url = config
            .remote_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.remote_base_url);

        Ok(Settings {
            schema_version: config.schema_version.unwrap_or(defaults.schema_version),
            remote_base_url,
            taxdump_url: config.taxdump_url.unwrap_or(defaults.taxdump_url),
            sketch_size,
            request_delay: overrides
                .request_delay_ms
                .or(config.request_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_delay),
            max_resolve_attempts,
            retry_base_delay: config
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            http_timeout: config
                .http_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            download_timeout: config
                .download_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            tools: config.tools,
        })
    }
}
