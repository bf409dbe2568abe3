use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a single uploaded image, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeConfig {
    /// Compositions allowed to stream at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long a request waits for a free slot before it is answered "busy".
    /// 0 rejects immediately.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    /// Decoded rows buffered between each decoder and the compositor.
    #[serde(default = "default_row_queue_depth")]
    pub row_queue_depth: usize,
    /// Encoded chunks buffered between the encoder and the response body.
    #[serde(default = "default_chunk_queue_depth")]
    pub chunk_queue_depth: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            catalog_path: default_catalog_path(),
        }
    }
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_timeout_ms: default_queue_timeout_ms(),
            row_queue_depth: default_row_queue_depth(),
            chunk_queue_depth: default_chunk_queue_depth(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would stall every composition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.compose;
        if c.max_concurrent == 0 {
            return Err(ConfigError::Invalid("compose.max_concurrent must be > 0".into()));
        }
        if c.row_queue_depth == 0 || c.chunk_queue_depth == 0 {
            return Err(ConfigError::Invalid("compose queue depths must be > 0".into()));
        }
        if c.chunk_size == 0 {
            return Err(ConfigError::Invalid("compose.chunk_size must be > 0".into()));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("server.max_upload_bytes must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_port() -> u16 {
    3000
}
fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}
fn default_image_dir() -> String {
    "data/images".into()
}
fn default_catalog_path() -> String {
    "data/catalog.db".into()
}
fn default_max_concurrent() -> usize {
    8
}
fn default_queue_timeout_ms() -> u64 {
    0
}
fn default_row_queue_depth() -> usize {
    16
}
fn default_chunk_queue_depth() -> usize {
    8
}
fn default_chunk_size() -> usize {
    64 * 1024
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.compose.max_concurrent, 8);
        assert_eq!(config.compose.queue_timeout_ms, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [compose]
            max_concurrent = 2
            row_queue_depth = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.compose.max_concurrent, 2);
        assert_eq!(config.compose.row_queue_depth, 4);
        assert_eq!(config.compose.chunk_size, 64 * 1024);
        assert_eq!(config.storage.image_dir, "data/images");
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = Config::from_toml("[compose]\nmax_concurrent = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_queue_rejected() {
        let err = Config::from_toml("[compose]\nchunk_queue_depth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = Config::from_toml("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load(Path::new("/nonexistent/backswap.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
