//! Client configuration

use serde::{Deserialize, Serialize};

use crate::data::layout::{CreateParams, LayoutPlanner};
use crate::rpc::ServerLocation;

/// Default configuration constants
///
/// Every default the client falls back to when a field is missing from the
/// TOML file, or when a create call asks for "the client default".
pub mod defaults {
    /// Default metadata server host
    pub const fn meta_host() -> &'static str {
        "127.0.0.1"
    }

    /// Default metadata server port
    pub const META_PORT: u16 = 20000;

    /// Output channel buffer: 1MB
    pub const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

    /// Input channel read-ahead: 1MB
    pub const READ_AHEAD_SIZE: usize = 1024 * 1024;

    /// Layout used when a create call passes an empty parameter string
    /// (1 replica, no striping, full tier range)
    pub const fn create_params() -> &'static str {
        "1,0,0,0,1,0,15"
    }

    /// Location cache entries (paths)
    pub const LOCATION_CACHE_ENTRIES: usize = 1024;

    /// Location cache shards (must be a power of two)
    pub const LOCATION_CACHE_SHARDS: usize = 16;

    /// Cache TTL in seconds (0 = no TTL/expiration)
    pub const CACHE_TTL_SECS: u64 = 0;

    /// Maximum chunk RPCs in flight for one channel flush or fill
    pub const MAX_CONCURRENT_CHUNK_RPCS: usize = 16;

    /// Default log level
    pub const fn log_level() -> &'static str {
        "info"
    }

    /// Per-client statistics are collected unless disabled
    pub const ENABLE_STATS: bool = true;
}

/// Access client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Metadata server address
    #[serde(default = "default_meta_server")]
    pub meta_server: ServerLocation,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Collect per-client counters exposed by `get_stats`
    #[serde(default = "default_enable_stats")]
    pub enable_stats: bool,

    /// Channel I/O configuration
    #[serde(default)]
    pub io: IoConfig,

    /// Location cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_meta_server() -> ServerLocation {
    ServerLocation::new(defaults::meta_host(), defaults::META_PORT)
}

fn default_log_level() -> String {
    defaults::log_level().to_string()
}

fn default_enable_stats() -> bool {
    defaults::ENABLE_STATS
}

/// Channel I/O configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Bytes an output channel buffers before flushing to chunk servers
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,

    /// Bytes an input channel prefetches past the cursor (0 disables)
    #[serde(default = "default_read_ahead_size")]
    pub read_ahead_size: usize,

    /// Compact layout string used when a create passes no parameters
    #[serde(default = "default_create_params")]
    pub default_create_params: String,

    /// Chunk RPCs in flight per flush or fill
    #[serde(default = "default_max_concurrent_chunk_rpcs")]
    pub max_concurrent_chunk_rpcs: usize,
}

fn default_write_buffer_size() -> usize {
    defaults::WRITE_BUFFER_SIZE
}

fn default_read_ahead_size() -> usize {
    defaults::READ_AHEAD_SIZE
}

fn default_create_params() -> String {
    defaults::create_params().to_string()
}

fn default_max_concurrent_chunk_rpcs() -> usize {
    defaults::MAX_CONCURRENT_CHUNK_RPCS
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: default_write_buffer_size(),
            read_ahead_size: default_read_ahead_size(),
            default_create_params: default_create_params(),
            max_concurrent_chunk_rpcs: default_max_concurrent_chunk_rpcs(),
        }
    }
}

/// Location cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Paths kept in the chunk location cache
    #[serde(default = "default_location_cache_entries")]
    pub location_cache_entries: usize,

    /// Independent cache shards (power of two)
    #[serde(default = "default_location_cache_shards")]
    pub location_cache_shards: usize,

    /// Cache TTL in seconds (0 = no TTL)
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

fn default_location_cache_entries() -> usize {
    defaults::LOCATION_CACHE_ENTRIES
}

fn default_location_cache_shards() -> usize {
    defaults::LOCATION_CACHE_SHARDS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location_cache_entries: default_location_cache_entries(),
            location_cache_shards: default_location_cache_shards(),
            cache_ttl_secs: defaults::CACHE_TTL_SECS,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            meta_server: default_meta_server(),
            log_level: default_log_level(),
            enable_stats: default_enable_stats(),
            io: IoConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at `host:port` with every other field defaulted
    pub fn for_meta_server(host: &str, port: u16) -> Self {
        Self {
            meta_server: ServerLocation::new(host, port),
            ..Self::default()
        }
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("Failed to read config file: {}", e)))?;

        let config: ClientConfig = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::SerializeError(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meta_server.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "Metadata server host cannot be empty".to_string(),
            ));
        }

        if self.meta_server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Metadata server port cannot be 0".to_string(),
            ));
        }

        if self.io.write_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "Write buffer size must be greater than 0".to_string(),
            ));
        }

        if self.io.max_concurrent_chunk_rpcs == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_chunk_rpcs must be greater than 0".to_string(),
            ));
        }

        let params: CreateParams = self.io.default_create_params.parse().map_err(|e| {
            ConfigError::ValidationError(format!("Invalid default_create_params: {}", e))
        })?;
        LayoutPlanner::plan(&params).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid default_create_params: {}", e))
        })?;

        if self.cache.location_cache_entries == 0 {
            return Err(ConfigError::ValidationError(
                "Location cache must hold at least one entry".to_string(),
            ));
        }

        if !self.cache.location_cache_shards.is_power_of_two() {
            return Err(ConfigError::ValidationError(format!(
                "Location cache shards must be a power of two: {}",
                self.cache.location_cache_shards
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.log_level
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.meta_server.port, 20000);
        assert_eq!(config.io.write_buffer_size, 1024 * 1024);
        assert_eq!(config.io.read_ahead_size, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ClientConfig::default();

        config.meta_server.host = "".to_string();
        assert!(config.validate().is_err());
        config.meta_server.host = "meta1".to_string();

        config.meta_server.port = 0;
        assert!(config.validate().is_err());
        config.meta_server.port = 20000;

        config.io.write_buffer_size = 0;
        assert!(config.validate().is_err());
        config.io.write_buffer_size = 4096;

        // read-ahead 0 is legal: it disables prefetch
        config.io.read_ahead_size = 0;
        assert!(config.validate().is_ok());

        config.io.default_create_params = "0,0,0,0,1,0,15".to_string();
        assert!(config.validate().is_err());
        config.io.default_create_params = "S".to_string();
        assert!(config.validate().is_ok());

        config.cache.location_cache_shards = 12;
        assert!(config.validate().is_err());
        config.cache.location_cache_shards = 8;

        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        let path = path.to_str().unwrap();

        let mut config = ClientConfig::for_meta_server("meta.example", 30000);
        config.io.read_ahead_size = 0;
        config.to_file(path).unwrap();

        let loaded = ClientConfig::from_file(path).unwrap();
        assert_eq!(loaded.meta_server, config.meta_server);
        assert_eq!(loaded.io.read_ahead_size, 0);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n[meta_server]\nhost = \"meta2\"\nport = 20100\n",
        )
        .unwrap();

        let loaded = ClientConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.meta_server.host, "meta2");
        assert_eq!(loaded.log_level, "debug");
        assert_eq!(loaded.io.write_buffer_size, defaults::WRITE_BUFFER_SIZE);
        assert_eq!(
            loaded.cache.location_cache_shards,
            defaults::LOCATION_CACHE_SHARDS
        );
    }
}
