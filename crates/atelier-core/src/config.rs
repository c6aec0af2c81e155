use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default force-flush threshold for the stream parse buffer. A response
/// that opens a block and never closes it would otherwise grow the buffer
/// without bound until the stream ends.
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024; // 1 MB

/// Top-level config (atelier.toml + ATELIER_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AtelierConfig {
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Streaming response parser configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Parse buffer cap in bytes. When a feed leaves more than this buffered
    /// (an unclosed block that keeps growing), the buffer is force-emitted as
    /// plain text. `0` disables the cap.
    /// Override with env var: ATELIER_STREAM__MAX_BUFFER_BYTES=...
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: MAX_BUFFER_BYTES,
        }
    }
}

fn default_max_buffer_bytes() -> usize {
    MAX_BUFFER_BYTES
}

impl AtelierConfig {
    /// Load config from a TOML file with ATELIER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.atelier/atelier.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AtelierConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ATELIER_").split("__"))
            .extract()
            .map_err(|e| crate::error::AtelierError::Config(e.to_string()))?;

        debug!(%path, "config loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.atelier/atelier.toml", home)
}
