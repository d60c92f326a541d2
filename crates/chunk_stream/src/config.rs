//! Streaming configuration.
//!
//! Loaded from TOML. Every field has a default, so a partial file (or none
//! at all) is valid.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geometry::RenderSize;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
  /// Chunk stride in cells. Chunk keys are multiples of it.
  pub chunk_stride: i32,
  /// Chunks per super-area side.
  pub super_area_strides: i32,
  /// Debounce window of the refresh scheduler.
  pub refresh_debounce_ms: u64,
  /// Hex radius in world units.
  pub hex_size: f32,
  /// Prefetch the chunks around a newly committed chunk.
  pub prefetch_neighbors: bool,
  /// Fetched or cached chunks kept before the least recently used are
  /// forgotten. Pinned chunks are never evicted, even above the limit.
  pub max_cached_chunks: usize,
  /// Render window around a chunk's center.
  pub render_size: RenderSize,
}

impl Default for StreamingConfig {
  fn default() -> Self {
    Self {
      chunk_stride: 24,
      super_area_strides: 4,
      refresh_debounce_ms: 50,
      hex_size: 1.0,
      prefetch_neighbors: true,
      max_cached_chunks: 16,
      render_size: RenderSize::default(),
    }
  }
}

impl StreamingConfig {
  /// Parses and validates a TOML document.
  pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
    let config: StreamingConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads, parses and validates a TOML file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    Self::from_toml_str(&contents)
  }

  /// Like [`load`](Self::load), but falls back to defaults on any error.
  pub fn load_or_default(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref();
    if !path.exists() {
      return Self::default();
    }
    match Self::load(path) {
      Ok(config) => {
        log::info!("Loaded streaming config from {}", path.display());
        config
      }
      Err(e) => {
        log::warn!("Failed to load streaming config: {e}, using defaults");
        Self::default()
      }
    }
  }

  pub fn to_toml_string(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(self)?)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.chunk_stride <= 0 {
      return Err(ConfigError::Invalid(format!(
        "chunk_stride must be positive, got {}",
        self.chunk_stride
      )));
    }
    if self.super_area_strides <= 0 {
      return Err(ConfigError::Invalid(format!(
        "super_area_strides must be positive, got {}",
        self.super_area_strides
      )));
    }
    if !(self.hex_size.is_finite() && self.hex_size > 0.0) {
      return Err(ConfigError::Invalid(format!(
        "hex_size must be a positive number, got {}",
        self.hex_size
      )));
    }
    if self.max_cached_chunks == 0 {
      return Err(ConfigError::Invalid("max_cached_chunks must be at least 1".to_string()));
    }
    Ok(())
  }

  pub fn refresh_debounce(&self) -> Duration {
    Duration::from_millis(self.refresh_debounce_ms)
  }
}

/// Error loading a [`StreamingConfig`].
#[derive(Debug)]
pub enum ConfigError {
  Io(std::io::Error),
  Parse(toml::de::Error),
  Serialize(toml::ser::Error),
  Invalid(String),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::Io(e) => write!(f, "I/O error: {e}"),
      ConfigError::Parse(e) => write!(f, "invalid TOML: {e}"),
      ConfigError::Serialize(e) => write!(f, "failed to serialize config: {e}"),
      ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
    }
  }
}

impl std::error::Error for ConfigError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      ConfigError::Io(e) => Some(e),
      ConfigError::Parse(e) => Some(e),
      ConfigError::Serialize(e) => Some(e),
      ConfigError::Invalid(_) => None,
    }
  }
}

impl From<std::io::Error> for ConfigError {
  fn from(e: std::io::Error) -> Self {
    ConfigError::Io(e)
  }
}

impl From<toml::de::Error> for ConfigError {
  fn from(e: toml::de::Error) -> Self {
    ConfigError::Parse(e)
  }
}

impl From<toml::ser::Error> for ConfigError {
  fn from(e: toml::ser::Error) -> Self {
    ConfigError::Serialize(e)
  }
}
