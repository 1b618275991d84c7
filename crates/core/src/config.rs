//! Engine configuration
//!
//! Worker count, polling, base-tier chunking and packing limits. Configuration
//! can be loaded from a TOML file, environment variables, or created
//! programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use photo_atlas_cache::LodLevel;
use photo_atlas_scheduler::WorkerPoolConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the atlas engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Build worker threads; 0 runs every build inline on the signalling thread
    pub workers: usize,
    /// How long an idle worker sleeps before polling for work, in milliseconds
    pub poll_interval_ms: u64,
    /// Photos per base-tier atlas during bootstrap
    pub base_chunk: usize,
    /// Largest atlas surface edge the packer may allocate, in pixels
    pub max_atlas_side: u32,
    /// Gap kept around each packed photo, in pixels
    pub padding: u32,
    /// Visible LOD before the first zoom signal
    pub initial_lod: LodLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: WorkerPoolConfig::default().num_workers,
            poll_interval_ms: 5,
            base_chunk: 256,
            max_atlas_side: 8192,
            padding: 1,
            initial_lod: LodLevel::Lod0,
        }
    }
}

impl EngineConfig {
    /// Configuration that builds everything on the calling thread.
    pub fn inline() -> Self {
        Self {
            workers: 0,
            ..Self::default()
        }
    }

    /// Sets the number of build workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets how many photos go into each base-tier atlas.
    pub fn with_base_chunk(mut self, photos: usize) -> Self {
        self.base_chunk = photos;
        self
    }

    /// Sets the largest surface edge the packer may allocate.
    pub fn with_max_atlas_side(mut self, side: u32) -> Self {
        self.max_atlas_side = side;
        self
    }

    pub fn with_padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }

    /// Sets the visible LOD used before any zoom signal arrives.
    pub fn with_initial_lod(mut self, lod: LodLevel) -> Self {
        self.initial_lod = lod;
        self
    }

    /// Idle poll interval, never shorter than a millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Most photos one atlas at `lod` can hold within `max_atlas_side`.
    ///
    /// Every photo occupies at most one tile, so a square of whole tiles
    /// always packs; larger generations are split across several atlases.
    pub fn photos_per_atlas(&self, lod: LodLevel) -> usize {
        let per_row = (self.max_atlas_side / lod.tile_side()).max(1) as usize;
        per_row * per_row
    }

    /// Whether builds run on the signalling thread.
    pub fn is_inline(&self) -> bool {
        self.workers == 0
    }

    /// Worker pool settings, `None` for inline dispatch.
    pub fn worker_pool_config(&self) -> Option<WorkerPoolConfig> {
        if self.is_inline() {
            return None;
        }
        Some(WorkerPoolConfig::new(self.workers).with_poll_interval(self.poll_interval()))
    }

    /// Returns the default configuration file path for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/photo-atlas/engine.toml
    /// - Linux: ~/.config/photo-atlas/engine.toml
    /// - Windows: %APPDATA%\photo-atlas\engine.toml
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("photo-atlas").join("engine.toml"),
            None => PathBuf::from("photo-atlas.toml"),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PHOTO_ATLAS_WORKERS`: build worker count, 0 for inline builds
    /// - `PHOTO_ATLAS_POLL_MS`: idle worker poll interval in milliseconds (default: 5)
    /// - `PHOTO_ATLAS_BASE_CHUNK`: photos per base-tier atlas (default: 256)
    /// - `PHOTO_ATLAS_MAX_SIDE`: largest atlas edge in pixels (default: 8192)
    /// - `PHOTO_ATLAS_INITIAL_LOD`: starting LOD index, 0 through 7 (default: 0)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(workers) = env_value("PHOTO_ATLAS_WORKERS")? {
            config.workers = workers;
        }
        if let Some(poll) = env_value("PHOTO_ATLAS_POLL_MS")? {
            config.poll_interval_ms = poll;
        }
        if let Some(chunk) = env_value("PHOTO_ATLAS_BASE_CHUNK")? {
            config.base_chunk = chunk;
        }
        if let Some(side) = env_value("PHOTO_ATLAS_MAX_SIDE")? {
            config.max_atlas_side = side;
        }
        if let Some(index) = env_value::<u8>("PHOTO_ATLAS_INITIAL_LOD")? {
            config.initial_lod =
                LodLevel::from_index(index).ok_or_else(|| ConfigError::InvalidValue {
                    key: "PHOTO_ATLAS_INITIAL_LOD".to_string(),
                    value: index.to_string(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format (missing keys keep their defaults):
    /// ```toml
    /// workers = 4
    /// poll_interval_ms = 5
    /// base_chunk = 256
    /// max_atlas_side = 8192
    /// padding = 1
    /// initial_lod = "Lod0"
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval_ms".to_string(),
                value: "0".to_string(),
            });
        }
        if self.base_chunk == 0 {
            return Err(ConfigError::InvalidValue {
                key: "base_chunk".to_string(),
                value: "0".to_string(),
            });
        }
        if self.max_atlas_side == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_atlas_side".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_value<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for configuration key {key}")]
    InvalidValue { key: String, value: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
