// fed-core/src/config.rs

//! Configuration management for the federated aggregation runtime.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{FedError, Result};

// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FedConfig {
    pub store: StoreConfig,
    pub artifact: ArtifactConfig,
    pub round: RoundConfig,
}

// Artifact store configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    // Base directory for all store operations.
    pub base_path: PathBuf,
    // Global state directory; resolved against base_path when relative.
    pub global_dir: PathBuf,
    // Provider submission directory; resolved against base_path when relative.
    pub updates_dir: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to use memory-mapped I/O for artifact reads.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

// Artifact encoding options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    // Compression algorithm: "none", "lz4", or "zstd".
    pub compression: String,
    // Compression level (algorithm-specific).
    pub compression_level: i32,
}

/// Round driver timing.
///
/// The defaults mirror a short demo cadence; production deployments set
/// these per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// How long the submission window stays open per round, in milliseconds.
    pub round_duration_ms: u64,
    /// Settle delay between window close and aggregation, in milliseconds,
    /// letting in-flight artifact writes land.
    pub aggregation_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./storage"),
            global_dir: PathBuf::from("global-models"),
            updates_dir: PathBuf::from("provider-updates"),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            compression: "lz4".to_string(),
            compression_level: 1,
        }
    }
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            round_duration_ms: 15_000,
            aggregation_delay_ms: 2_000,
        }
    }
}

impl StoreConfig {
    /// Absolute (or base-relative) directory holding global states.
    pub fn resolved_global_dir(&self) -> PathBuf {
        if self.global_dir.is_absolute() {
            self.global_dir.clone()
        } else {
            self.base_path.join(&self.global_dir)
        }
    }

    /// Absolute (or base-relative) directory holding provider submissions.
    pub fn resolved_updates_dir(&self) -> PathBuf {
        if self.updates_dir.is_absolute() {
            self.updates_dir.clone()
        } else {
            self.base_path.join(&self.updates_dir)
        }
    }
}

impl FromStr for FedConfig {
    type Err = FedError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| FedError::config_with_source("failed to parse TOML config", e))
    }
}

impl FedConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FedError::storage_with_source(path, "failed to read config file", e))?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `FED_` and use underscores
    // to separate nested fields. For example:
    // - `FED_STORE_BASE_PATH` overrides `store.base_path`
    // - `FED_ARTIFACT_COMPRESSION` overrides `artifact.compression`
    // - `FED_ROUND_DURATION_MS` overrides `round.round_duration_ms`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Store overrides
        if let Ok(val) = std::env::var("FED_STORE_BASE_PATH") {
            self.store.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FED_STORE_GLOBAL_DIR") {
            self.store.global_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FED_STORE_UPDATES_DIR") {
            self.store.updates_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FED_STORE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.store.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("FED_STORE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.store.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("FED_STORE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.store.mmap_threshold = v;
            }
        }

        // Artifact overrides
        if let Ok(val) = std::env::var("FED_ARTIFACT_COMPRESSION") {
            self.artifact.compression = val;
        }
        if let Ok(val) = std::env::var("FED_ARTIFACT_COMPRESSION_LEVEL") {
            if let Ok(v) = val.parse() {
                self.artifact.compression_level = v;
            }
        }

        // Round overrides
        if let Ok(val) = std::env::var("FED_ROUND_DURATION_MS") {
            if let Ok(v) = val.parse() {
                self.round.round_duration_ms = v;
            }
        }
        if let Ok(val) = std::env::var("FED_ROUND_AGGREGATION_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.round.aggregation_delay_ms = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.store.buffer_size == 0 {
            return Err(FedError::config("store.buffer_size must be greater than 0"));
        }

        if self.store.global_dir == self.store.updates_dir {
            return Err(FedError::config(
                "store.global_dir and store.updates_dir must differ",
            ));
        }

        let valid_compression = ["none", "lz4", "zstd"];
        if !valid_compression.contains(&self.artifact.compression.as_str()) {
            return Err(FedError::config(format!(
                "artifact.compression must be one of: {}",
                valid_compression.join(", ")
            )));
        }

        if self.round.round_duration_ms == 0 {
            return Err(FedError::config(
                "round.round_duration_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}
