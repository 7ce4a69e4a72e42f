//! Configuration file loading for the `vdisk` binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vdisk_storage::{EngineConfig, SnapshotFormat};

/// Top-level configuration for the `vdisk` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VdiskConfig {
    /// Device geometry and log bound.
    pub engine: EngineConfig,
    /// Where the device snapshot lives.
    pub snapshot_path: PathBuf,
    /// Snapshot encoding.
    pub snapshot_format: SnapshotFormat,
    /// Seed for fault simulation; entropy when absent.
    pub rng_seed: Option<u64>,
}

impl Default for VdiskConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            snapshot_path: PathBuf::from("disk_state.json"),
            snapshot_format: SnapshotFormat::Json,
            rng_seed: None,
        }
    }
}

impl VdiskConfig {
    /// Loads a `.toml` or `.json` configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: VdiskConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.engine.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }
}
