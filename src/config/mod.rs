//! Engine configuration
//!
//! [`LevelGeometryConfig`] is read from TOML. Runtime render distance changes go
//! through a [`RenderSettingsHandle`] rather than a global.

mod render_settings;

pub use render_settings::{
    RenderSettings, RenderSettingsEvent, RenderSettingsHandle, UNLOAD_MARGIN,
};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GeometryResult;

/// Number of meshing workers used when the config does not say otherwise
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Level geometry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelGeometryConfig {
    /// Meshing worker threads. 0 picks a count from the CPU.
    pub worker_count: usize,
    /// Radius, in chunks, within which chunks are meshed
    pub load_distance: u32,
    /// Radius, in chunks, outside which chunks are evicted
    pub unload_distance: u32,
    /// Resource pack to load on startup
    pub resource_pack_dir: Option<PathBuf>,
    /// Where packed atlases are cached between runs
    pub atlas_cache_dir: Option<PathBuf>,
}

impl Default for LevelGeometryConfig {
    fn default() -> Self {
        let settings = RenderSettings::default();
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            load_distance: settings.load_distance(),
            unload_distance: settings.unload_distance(),
            resource_pack_dir: None,
            atlas_cache_dir: None,
        }
    }
}

impl LevelGeometryConfig {
    pub fn from_toml_str(raw: &str) -> GeometryResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> GeometryResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        log::info!("[LevelGeometryConfig::load] Loaded {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> GeometryResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Worker count with the automatic choice resolved
    pub fn worker_threads(&self) -> usize {
        if self.worker_count == 0 {
            // Leave 2 cores for the render thread and the OS
            num_cpus::get().saturating_sub(2).max(1)
        } else {
            self.worker_count
        }
    }

    /// Normalised render settings described by this config
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings::new(self.load_distance, self.unload_distance)
    }
}
