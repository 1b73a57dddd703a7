// config.rs — deployment configuration for the vmap engine
//
// Loaded from a TOML file:
//
//   base_path = "vmaps"
//   enable_line_of_sight_calc = true
//   enable_height_calc = true
//
//   [[disabled_maps]]
//   map_id = 33
//   flags = 0x04        # DisableFlags bits

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::v_shared::DisableFlags;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One per-map disable override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisabledMap {
    pub map_id: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmapConfig {
    /// Directory holding `.vmtree`, `.vmtile`, `.vmo` and the model list.
    pub base_path: PathBuf,
    pub enable_line_of_sight_calc: bool,
    pub enable_height_calc: bool,
    pub disabled_maps: Vec<DisabledMap>,
}

impl Default for VmapConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("vmaps"),
            enable_line_of_sight_calc: true,
            enable_height_calc: true,
            disabled_maps: Vec::new(),
        }
    }
}

impl VmapConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Union of every override listed for `map_id`. Unknown bits are dropped.
    pub fn disable_flags_for(&self, map_id: u32) -> DisableFlags {
        self.disabled_maps
            .iter()
            .filter(|m| m.map_id == map_id)
            .fold(DisableFlags::empty(), |acc, m| acc | DisableFlags::from_bits_truncate(m.flags))
    }
}
