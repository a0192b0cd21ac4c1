use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

const SETTINGS_PATH: &str = "./sector-sealer.config.toml";
const PREFIX: &str = "SECTOR_SEALER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Try a copy-on-write clone before streaming tree-d into the sealed file.
    pub try_reflink: bool,
    pub copy_buffer_size: usize,
    pub tree_d_buffer_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            try_reflink: true,
            copy_buffer_size: 1 << 20,
            tree_d_buffer_size: 4 << 20,
        }
    }
}

impl Settings {
    /// Loads `./sector-sealer.config.toml` if present, overridden by `SECTOR_SEALER_*`
    /// environment variables.
    pub fn new() -> Result<Settings, ConfigError> {
        Self::from_file(SETTINGS_PATH)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(Environment::with_prefix(PREFIX))
            .build()?
            .try_deserialize()
    }
}
