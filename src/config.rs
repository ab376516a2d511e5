//! Server configuration.
//!
//! Deserialised from TOML by the demo binary; the library itself never
//! reads configuration on its own.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the 9P listener binds, e.g. `127.0.0.1:5640`.
    pub listen: String,
    /// Mount table, applied in order.
    #[serde(default, rename = "mount")]
    pub mounts: Vec<MountConfig>,
}

/// One mount descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    /// Absolute mount prefix, never `/`.
    pub prefix: String,
    pub kind: MountKind,
    /// Host directory backing a `local` mount.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Chunked store backend over in-memory record stores.
    Memory,
    /// Pass-through over a host directory.
    Local,
}

impl Config {
    /// Parses a configuration document.
    pub fn parse(text: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> io::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        Config::parse(&text).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}
