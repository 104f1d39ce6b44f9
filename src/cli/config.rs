//! Command-line interface configuration
//!
//! The [Config] type handles loading of the `ccflash.toml` configuration file.
//! It is searched for in the current working directory first, and then in the
//! user's configuration directory.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;

const CONFIG_FILE_NAME: &str = "ccflash.toml";

/// Baud rate used when none is configured
pub const DEFAULT_BAUDRATE: u32 = 115_200;
/// Serial read timeout used when none is configured
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// A configured, known serial connection
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Name of the serial port used for communication
    pub serial: Option<String>,
    /// Baud rate at which to communicate with the bootloader
    pub baudrate: Option<u32>,
    /// Serial read timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Deserialized contents of a configuration file
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Preferred serial port connection information
    #[serde(default)]
    pub connection: Connection,
}

impl Config {
    /// Load the configuration file, if one exists
    pub fn load() -> Result<Self, Error> {
        match Self::find_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load the configuration from the given file
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let data = read_to_string(path)
            .map_err(|e| Error::InvalidConfig(path.display().to_string(), Box::new(e)))?;
        let config: Config = toml::from_str(&data)
            .map_err(|e| Error::InvalidConfig(path.display().to_string(), Box::new(e)))?;

        debug!("Config: {:#?}", &config);

        Ok(config)
    }

    /// Configured baud rate, or the bootloader's default
    pub fn baudrate(&self) -> u32 {
        self.connection.baudrate.unwrap_or(DEFAULT_BAUDRATE)
    }

    /// Configured serial read timeout, or the default of one second
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.connection.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::current_dir() {
            let local_config = dir.join(CONFIG_FILE_NAME);
            if local_config.exists() {
                return Some(local_config);
            }
        }

        ProjectDirs::from("", "", "ccflash").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}
