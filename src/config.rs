//! Station configuration.
//!
//! Read once at startup from a TOML file with three groups:
//!
//! ```toml
//! [ports]
//! laser_com_port = "COM3"
//!
//! [offsets]
//! laser_offset = 0.42
//! min_tolerance = 0.1
//! max_tolerance = 6.0
//!
//! [printer]
//! queue = "zebra"
//! ```
//!
//! Every key is optional. A missing or broken file never stops the station; it runs on
//! the built-in defaults instead.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::tolerance::ToleranceSettings;

#[cfg(windows)]
pub const DEFAULT_LASER_PORT: &str = "COM3";
#[cfg(not(windows))]
pub const DEFAULT_LASER_PORT: &str = "/dev/ttyUSB0";

pub const DEFAULT_LASER_OFFSET: f64 = 0.0;
pub const DEFAULT_MIN_TOLERANCE: f64 = 0.1;
pub const DEFAULT_MAX_TOLERANCE: f64 = 6.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Where label jobs are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    /// Raw spooler queue name. `None` means the system default printer.
    pub queue: Option<String>,
    /// Device or file that takes raw printer bytes directly. Wins over `queue`.
    pub device: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub laser_port: String,
    pub laser_offset_inches: f64,
    pub min_tolerance_inches: f64,
    pub max_tolerance_inches: f64,
    pub printer: PrinterConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            laser_port: DEFAULT_LASER_PORT.to_string(),
            laser_offset_inches: DEFAULT_LASER_OFFSET,
            min_tolerance_inches: DEFAULT_MIN_TOLERANCE,
            max_tolerance_inches: DEFAULT_MAX_TOLERANCE,
            printer: PrinterConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    ports: PortsGroup,
    offsets: OffsetsGroup,
    printer: PrinterConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PortsGroup {
    laser_com_port: String,
}

impl Default for PortsGroup {
    fn default() -> Self {
        Self {
            laser_com_port: DEFAULT_LASER_PORT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OffsetsGroup {
    laser_offset: f64,
    min_tolerance: f64,
    max_tolerance: f64,
}

impl Default for OffsetsGroup {
    fn default() -> Self {
        Self {
            laser_offset: DEFAULT_LASER_OFFSET,
            min_tolerance: DEFAULT_MIN_TOLERANCE,
            max_tolerance: DEFAULT_MAX_TOLERANCE,
        }
    }
}

impl From<ConfigFile> for StationConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            laser_port: file.ports.laser_com_port,
            laser_offset_inches: file.offsets.laser_offset,
            min_tolerance_inches: file.offsets.min_tolerance,
            max_tolerance_inches: file.offsets.max_tolerance,
            printer: file.printer,
        }
    }
}

impl StationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(text)?;
        let config = StationConfig::from(file);
        config.warn_if_inconsistent();
        Ok(config)
    }

    /// Loads `path`, falling back to the defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!("Config file {} loaded.", path.display());
                config
            }
            Err(e) => {
                error!("Error reading config file: {}", e);
                info!("Using default config values.");
                Self::default()
            }
        }
    }

    pub fn tolerance(&self) -> ToleranceSettings {
        ToleranceSettings {
            offset_inches: self.laser_offset_inches,
            min_tolerance_inches: self.min_tolerance_inches,
            max_tolerance_inches: self.max_tolerance_inches,
        }
    }

    fn warn_if_inconsistent(&self) {
        if self.min_tolerance_inches > self.max_tolerance_inches {
            warn!(
                "min_tolerance {} exceeds max_tolerance {}; no cut will read Near Tolerance",
                self.min_tolerance_inches, self.max_tolerance_inches
            );
        }
        if self.min_tolerance_inches < 0.0 {
            warn!("min_tolerance {} is negative; no cut can print", self.min_tolerance_inches);
        }
    }
}
