//! Monitor configuration
//!
//! Layered from an optional TOML file and `DROWSY__*` environment
//! variables (e.g. `DROWSY__LINK__PORT=/dev/ttyACM0`).

use alerting::AlertConfig;
use camera_capture::CameraConfig;
use config::{Config, ConfigError, Environment, File, FileFormat};
use dms::DmsConfig;
use frame_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default config file stem, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "drowsy-monitor";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub link: LinkConfig,
    pub camera: CameraConfig,
    pub scheduler: SchedulerConfig,
    pub dms: DmsConfig,
    pub alert: AlertConfig,
    pub preview: PreviewConfig,
    pub logging: LoggingConfig,
}

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Port to connect to at startup
    pub port: Option<String>,
    pub baud_rate: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
        }
    }
}

/// Preview output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Where the latest frame is written; logged only when unset
    pub path: Option<String>,
    pub jpeg_quality: u8,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            path: None,
            jpeg_quality: 80,
        }
    }
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Max level: trace, debug, info, warn, error
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl MonitorConfig {
    /// Load from `path` (required) or the default file (optional), then
    /// apply environment overrides
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("DROWSY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Parse a TOML document on its own
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
