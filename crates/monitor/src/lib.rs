//! Drowsiness Monitor Host
//!
//! Polls a serial-attached camera once per interval, classifies each
//! frame by eye aspect ratio and drives a latched alert.

pub mod actuator;
pub mod commands;
pub mod config;
pub mod preview;
pub mod session;

use rpc_protocol::RpcError;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub use actuator::BellActuator;
pub use commands::{spawn_stdin_reader, UserCommand};
pub use config::{LoggingConfig, MonitorConfig};
pub use preview::{FilePreview, LogPreview, PreviewRenderer};
pub use session::{log_ports, Session};

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Link error: {0}")]
    Link(#[from] RpcError),

    #[error("No serial port given or configured")]
    NoPort,

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), MonitorError> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| MonitorError::Logging(format!("unknown level '{}'", config.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.map_err(|e| MonitorError::Logging(e.to_string()))
}
