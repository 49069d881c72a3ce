//! Drowsiness Monitor - Main Entry Point

use dms::build_detector;
use monitor::{
    init_logging, log_ports, spawn_stdin_reader, BellActuator, FilePreview, LogPreview,
    MonitorConfig, PreviewRenderer, Session, UserCommand,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let config = MonitorConfig::load(config_path.as_deref())?;
    init_logging(&config.logging)?;

    info!("=== Drowsiness Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Commands: c [port] connect, d disconnect, s silence, r reset, p ports, q quit");

    let detector = build_detector(&config.dms)?;
    let actuator = BellActuator::new(Duration::from_millis(config.alert.bell_interval_ms));
    let renderer: Box<dyn PreviewRenderer> = match &config.preview.path {
        Some(path) => Box::new(FilePreview::new(path, config.preview.jpeg_quality)),
        None => Box::new(LogPreview),
    };

    let (tx, rx) = mpsc::channel(8);
    spawn_stdin_reader(tx.clone());

    let interrupt = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = interrupt.send(UserCommand::Quit).await;
        }
    });

    if config.link.port.is_some() {
        tx.send(UserCommand::Connect(None)).await?;
    } else {
        warn!("No serial port configured; use 'c <port>' to connect");
        log_ports();
    }

    let mut session = Session::new(config, detector, actuator, renderer);
    // Keep a sender alive so a closed stdin does not end the session
    let _commands = tx;
    session.run(rx).await;

    info!("Drowsiness monitor stopped");
    Ok(())
}
