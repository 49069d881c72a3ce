//! Frame Scheduler Implementation

use camera_capture::{CameraError, Frame, FrameSource};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Configuration for the frame scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds (default: 1000)
    pub interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl SchedulerConfig {
    /// Interval between ticks
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Outcome of one acquisition, forwarded downstream
#[derive(Debug)]
pub enum AcquisitionEvent {
    /// A frame was fetched and decoded
    Frame(Frame),
    /// Recoverable failure; the next tick will try again
    Failed(CameraError),
    /// The link is gone; the scheduler has stopped
    LinkLost(CameraError),
}

/// Errors that end a scheduler run
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Link lost: {0}")]
    LinkLost(String),

    #[error("Acquisition task failed: {0}")]
    TaskFailed(String),
}

/// Counters for one scheduler run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks observed
    pub ticks: u64,
    /// Ticks skipped because an acquisition was outstanding
    pub skipped: u64,
    /// Frames delivered
    pub acquired: u64,
    /// Recoverable failures
    pub failed: u64,
}

type InFlight<S> = JoinHandle<(S, Result<Frame, CameraError>)>;

/// Fixed-interval acquisition driver
pub struct FrameScheduler {
    config: SchedulerConfig,
    stats: SchedulerStats,
}

impl FrameScheduler {
    /// Create a new frame scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        info!("Frame scheduler created with {}ms interval", config.interval_ms);
        Self {
            config,
            stats: SchedulerStats::default(),
        }
    }

    /// Run the acquisition loop until shutdown, link loss, or the
    /// receiver goes away.
    ///
    /// The source is moved into the acquisition task while a fetch is
    /// outstanding, so a second fetch cannot start before the first one
    /// hands it back.
    pub async fn run<S>(
        &mut self,
        source: S,
        events: mpsc::Sender<AcquisitionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SchedulerStats, SchedulerError>
    where
        S: FrameSource + 'static,
    {
        info!("Starting frame scheduler");

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut idle: Option<S> = Some(source);
        let mut in_flight: Option<InFlight<S>> = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.stats.ticks += 1;
                    match idle.take() {
                        Some(mut source) => {
                            in_flight = Some(tokio::spawn(async move {
                                let result = source.fetch_snapshot().await;
                                (source, result)
                            }));
                        }
                        None => {
                            self.stats.skipped += 1;
                            debug!("Acquisition still in flight, skipping tick {}", self.stats.ticks);
                        }
                    }
                }
                joined = join(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    let (source, result) = joined.map_err(|e| {
                        error!("Acquisition task failed: {}", e);
                        SchedulerError::TaskFailed(e.to_string())
                    })?;

                    let event = match result {
                        Ok(frame) => {
                            self.stats.acquired += 1;
                            idle = Some(source);
                            AcquisitionEvent::Frame(frame)
                        }
                        Err(e) if e.is_link_loss() => {
                            error!("Link lost during acquisition: {}", e);
                            drop(source);
                            let reason = e.to_string();
                            let _ = events.send(AcquisitionEvent::LinkLost(e)).await;
                            return Err(SchedulerError::LinkLost(reason));
                        }
                        Err(e) => {
                            self.stats.failed += 1;
                            warn!("Acquisition failed: {}", e);
                            idle = Some(source);
                            AcquisitionEvent::Failed(e)
                        }
                    };

                    if events.send(event).await.is_err() {
                        info!("Frame receiver closed");
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight.take() {
            debug!("Cancelling outstanding acquisition");
            handle.abort();
            let _ = handle.await;
        }
        if let Some(source) = idle.take() {
            source.close().await;
        }

        info!(
            "Frame scheduler stopped ({} acquired, {} failed, {} skipped)",
            self.stats.acquired, self.stats.failed, self.stats.skipped
        );
        Ok(self.stats)
    }

    /// Counters so far
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}

async fn join<T>(handle: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match handle.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
