//! Terminal bell alert

use alerting::AlertActuator;
use std::io::Write;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Rings the terminal bell and logs a warning until stopped
pub struct BellActuator {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl BellActuator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(100)),
            task: None,
        }
    }

    /// Whether the alert loop is running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl AlertActuator for BellActuator {
    fn start_loop(&mut self) {
        if self.is_active() {
            return;
        }

        info!("Starting drowsiness alert");
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                warn!("WAKE UP: drowsiness alert active");
                ring();
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Drowsiness alert stopped");
        }
    }
}

impl Drop for BellActuator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ring() {
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(b"\x07");
    let _ = stderr.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let mut bell = BellActuator::new(Duration::from_millis(500));
        assert!(!bell.is_active());

        bell.start_loop();
        bell.start_loop();
        assert!(bell.is_active());

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(bell.is_active());

        bell.stop();
        bell.stop();
        assert!(!bell.is_active());
    }
}
