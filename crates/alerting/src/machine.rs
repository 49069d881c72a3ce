//! Alert State Machine Implementation

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Something that can sound a looping alert
///
/// Both calls are fire-and-forget and must be idempotent.
pub trait AlertActuator {
    fn start_loop(&mut self);
    fn stop(&mut self);
}

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Consecutive drowsy frames before alerting (default: 3)
    pub frame_check: u32,
    /// Repeat period of the looping alert in milliseconds
    pub bell_interval_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            frame_check: 3,
            bell_interval_ms: 1000,
        }
    }
}

/// Observable phase of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertPhase {
    /// No drowsy frames pending
    Idle,
    /// Counting a drowsy streak
    Accumulating,
    /// Latched, actuator running
    Alerting,
    /// Latched, actuator stopped by the user
    Silenced,
}

/// Debounce counters and latch flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrowsinessState {
    pub consecutive_drowsy_count: u32,
    pub alert_latched: bool,
    pub alert_silenced_by_user: bool,
}

impl DrowsinessState {
    pub fn phase(&self) -> AlertPhase {
        match (self.alert_latched, self.alert_silenced_by_user) {
            (true, false) => AlertPhase::Alerting,
            (true, true) => AlertPhase::Silenced,
            (false, _) if self.consecutive_drowsy_count > 0 => AlertPhase::Accumulating,
            (false, _) => AlertPhase::Idle,
        }
    }
}

/// Hysteresis latch driving an alert actuator
pub struct AlertMachine<A> {
    frame_check: u32,
    state: DrowsinessState,
    actuator: A,
}

impl<A: AlertActuator> AlertMachine<A> {
    /// Create a new alert machine
    pub fn new(config: &AlertConfig, actuator: A) -> Self {
        let frame_check = config.frame_check.max(1);
        info!("Alert machine armed: {} consecutive drowsy frames", frame_check);
        Self {
            frame_check,
            state: DrowsinessState::default(),
            actuator,
        }
    }

    /// Feed one classifier outcome
    pub fn observe(&mut self, drowsy: bool) -> AlertPhase {
        match self.state.phase() {
            // Latched and sounding: only the user clears it
            AlertPhase::Alerting => {}
            _ if drowsy => {
                self.state.consecutive_drowsy_count += 1;
                debug!(
                    "Drowsy streak {}/{}",
                    self.state.consecutive_drowsy_count, self.frame_check
                );
                if self.state.consecutive_drowsy_count >= self.frame_check {
                    self.trigger();
                }
            }
            _ => {
                if self.state.consecutive_drowsy_count > 0 {
                    debug!("Eyes open, streak reset");
                }
                self.state.consecutive_drowsy_count = 0;
            }
        }
        self.state.phase()
    }

    /// User silence: stop the actuator but keep the latch
    ///
    /// Returns `false` when there was no sounding alert.
    pub fn silence(&mut self) -> bool {
        if self.state.phase() != AlertPhase::Alerting {
            return false;
        }
        info!("Alert silenced by user");
        self.actuator.stop();
        self.state.alert_silenced_by_user = true;
        self.state.consecutive_drowsy_count = 0;
        true
    }

    /// User reset: clear everything back to idle
    pub fn reset(&mut self) {
        info!("Alert state reset from {:?}", self.state.phase());
        self.clear();
    }

    /// Device disconnect: clear everything back to idle
    pub fn link_lost(&mut self) {
        if self.state.alert_latched {
            warn!("Link lost while alert latched; clearing");
        }
        self.clear();
    }

    pub fn state(&self) -> &DrowsinessState {
        &self.state
    }

    pub fn phase(&self) -> AlertPhase {
        self.state.phase()
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    fn trigger(&mut self) {
        warn!(
            "Drowsiness alert: {} consecutive drowsy frames",
            self.state.consecutive_drowsy_count
        );
        self.state.alert_latched = true;
        self.state.alert_silenced_by_user = false;
        self.actuator.start_loop();
    }

    fn clear(&mut self) {
        if self.state.phase() == AlertPhase::Alerting {
            self.actuator.stop();
        }
        self.state = DrowsinessState::default();
    }
}
