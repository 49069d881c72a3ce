//! Alerting System
//!
//! Debounces per-frame drowsiness into a latched alert that only a user
//! action or a disconnect clears.

mod machine;

pub use machine::{AlertActuator, AlertConfig, AlertMachine, AlertPhase, DrowsinessState};
