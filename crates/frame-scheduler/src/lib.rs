//! Frame Acquisition Scheduler
//!
//! Polls a frame source on a fixed interval, never letting two
//! acquisitions overlap.

mod scheduler;

pub use scheduler::{AcquisitionEvent, FrameScheduler, SchedulerConfig, SchedulerError, SchedulerStats};
