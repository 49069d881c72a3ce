//! Driver Monitoring System (DMS)
//!
//! Eye-closure detection from facial landmarks:
//! - Face boxes, then 68-point landmark sets per face crop
//! - Eye aspect ratio (EAR) per eye and per face
//! - Per-frame closed/open decision against a threshold

pub mod classifier;
pub mod config;
pub mod detector;
pub mod landmarks;

pub use classifier::{Classification, DrowsinessClassifier};
pub use config::DmsConfig;
pub use detector::{
    build_detector, CascadeDetector, FaceBbox, FaceLocator, LandmarkDetector, LandmarkRegressor,
    NullDetector, OnnxFaceDetector, OnnxLandmarkRegressor,
};
pub use landmarks::{eye_aspect_ratio, LandmarkSet, Point};

use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Expected 68 landmarks, got {found}")]
    KeypointsMissing { found: usize },
}
