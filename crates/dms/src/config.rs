//! DMS configuration

use serde::{Deserialize, Serialize};

/// DMS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Eye aspect ratio below which eyes count as closed
    pub ear_threshold: f32,

    /// ONNX face detection model
    pub face_model_path: Option<String>,

    /// Square input edge the face model expects
    pub face_input_size: u32,

    /// Minimum face score
    pub face_confidence: f32,

    /// ONNX landmark model, run on each face crop
    pub landmark_model_path: Option<String>,

    /// Square input edge the landmark model expects
    pub model_input_size: u32,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            face_model_path: None,
            face_input_size: 128,
            face_confidence: 0.5,
            landmark_model_path: None,
            model_input_size: 112,
        }
    }
}

impl DmsConfig {
    /// Create strict config (flags drowsiness earlier)
    pub fn strict() -> Self {
        Self {
            ear_threshold: 0.28,
            ..Default::default()
        }
    }

    /// Create lenient config (needs more eye closure)
    pub fn lenient() -> Self {
        Self {
            ear_threshold: 0.21,
            ..Default::default()
        }
    }
}
