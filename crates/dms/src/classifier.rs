//! Per-frame drowsiness classification

use crate::detector::LandmarkDetector;
use crate::landmarks::LandmarkSet;
use crate::{DmsConfig, DmsError};
use camera_capture::Frame;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Eyes closed on at least one face
    pub drowsy: bool,
    /// Faces found by the detector
    pub faces: usize,
    /// EAR that decided the outcome: the first closed face, otherwise the
    /// lowest one seen
    pub ear: Option<f32>,
}

/// Eye-aspect-ratio classifier over an injected landmark detector
pub struct DrowsinessClassifier<D> {
    detector: D,
    ear_threshold: f32,
}

impl<D: LandmarkDetector> DrowsinessClassifier<D> {
    pub fn new(detector: D, config: &DmsConfig) -> Self {
        Self {
            detector,
            ear_threshold: config.ear_threshold,
        }
    }

    /// Classify one frame
    pub fn classify(&self, frame: &Frame) -> Result<Classification, DmsError> {
        let gray = frame.to_grayscale();
        let faces = self.detector.detect(&gray)?;
        let result = self.evaluate(&faces);
        debug!(
            "Frame {}: {} face(s), ear={:?}, drowsy={}",
            frame.sequence, result.faces, result.ear, result.drowsy
        );
        Ok(result)
    }

    /// Decide from landmark sets directly. No faces is never drowsy.
    pub fn evaluate(&self, faces: &[LandmarkSet]) -> Classification {
        let mut lowest: Option<f32> = None;

        for face in faces {
            let Some(ear) = face.eye_aspect_ratio() else {
                continue;
            };
            if ear < self.ear_threshold {
                return Classification {
                    drowsy: true,
                    faces: faces.len(),
                    ear: Some(ear),
                };
            }
            lowest = Some(lowest.map_or(ear, |l| l.min(ear)));
        }

        Classification {
            drowsy: false,
            faces: faces.len(),
            ear: lowest,
        }
    }

    pub fn ear_threshold(&self) -> f32 {
        self.ear_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::NullDetector;
    use crate::landmarks::tests::face;
    use crate::landmarks::LANDMARK_COUNT;
    use image::{GrayImage, RgbImage};

    /// Detector returning a fixed set of faces
    struct FixedFaces(Vec<LandmarkSet>);

    impl LandmarkDetector for FixedFaces {
        fn detect(&self, _gray: &GrayImage) -> Result<Vec<LandmarkSet>, DmsError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDetector;

    impl LandmarkDetector for BrokenDetector {
        fn detect(&self, _gray: &GrayImage) -> Result<Vec<LandmarkSet>, DmsError> {
            Err(DmsError::Inference("model crashed".into()))
        }
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(64, 48), 1, 0)
    }

    #[test]
    fn test_no_face_is_not_drowsy() {
        let classifier = DrowsinessClassifier::new(NullDetector, &DmsConfig::default());
        let result = classifier.classify(&frame()).unwrap();
        assert!(!result.drowsy);
        assert_eq!(result.faces, 0);
        assert_eq!(result.ear, None);
    }

    #[test]
    fn test_closed_eyes_are_drowsy() {
        let detector = FixedFaces(vec![face(3.0, 3.0)]);
        let classifier = DrowsinessClassifier::new(detector, &DmsConfig::default());
        assert!(classifier.classify(&frame()).unwrap().drowsy);
    }

    #[test]
    fn test_open_eyes_are_not_drowsy() {
        let detector = FixedFaces(vec![face(10.0, 10.0)]);
        let classifier = DrowsinessClassifier::new(detector, &DmsConfig::default());
        let result = classifier.classify(&frame()).unwrap();
        assert!(!result.drowsy);
        assert_eq!(result.faces, 1);
    }

    #[test]
    fn test_any_closed_face_wins() {
        let detector = FixedFaces(vec![face(12.0, 12.0), face(2.0, 4.0), face(11.0, 11.0)]);
        let classifier = DrowsinessClassifier::new(&detector, &DmsConfig::default());
        let result = classifier.classify(&frame()).unwrap();
        assert!(result.drowsy);
        assert_eq!(result.faces, 3);
        assert!((result.ear.unwrap() - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_threshold_is_strict() {
        // Mean EAR exactly at the threshold is still open
        let classifier = DrowsinessClassifier::new(NullDetector, &DmsConfig::default());
        let at_threshold = face(7.5, 7.5);
        assert!(!classifier.evaluate(&[at_threshold]).drowsy);
    }

    #[test]
    fn test_degenerate_face_is_skipped() {
        let flat = LandmarkSet::new(vec![(1.0, 1.0); LANDMARK_COUNT]).unwrap();
        let classifier = DrowsinessClassifier::new(NullDetector, &DmsConfig::default());
        let result = classifier.evaluate(&[flat]);
        assert!(!result.drowsy);
        assert_eq!(result.ear, None);
    }

    #[test]
    fn test_detector_errors_propagate() {
        let classifier = DrowsinessClassifier::new(BrokenDetector, &DmsConfig::default());
        assert!(matches!(
            classifier.classify(&frame()),
            Err(DmsError::Inference(_))
        ));
    }
}
