//! Face and landmark detection
//!
//! Detection runs in two stages: a face locator finds face boxes in the
//! whole frame, then a landmark regressor places 68 points inside each
//! face crop. An empty frame yields no landmark sets at all.

use crate::landmarks::{LandmarkSet, Point, LANDMARK_COUNT};
use crate::{DmsConfig, DmsError};
use ::image::imageops::FilterType;
use ::image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// Finds faces and their 68 landmarks in a grayscale image
pub trait LandmarkDetector {
    /// Zero, one, or many landmark sets, one per face
    fn detect(&self, gray: &GrayImage) -> Result<Vec<LandmarkSet>, DmsError>;
}

impl<T: LandmarkDetector + ?Sized> LandmarkDetector for &T {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<LandmarkSet>, DmsError> {
        (**self).detect(gray)
    }
}

impl<T: LandmarkDetector + ?Sized> LandmarkDetector for Box<T> {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<LandmarkSet>, DmsError> {
        (**self).detect(gray)
    }
}

/// Face bounding box in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBbox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// First stage: where are the faces
pub trait FaceLocator {
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceBbox>, DmsError>;
}

/// Second stage: 68 points inside one face crop, normalised to `0..1`
/// of the crop
pub trait LandmarkRegressor {
    fn regress(&self, face: &GrayImage) -> Result<Vec<Point>, DmsError>;
}

/// Detector that never finds a face
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl LandmarkDetector for NullDetector {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<LandmarkSet>, DmsError> {
        Ok(Vec::new())
    }
}

/// Face locator followed by a per-face landmark regressor
pub struct CascadeDetector<F, R> {
    locator: F,
    regressor: R,
}

impl<F: FaceLocator, R: LandmarkRegressor> CascadeDetector<F, R> {
    pub fn new(locator: F, regressor: R) -> Self {
        Self { locator, regressor }
    }
}

impl<F: FaceLocator, R: LandmarkRegressor> LandmarkDetector for CascadeDetector<F, R> {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<LandmarkSet>, DmsError> {
        if gray.width() == 0 || gray.height() == 0 {
            return Err(DmsError::ImageProcessing("empty image".into()));
        }

        let boxes = self.locator.locate(gray)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in &boxes {
            let Some((x0, y0, w, h)) = clamp_box(bbox, gray.width(), gray.height()) else {
                debug!("Face box {:?} lies outside the frame", bbox);
                continue;
            };

            let crop = ::image::imageops::crop_imm(gray, x0, y0, w, h).to_image();
            let points = self
                .regressor
                .regress(&crop)?
                .into_iter()
                .map(|(nx, ny)| (x0 as f32 + nx * w as f32, y0 as f32 + ny * h as f32))
                .collect();
            faces.push(LandmarkSet::new(points)?);
        }

        debug!(
            "{} face(s) in {}x{} frame",
            faces.len(),
            gray.width(),
            gray.height()
        );
        Ok(faces)
    }
}

/// Integer crop rectangle of a box, clipped to the image
fn clamp_box(bbox: &FaceBbox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = bbox.x.max(0.0).floor();
    let y0 = bbox.y.max(0.0).floor();
    let x1 = (bbox.x + bbox.width).min(width as f32).ceil();
    let y1 = (bbox.y + bbox.height).min(height as f32).ceil();
    if !(x1 > x0 && y1 > y0) {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

type InferencePlan = TypedRunnableModel<TypedModel>;

fn load_plan(path: &Path, input_size: u32) -> Result<InferencePlan, DmsError> {
    let edge = input_size as usize;
    tract_onnx::onnx()
        .model_for_path(path)
        .and_then(|model| model.with_input_fact(0, f32::fact([1, 1, edge, edge]).into()))
        .and_then(|model| model.into_optimized())
        .and_then(|model| model.into_runnable())
        .map_err(|e| DmsError::ModelLoad(format!("{}: {}", path.display(), e)))
}

/// Run a single-input plan on a resized grayscale image and flatten
/// its first output
fn infer(plan: &InferencePlan, gray: &GrayImage, edge: u32) -> Result<Vec<f32>, DmsError> {
    let resized = ::image::imageops::resize(gray, edge, edge, FilterType::Triangle);
    let input: Tensor = tract_ndarray::Array4::from_shape_fn(
        (1, 1, edge as usize, edge as usize),
        |(_, _, y, x)| resized.get_pixel(x as u32, y as u32)[0] as f32 / 255.0,
    )
    .into();

    let outputs = plan
        .run(tvec!(input.into()))
        .map_err(|e| DmsError::Inference(e.to_string()))?;
    let values = outputs[0]
        .to_array_view::<f32>()
        .map_err(|e| DmsError::Inference(e.to_string()))?;
    Ok(values.iter().copied().collect())
}

/// Face detector loaded from ONNX
///
/// Expects a `1x1xNxN` float input in `0..1`. The output is a list of
/// `(x1, y1, x2, y2, score)` rows with corners normalised to the input
/// square, in any leading shape.
pub struct OnnxFaceDetector {
    plan: InferencePlan,
    input_size: u32,
    confidence_threshold: f32,
}

impl OnnxFaceDetector {
    pub fn load(
        path: impl AsRef<Path>,
        input_size: u32,
        confidence_threshold: f32,
    ) -> Result<Self, DmsError> {
        let path = path.as_ref();
        info!("Loading face detection model from {}", path.display());
        Ok(Self {
            plan: load_plan(path, input_size)?,
            input_size,
            confidence_threshold,
        })
    }
}

impl FaceLocator for OnnxFaceDetector {
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceBbox>, DmsError> {
        let rows = infer(&self.plan, gray, self.input_size)?;
        faces_from_rows(
            &rows,
            self.confidence_threshold,
            gray.width() as f32,
            gray.height() as f32,
        )
    }
}

/// Decode `(x1, y1, x2, y2, score)` rows into pixel boxes at or above
/// the confidence threshold
pub fn faces_from_rows(
    rows: &[f32],
    threshold: f32,
    width: f32,
    height: f32,
) -> Result<Vec<FaceBbox>, DmsError> {
    if rows.len() % 5 != 0 {
        return Err(DmsError::Inference(format!(
            "face output has {} values, not a multiple of 5",
            rows.len()
        )));
    }

    Ok(rows
        .chunks_exact(5)
        .filter(|row| row[4] >= threshold)
        .map(|row| FaceBbox {
            x: row[0] * width,
            y: row[1] * height,
            width: (row[2] - row[0]) * width,
            height: (row[3] - row[1]) * height,
            confidence: row[4],
        })
        .filter(|face| face.width > 0.0 && face.height > 0.0)
        .collect())
}

/// Single-face landmark regressor loaded from ONNX
///
/// Expects a `1x1xNxN` float input in `0..1` and produces 136 values,
/// the 68 `(x, y)` pairs normalised to the input square.
pub struct OnnxLandmarkRegressor {
    plan: InferencePlan,
    input_size: u32,
}

impl OnnxLandmarkRegressor {
    pub fn load(path: impl AsRef<Path>, input_size: u32) -> Result<Self, DmsError> {
        let path = path.as_ref();
        info!("Loading landmark model from {}", path.display());
        Ok(Self {
            plan: load_plan(path, input_size)?,
            input_size,
        })
    }
}

impl LandmarkRegressor for OnnxLandmarkRegressor {
    fn regress(&self, face: &GrayImage) -> Result<Vec<Point>, DmsError> {
        let coords = infer(&self.plan, face, self.input_size)?;
        if coords.len() < LANDMARK_COUNT * 2 {
            return Err(DmsError::Inference(format!(
                "model produced {} values, need {}",
                coords.len(),
                LANDMARK_COUNT * 2
            )));
        }

        Ok(coords
            .chunks_exact(2)
            .take(LANDMARK_COUNT)
            .map(|xy| (xy[0], xy[1]))
            .collect())
    }
}

/// Build the detector described by the configuration
///
/// Both models are needed for real detection. With neither configured
/// the [`NullDetector`] is used and frames never classify drowsy.
pub fn build_detector(
    config: &DmsConfig,
) -> Result<Box<dyn LandmarkDetector + Send + Sync>, DmsError> {
    match (&config.face_model_path, &config.landmark_model_path) {
        (Some(face), Some(landmarks)) => {
            let locator =
                OnnxFaceDetector::load(face, config.face_input_size, config.face_confidence)?;
            let regressor = OnnxLandmarkRegressor::load(landmarks, config.model_input_size)?;
            Ok(Box::new(CascadeDetector::new(locator, regressor)))
        }
        (None, None) => {
            warn!("No face or landmark model configured; frames will never be classified drowsy");
            Ok(Box::new(NullDetector))
        }
        (None, Some(_)) => Err(DmsError::ModelLoad(
            "landmark model configured without a face model".into(),
        )),
        (Some(_), None) => Err(DmsError::ModelLoad(
            "face model configured without a landmark model".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::tests::eye;
    use crate::landmarks::{LEFT_EYE, RIGHT_EYE};

    struct FixedBoxes(Vec<FaceBbox>);

    impl FaceLocator for FixedBoxes {
        fn locate(&self, _gray: &GrayImage) -> Result<Vec<FaceBbox>, DmsError> {
            Ok(self.0.clone())
        }
    }

    /// Regresses a face with both eyes at the given opening, in crop units
    struct FixedShape {
        opening: f32,
    }

    impl LandmarkRegressor for FixedShape {
        fn regress(&self, _face: &GrayImage) -> Result<Vec<Point>, DmsError> {
            let mut points = vec![(0.5, 0.5); LANDMARK_COUNT];
            points[RIGHT_EYE].copy_from_slice(&eye(0.3, 0.4, 0.2, self.opening));
            points[LEFT_EYE].copy_from_slice(&eye(0.7, 0.4, 0.2, self.opening));
            Ok(points)
        }
    }

    struct ShortShape;

    impl LandmarkRegressor for ShortShape {
        fn regress(&self, _face: &GrayImage) -> Result<Vec<Point>, DmsError> {
            Ok(vec![(0.5, 0.5); 10])
        }
    }

    fn assert_near(actual: Point, expected: Point) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-3 && (actual.1 - expected.1).abs() < 1e-3,
            "{:?} != {:?}",
            actual,
            expected
        );
    }

    fn bbox(x: f32, y: f32, width: f32, height: f32) -> FaceBbox {
        FaceBbox {
            x,
            y,
            width,
            height,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_null_detector_finds_nothing() {
        let faces = NullDetector.detect(&GrayImage::new(8, 8)).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_empty_seat_yields_no_landmarks() {
        let detector = CascadeDetector::new(FixedBoxes(Vec::new()), FixedShape { opening: 0.02 });
        let faces = detector.detect(&GrayImage::new(64, 48)).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_one_landmark_set_per_face_box() {
        let detector = CascadeDetector::new(
            FixedBoxes(vec![bbox(0.0, 0.0, 100.0, 100.0), bbox(120.0, 20.0, 50.0, 50.0)]),
            FixedShape { opening: 0.06 },
        );
        let faces = detector.detect(&GrayImage::new(200, 100)).unwrap();
        assert_eq!(faces.len(), 2);

        // right-eye outer corner sits at (0.2, 0.4) of each crop
        assert_near(faces[0].right_eye()[0], (20.0, 40.0));
        assert_near(faces[1].right_eye()[0], (130.0, 40.0));

        // shape is preserved through the crop mapping
        let ear = faces[0].eye_aspect_ratio().unwrap();
        assert!((ear - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_boxes_are_clipped_to_frame() {
        let detector = CascadeDetector::new(
            FixedBoxes(vec![bbox(-20.0, -10.0, 60.0, 50.0), bbox(500.0, 500.0, 40.0, 40.0)]),
            FixedShape { opening: 0.06 },
        );
        let faces = detector.detect(&GrayImage::new(64, 48)).unwrap();
        assert_eq!(faces.len(), 1);
        // clipped crop is 40x40 at the origin
        assert_near(faces[0].right_eye()[0], (8.0, 16.0));
    }

    #[test]
    fn test_short_landmark_output_is_rejected() {
        let detector = CascadeDetector::new(FixedBoxes(vec![bbox(0.0, 0.0, 32.0, 32.0)]), ShortShape);
        let err = detector.detect(&GrayImage::new(64, 48)).unwrap_err();
        assert!(matches!(err, DmsError::KeypointsMissing { found: 10 }));
    }

    #[test]
    fn test_face_rows_below_threshold_are_dropped() {
        let rows = [
            0.1, 0.2, 0.5, 0.6, 0.9, //
            0.0, 0.0, 1.0, 1.0, 0.3, //
            0.5, 0.5, 0.5, 0.9, 0.8, // zero width
        ];
        let faces = faces_from_rows(&rows, 0.5, 200.0, 100.0).unwrap();
        assert_eq!(faces.len(), 1);
        assert!((faces[0].x - 20.0).abs() < 1e-4);
        assert!((faces[0].y - 20.0).abs() < 1e-4);
        assert!((faces[0].width - 80.0).abs() < 1e-4);
        assert!((faces[0].height - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_ragged_face_output_is_error() {
        assert!(faces_from_rows(&[0.1; 7], 0.5, 10.0, 10.0).is_err());
    }

    #[test]
    fn test_missing_model_fails_to_load() {
        let result = OnnxLandmarkRegressor::load("/nonexistent/landmarks.onnx", 112);
        assert!(matches!(result, Err(DmsError::ModelLoad(_))));
    }

    #[test]
    fn test_config_without_models_uses_null_detector() {
        let detector = build_detector(&DmsConfig::default()).unwrap();
        assert!(detector.detect(&GrayImage::new(8, 8)).unwrap().is_empty());
    }

    #[test]
    fn test_landmark_model_alone_is_rejected() {
        let config = DmsConfig {
            landmark_model_path: Some("/models/landmarks.onnx".into()),
            ..Default::default()
        };
        assert!(matches!(
            build_detector(&config),
            Err(DmsError::ModelLoad(_))
        ));
    }
}
