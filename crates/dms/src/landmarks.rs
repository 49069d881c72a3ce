//! 68-point facial landmarks and eye aspect ratio

use crate::DmsError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Image-space point (x, y)
pub type Point = (f32, f32);

/// Number of points in the 68-landmark layout
pub const LANDMARK_COUNT: usize = 68;

/// Right eye contour indices
pub const RIGHT_EYE: Range<usize> = 36..42;
/// Left eye contour indices
pub const LEFT_EYE: Range<usize> = 42..48;

/// Landmarks for one detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl LandmarkSet {
    /// Build a set, rejecting anything but 68 points
    pub fn new(points: Vec<Point>) -> Result<Self, DmsError> {
        if points.len() != LANDMARK_COUNT {
            return Err(DmsError::KeypointsMissing {
                found: points.len(),
            });
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn right_eye(&self) -> &[Point] {
        &self.points[RIGHT_EYE]
    }

    pub fn left_eye(&self) -> &[Point] {
        &self.points[LEFT_EYE]
    }

    /// Mean EAR of both eyes, `None` if either contour is degenerate
    pub fn eye_aspect_ratio(&self) -> Option<f32> {
        let right = eye_aspect_ratio(self.right_eye())?;
        let left = eye_aspect_ratio(self.left_eye())?;
        Some((left + right) / 2.0)
    }
}

/// Eye aspect ratio of a six-point contour
///
/// `(|p2 - p6| + |p3 - p5|) / (2 * |p1 - p4|)` with the points in the
/// usual order: corners at p1/p4, upper lid p2/p3, lower lid p6/p5.
/// Returns `None` for fewer than six points or coincident corners.
pub fn eye_aspect_ratio(eye: &[Point]) -> Option<f32> {
    if eye.len() < 6 {
        return None;
    }

    let vertical_a = distance(eye[1], eye[5]);
    let vertical_b = distance(eye[2], eye[4]);
    let horizontal = distance(eye[0], eye[3]);
    if horizontal <= f32::EPSILON {
        return None;
    }

    Some((vertical_a + vertical_b) / (2.0 * horizontal))
}

fn distance(a: Point, b: Point) -> f32 {
    (a.0 - b.0).hypot(a.1 - b.1)
}
