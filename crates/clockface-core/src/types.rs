use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Face region in frame pixel coordinates, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector score for this region (0.0–1.0).
    pub score: f32,
}

impl Region {
    /// Build a region from corner coordinates, clamped to a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn from_corners(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        score: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let left = x1.max(0.0).min(fw).floor();
        let top = y1.max(0.0).min(fh).floor();
        let right = x2.max(0.0).min(fw).ceil();
        let bottom = y2.max(0.0).min(fh).ceil();

        if right - left < 1.0 || bottom - top < 1.0 {
            return None;
        }

        Some(Self {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
            score,
        })
    }
}

/// Nearest-sample classification result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Label (employee identity) of the closest training sample.
    pub label: i64,
    /// Distance to that sample. Lower = more similar.
    pub distance: f64,
}

/// Strategy for classifying a normalized grayscale face crop.
pub trait Classifier {
    /// Returns `None` only when the classifier has nothing to compare against.
    fn predict(&self, face: &GrayImage) -> Option<Prediction>;
}

/// Convert a classifier distance into a confidence percentage.
///
/// `100 × (1 − distance / divisor)`. Deliberately unclamped: distances beyond
/// the divisor produce negative values and the result is only meaningful as a
/// relative score against a threshold.
pub fn confidence_from_distance(distance: f64, divisor: f64) -> f64 {
    100.0 * (1.0 - distance / divisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_at_zero_distance() {
        assert_eq!(confidence_from_distance(0.0, 300.0), 100.0);
    }

    #[test]
    fn test_confidence_at_divisor() {
        assert_eq!(confidence_from_distance(300.0, 300.0), 0.0);
    }

    #[test]
    fn test_confidence_is_not_clamped() {
        assert_eq!(confidence_from_distance(450.0, 300.0), -50.0);
    }

    #[test]
    fn test_confidence_decreases_with_distance() {
        let near = confidence_from_distance(40.0, 300.0);
        let far = confidence_from_distance(80.0, 300.0);
        assert!(near > far);
    }

    #[test]
    fn test_region_clamps_to_frame() {
        let r = Region::from_corners(-10.0, -5.0, 50.0, 40.0, 0.9, 32, 32).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (0, 0, 32, 32));
    }

    #[test]
    fn test_region_outside_frame() {
        assert!(Region::from_corners(100.0, 100.0, 120.0, 120.0, 0.9, 64, 64).is_none());
    }
}
