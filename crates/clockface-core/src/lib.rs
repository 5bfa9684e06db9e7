//! clockface-core: Face detection and recognition engine.
//!
//! Detection uses SCRFD running on ONNX Runtime; recognition is a trainable
//! LBPH (Local Binary Patterns Histograms) classifier over normalized
//! grayscale face samples.

pub mod detector;
pub mod imaging;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorError, FaceDetect, FaceDetector};
pub use recognizer::{LbphModel, LbphParams, LbphTrainer, ModelError};
pub use types::{confidence_from_distance, Classifier, Prediction, Region};
