use crate::identity::EmployeeId;
use clockface_core::{DetectorError, ModelError};
use clockface_hw::CameraError;
use thiserror::Error;

/// Failure taxonomy of the capture/training pipeline.
///
/// Everything except `IdentityMismatch` (and mid-loop `Device`/`Storage`
/// failures) is raised before the camera is acquired or anything is written.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing detector or recognizer artifact. Fatal; no capture loop is started.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Camera unavailable or disconnected.
    #[error("camera unavailable: {0}")]
    Device(#[from] CameraError),
    /// Request rejected before any capture or training work.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Recognized face belongs to someone other than the session employee.
    #[error("recognized face ({recognized}) does not match current logged-in employee ({expected})")]
    IdentityMismatch {
        expected: EmployeeId,
        recognized: EmployeeId,
    },
    /// Predicted label has no employee record. Per-frame; capture loops skip it.
    #[error("no employee record for recognized label {0}")]
    NotFound(EmployeeId),
    #[error("detector: {0}")]
    Detector(DetectorError),
    #[error("recognizer model: {0}")]
    Model(#[from] ModelError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

impl From<DetectorError> for PipelineError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::ModelNotFound(path) => {
                PipelineError::Configuration(format!("detector model not found: {path}"))
            }
            other => PipelineError::Detector(other),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("please select a working location first")]
    NoLocation,
    #[error("employee {0} is already enrolled")]
    AlreadyEnrolled(EmployeeId),
    #[error("face data for employee {0} is not available; cannot proceed with training")]
    NoFaceData(EmployeeId),
    #[error("employee {0} has no registered face ID; please register face ID")]
    NotEnrolled(EmployeeId),
    #[error("unknown employee {0}")]
    UnknownEmployee(EmployeeId),
    #[error("employee {0} has no usable display name")]
    EmptyDisplayName(EmployeeId),
}

/// Directory, ledger, sample-store and model-artifact I/O failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("no employee record {0}")]
    MissingEmployee(EmployeeId),
    #[error("sample already exists: {0}")]
    SampleExists(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_detector_is_configuration_error() {
        let err: PipelineError = DetectorError::ModelNotFound("det.onnx".into()).into();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("det.onnx")));
    }

    #[test]
    fn test_inference_failure_stays_detector_error() {
        let err: PipelineError = DetectorError::InferenceFailed("boom".into()).into();
        assert!(matches!(err, PipelineError::Detector(_)));
    }

    #[test]
    fn test_mismatch_message() {
        let err = PipelineError::IdentityMismatch {
            expected: EmployeeId(101),
            recognized: EmployeeId(202),
        };
        assert!(err
            .to_string()
            .contains("does not match current logged-in employee"));
    }
}
