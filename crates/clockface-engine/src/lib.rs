//! clockface-engine: the biometric attendance pipeline.
//!
//! Enrollment capture writes face samples, training fits the shared LBPH
//! recognizer over every sample, and attendance capture records one verified
//! clock event per session. Storage, camera and detector are injected so each
//! stage runs against real hardware or scripted test doubles alike.

pub mod attendance;
pub mod cancel;
pub mod config;
pub mod directory;
pub mod enroll;
pub mod error;
pub mod identity;
pub mod model_store;
pub mod samples;
pub mod train;

#[cfg(test)]
mod testing;

pub use attendance::{
    AttendanceCapture, AttendanceSession, FaceOutcome, FrameReport, RecognitionOutcome, RecognitionSettings,
    Verification,
};
pub use cancel::CancelFlag;
pub use config::{Config, ConfigError};
pub use directory::{AttendanceLedger, EmployeeDirectory, SqliteStore};
pub use enroll::{CaptureProgress, CaptureSettings, EnrollmentCapture, EnrollmentReport};
pub use error::{PipelineError, StorageError, ValidationError};
pub use identity::{
    AttendanceEvent, AttendanceKind, Employee, EmployeeId, EnrollmentStatus, SessionContext, LOCATION_PLACEHOLDER,
};
pub use model_store::{is_stale, FileModelStore, ModelStore};
pub use samples::{SampleEntry, SampleStore};
pub use train::{train, TrainingReport};
