//! Training: fit the recognizer over the whole sample store and publish it.

use crate::directory::EmployeeDirectory;
use crate::error::{PipelineError, ValidationError};
use crate::identity::{EmployeeId, EnrollmentStatus};
use crate::model_store::ModelStore;
use crate::samples::SampleStore;
use clockface_core::{LbphParams, LbphTrainer};
use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingReport {
    pub employee_id: EmployeeId,
    /// Samples in the whole corpus, across all employees.
    pub samples: usize,
    /// Distinct employees the model can now recognize.
    pub employees: usize,
    pub corpus_fingerprint: String,
}

/// Retrain the shared recognizer and mark `employee_id` as enrolled.
///
/// The employee must already have samples on disk; that is checked before any
/// image is decoded, and a rejected request never touches the model artifact.
/// Every run is a full retrain over every employee's samples.
pub fn train<E, M>(
    directory: &E,
    samples: &SampleStore,
    models: &M,
    employee_id: EmployeeId,
    params: LbphParams,
    canonical_size: u32,
) -> Result<TrainingReport, PipelineError>
where
    E: EmployeeDirectory,
    M: ModelStore,
{
    let status = directory
        .enrollment_status(employee_id)?
        .ok_or(ValidationError::UnknownEmployee(employee_id))?;
    if status == EnrollmentStatus::NotEnrolled || samples.count_for(employee_id)? == 0 {
        return Err(ValidationError::NoFaceData(employee_id).into());
    }

    let started = Instant::now();
    let fingerprint = samples.fingerprint()?;
    let entries = samples.entries()?;
    let mut trainer = LbphTrainer::new(params, canonical_size)?;
    let mut labels = BTreeSet::new();
    for entry in &entries {
        let face = samples.load(entry)?;
        trainer.add(&face, entry.employee_id.0);
        labels.insert(entry.employee_id);
    }

    let model = trainer.finish(fingerprint.clone())?;
    models.replace(&model)?;
    directory.set_enrollment_status(employee_id, EnrollmentStatus::Enrolled)?;

    tracing::info!(
        employee = %employee_id,
        samples = entries.len(),
        employees = labels.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "recognizer trained"
    );

    Ok(TrainingReport {
        employee_id,
        samples: entries.len(),
        employees: labels.len(),
        corpus_fingerprint: fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelFlag;
    use crate::directory::SqliteStore;
    use crate::enroll::{CaptureSettings, EnrollmentCapture};
    use crate::model_store::FileModelStore;
    use crate::testing::{frame, texture, ScriptedDevice, StripeDetector};
    use clockface_core::Classifier;

    const SIZE: u32 = crate::testing::FACE;

    struct Fixture {
        _dir: tempfile::TempDir,
        directory: SqliteStore,
        samples: SampleStore,
        models: FileModelStore,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let directory = SqliteStore::open_in_memory().unwrap();
        directory.add_employee(Some(EmployeeId(101)), "Alice").unwrap();
        directory.add_employee(Some(EmployeeId(202)), "Bob").unwrap();
        Fixture {
            samples: SampleStore::new(dir.path().join("FaceData")),
            models: FileModelStore::new(dir.path().join("Classifier/classifier.bin")),
            directory,
            _dir: dir,
        }
    }

    fn capture(f: &Fixture, id: i64, key: &str, seed: u32) {
        f.samples.write(key, 1, &texture(seed)).unwrap();
        f.samples.write(key, 2, &texture(seed + 1)).unwrap();
        f.directory
            .set_enrollment_status(EmployeeId(id), EnrollmentStatus::ImagesCaptured)
            .unwrap();
    }

    #[test]
    fn test_not_enrolled_is_rejected_without_touching_artifact() {
        let f = fixture();
        capture(&f, 202, "Bob.202", 50);

        let err = train(&f.directory, &f.samples, &f.models, EmployeeId(101), LbphParams::default(), SIZE)
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::NoFaceData(EmployeeId(101)))
        ));
        assert!(!f.models.exists());
        assert_eq!(
            f.directory.enrollment_status(EmployeeId(101)).unwrap(),
            Some(EnrollmentStatus::NotEnrolled)
        );
    }

    #[test]
    fn test_status_without_samples_is_rejected() {
        let f = fixture();
        f.directory
            .set_enrollment_status(EmployeeId(101), EnrollmentStatus::ImagesCaptured)
            .unwrap();

        let err = train(&f.directory, &f.samples, &f.models, EmployeeId(101), LbphParams::default(), SIZE)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ValidationError::NoFaceData(_))));
        assert!(!f.models.exists());
    }

    #[test]
    fn test_unknown_employee() {
        let f = fixture();
        let err = train(&f.directory, &f.samples, &f.models, EmployeeId(9), LbphParams::default(), SIZE)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::UnknownEmployee(EmployeeId(9)))
        ));
    }

    #[test]
    fn test_full_retrain_covers_every_employee() {
        let f = fixture();
        capture(&f, 101, "Alice.101", 10);
        capture(&f, 202, "Bob.202", 50);

        let report = train(&f.directory, &f.samples, &f.models, EmployeeId(101), LbphParams::default(), SIZE)
            .unwrap();

        assert_eq!(report.samples, 4);
        assert_eq!(report.employees, 2);
        assert_eq!(report.corpus_fingerprint, f.samples.fingerprint().unwrap());
        assert_eq!(
            f.directory.enrollment_status(EmployeeId(101)).unwrap(),
            Some(EnrollmentStatus::Enrolled)
        );
        // Only the requested employee advances.
        assert_eq!(
            f.directory.enrollment_status(EmployeeId(202)).unwrap(),
            Some(EnrollmentStatus::ImagesCaptured)
        );

        let model = f.models.load().unwrap().unwrap();
        assert_eq!(model.labels().into_iter().collect::<Vec<_>>(), vec![101, 202]);
        let hit = model.predict(&texture(50)).unwrap();
        assert_eq!(hit.label, 202);
        assert!(hit.distance.abs() < 1e-9);
    }

    #[test]
    fn test_enrolled_employee_cannot_recapture() {
        let f = fixture();
        capture(&f, 101, "Alice.101", 10);
        train(&f.directory, &f.samples, &f.models, EmployeeId(101), LbphParams::default(), SIZE).unwrap();

        let device = ScriptedDevice::new(vec![frame(&[200])]);
        let mut detector = StripeDetector;
        let settings = CaptureSettings {
            sample_target: 1,
            canonical_size: SIZE,
            skip_dark_frames: false,
        };
        let err = EnrollmentCapture::new(&mut detector, &f.directory, &f.samples, settings)
            .run(&device, EmployeeId(101), &CancelFlag::new(), |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::AlreadyEnrolled(EmployeeId(101)))
        ));
    }
}
