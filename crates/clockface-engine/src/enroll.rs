//! Enrollment capture: turn a live camera feed into face samples for one employee.

use crate::cancel::CancelFlag;
use crate::directory::EmployeeDirectory;
use crate::error::{PipelineError, ValidationError};
use crate::identity::{EmployeeId, EnrollmentStatus};
use crate::samples::{sequence_exhausted, SampleStore};
use clockface_core::{imaging, DetectorError, FaceDetect, Region};
use clockface_hw::{CaptureDevice, FrameSource};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    /// Stop once this many samples have been stored in one invocation.
    pub sample_target: u32,
    pub canonical_size: u32,
    pub skip_dark_frames: bool,
}

/// Per-frame progress, for rendering the face box and counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureProgress {
    pub frame: u32,
    /// The region stored from this frame, if any.
    pub region: Option<Region>,
    pub stored: u32,
    pub target: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentReport {
    pub employee_id: EmployeeId,
    /// Samples written during this invocation.
    pub stored: u32,
    /// Sequence number of the first sample written.
    pub first_sequence: u32,
    pub frames: u32,
    pub cancelled: bool,
}

/// Drives one enrollment capture loop against injected collaborators.
pub struct EnrollmentCapture<'a, F, E> {
    detector: &'a mut F,
    directory: &'a E,
    samples: &'a SampleStore,
    settings: CaptureSettings,
}

impl<'a, F, E> EnrollmentCapture<'a, F, E>
where
    F: FaceDetect,
    E: EmployeeDirectory,
{
    pub fn new(
        detector: &'a mut F,
        directory: &'a E,
        samples: &'a SampleStore,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            detector,
            directory,
            samples,
            settings,
        }
    }

    /// Capture up to `sample_target` samples for `employee_id`.
    ///
    /// Preconditions are checked before the camera is touched. The camera is
    /// released on every exit path. A cancelled run, or one that never saw a
    /// face, is not an error; it simply reports how many samples were stored.
    pub fn run<C: CaptureDevice>(
        &mut self,
        device: &C,
        employee_id: EmployeeId,
        cancel: &CancelFlag,
        mut on_progress: impl FnMut(&CaptureProgress),
    ) -> Result<EnrollmentReport, PipelineError> {
        let employee = self
            .directory
            .employee(employee_id)?
            .ok_or(ValidationError::UnknownEmployee(employee_id))?;
        if employee.status == EnrollmentStatus::Enrolled {
            return Err(ValidationError::AlreadyEnrolled(employee_id).into());
        }
        let key = employee.sample_key()?;
        let first_sequence = self.samples.next_sequence(employee_id)?;

        let mut source = device.acquire()?;
        tracing::info!(employee = %employee_id, target = self.settings.sample_target, "enrollment capture started");

        let mut report = EnrollmentReport {
            employee_id,
            stored: 0,
            first_sequence,
            frames: 0,
            cancelled: false,
        };
        let outcome = self.capture_loop(&mut source, &key, cancel, &mut report, &mut on_progress);
        drop(source);

        // Samples already on disk stay valid after a mid-loop failure.
        if report.stored > 0 {
            let marked = self
                .directory
                .set_enrollment_status(employee_id, EnrollmentStatus::ImagesCaptured);
            match (&outcome, marked) {
                (_, Ok(())) => {}
                (Ok(()), Err(e)) => return Err(e.into()),
                (Err(_), Err(e)) => {
                    tracing::warn!(employee = %employee_id, error = %e, "failed to mark samples as captured");
                }
            }
        }
        tracing::info!(
            employee = %employee_id,
            stored = report.stored,
            frames = report.frames,
            cancelled = report.cancelled,
            "enrollment capture finished"
        );
        outcome.map(|()| report)
    }

    fn capture_loop<S: FrameSource>(
        &mut self,
        source: &mut S,
        key: &str,
        cancel: &CancelFlag,
        report: &mut EnrollmentReport,
        on_progress: &mut impl FnMut(&CaptureProgress),
    ) -> Result<(), PipelineError> {
        while report.stored < self.settings.sample_target {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let frame = source.next_frame()?;
            report.frames += 1;
            if self.settings.skip_dark_frames && frame.is_dark {
                tracing::debug!(frame = report.frames, "dark frame skipped");
                continue;
            }

            let regions = self.detector.detect(&frame.data, frame.width, frame.height)?;
            let region = regions.first().copied();
            if let Some(region) = region {
                let face = imaging::crop_face(
                    &frame.data,
                    frame.width,
                    frame.height,
                    &region,
                    self.settings.canonical_size,
                )
                .map_err(DetectorError::from)?;
                let sequence = report
                    .first_sequence
                    .checked_add(report.stored)
                    .ok_or_else(|| sequence_exhausted(report.employee_id))?;
                self.samples.write(key, sequence, &face)?;
                report.stored += 1;
                tracing::debug!(sequence, faces = regions.len(), "sample stored");
            }

            on_progress(&CaptureProgress {
                frame: report.frames,
                region,
                stored: report.stored,
                target: self.settings.sample_target,
            });
        }
        Ok(())
    }
}
