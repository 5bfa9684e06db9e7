//! Recognition-gated attendance capture.
//!
//! [`AttendanceCapture::start`] validates the request, loads the recognizer and
//! acquires the camera. The returned [`AttendanceSession`] is a lazy iterator:
//! every `next()` polls the cancel flag, reads one frame and classifies every
//! face in it. The session ends, and the camera is released, on the first
//! verified face (one event written), on an identity mismatch, on a device or
//! storage failure, or on cancel.

use crate::cancel::CancelFlag;
use crate::directory::{AttendanceLedger, EmployeeDirectory};
use crate::error::{PipelineError, ValidationError};
use crate::identity::{AttendanceEvent, AttendanceKind, EmployeeId, EnrollmentStatus, SessionContext};
use crate::model_store::ModelStore;
use clockface_core::{confidence_from_distance, imaging, Classifier, DetectorError, FaceDetect, Region};
use clockface_hw::{CaptureDevice, Frame, FrameSource};

const UNKNOWN_ANNOTATION: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionSettings {
    /// A face is accepted only when its confidence is strictly greater.
    pub confidence_threshold: f64,
    pub distance_divisor: f64,
    pub canonical_size: u32,
    pub skip_dark_frames: bool,
}

/// What happened to one detected face in a frame that did not end the session.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    /// Scored at or below the threshold, or the model had nothing to compare with.
    Unknown {
        region: Region,
        confidence: Option<f64>,
    },
    /// The predicted label has no employee record. Skipped.
    Unrecognized { region: Region, label: EmployeeId },
}

impl FaceOutcome {
    pub fn region(&self) -> &Region {
        match self {
            FaceOutcome::Unknown { region, .. } | FaceOutcome::Unrecognized { region, .. } => region,
        }
    }

    /// Text to draw next to the face box.
    pub fn annotation(&self) -> &str {
        UNKNOWN_ANNOTATION
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// 1-based index of the frame within the session.
    pub frame: u32,
    pub faces: Vec<FaceOutcome>,
}

/// The verified face that produced the session's attendance event.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub event: AttendanceEvent,
    pub display_name: String,
    pub confidence: f64,
    pub region: Region,
}

impl Verification {
    pub fn annotation(&self) -> &str {
        &self.display_name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    /// A frame was processed and nothing was accepted.
    Frame(FrameReport),
    /// Terminal: the session employee was verified and the event written.
    Recorded(Verification),
}

/// Collaborators for one attendance capture.
pub struct AttendanceCapture<'a, F, E, L> {
    detector: &'a mut F,
    directory: &'a E,
    ledger: &'a L,
    settings: RecognitionSettings,
}

impl<'a, F, E, L> AttendanceCapture<'a, F, E, L>
where
    F: FaceDetect,
    E: EmployeeDirectory,
    L: AttendanceLedger,
{
    pub fn new(detector: &'a mut F, directory: &'a E, ledger: &'a L, settings: RecognitionSettings) -> Self {
        Self {
            detector,
            directory,
            ledger,
            settings,
        }
    }

    /// Check preconditions, load the recognizer, then acquire the camera.
    ///
    /// Nothing is acquired unless every check passes.
    pub fn start<C, M>(
        self,
        device: &C,
        models: &M,
        context: &SessionContext,
        kind: AttendanceKind,
        cancel: CancelFlag,
    ) -> Result<AttendanceSession<'a, C::Source, F, E, L, M::Model>, PipelineError>
    where
        C: CaptureDevice,
        M: ModelStore,
    {
        let location = context.location()?.to_string();
        let employee_id = context.employee_id;
        let employee = self
            .directory
            .employee(employee_id)?
            .ok_or(ValidationError::UnknownEmployee(employee_id))?;
        if employee.status == EnrollmentStatus::NotEnrolled {
            return Err(ValidationError::NotEnrolled(employee_id).into());
        }
        let model = models.load()?.ok_or_else(|| {
            PipelineError::Configuration("recognizer model not found; please register face ID".into())
        })?;

        let source = device.acquire()?;
        tracing::info!(
            employee = %employee_id,
            kind = %kind,
            location = %location,
            "attendance session started"
        );

        Ok(AttendanceSession {
            source: Some(source),
            model,
            detector: self.detector,
            directory: self.directory,
            ledger: self.ledger,
            settings: self.settings,
            employee_id,
            kind,
            location,
            cancel,
            frames: 0,
        })
    }
}

/// A running capture loop that owns the camera until it ends or is dropped.
pub struct AttendanceSession<'a, S, F, E, L, M> {
    source: Option<S>,
    model: M,
    detector: &'a mut F,
    directory: &'a E,
    ledger: &'a L,
    settings: RecognitionSettings,
    employee_id: EmployeeId,
    kind: AttendanceKind,
    location: String,
    cancel: CancelFlag,
    frames: u32,
}

impl<'a, S, F, E, L, M> AttendanceSession<'a, S, F, E, L, M> {
    pub fn is_active(&self) -> bool {
        self.source.is_some()
    }

    fn release(&mut self, reason: &str) {
        if let Some(source) = self.source.take() {
            drop(source);
            tracing::info!(employee = %self.employee_id, frames = self.frames, reason, "attendance session ended");
        }
    }
}

impl<'a, S, F, E, L, M> AttendanceSession<'a, S, F, E, L, M>
where
    S: FrameSource,
    F: FaceDetect,
    E: EmployeeDirectory,
    L: AttendanceLedger,
    M: Classifier,
{
    /// Drive the session to its end.
    ///
    /// Returns the verification on success and `None` when cancelled.
    /// `on_frame` sees every frame that did not end the session.
    pub fn run(mut self, mut on_frame: impl FnMut(&FrameReport)) -> Result<Option<Verification>, PipelineError> {
        while let Some(item) = self.next() {
            match item? {
                RecognitionOutcome::Frame(report) => on_frame(&report),
                RecognitionOutcome::Recorded(verification) => return Ok(Some(verification)),
            }
        }
        Ok(None)
    }

    fn process(&mut self, frame: Frame) -> Result<RecognitionOutcome, PipelineError> {
        let mut report = FrameReport {
            frame: self.frames,
            faces: Vec::new(),
        };
        if self.settings.skip_dark_frames && frame.is_dark {
            tracing::debug!(frame = self.frames, "dark frame skipped");
            return Ok(RecognitionOutcome::Frame(report));
        }

        let regions = self.detector.detect(&frame.data, frame.width, frame.height)?;
        for region in regions {
            // Crop the raw frame, not the equalized copy the detector saw:
            // enrollment stores raw crops, and faces being recognized must match them.
            let face = imaging::crop_face(
                &frame.data,
                frame.width,
                frame.height,
                &region,
                self.settings.canonical_size,
            )
            .map_err(DetectorError::from)?;

            let Some(prediction) = self.model.predict(&face) else {
                report.faces.push(FaceOutcome::Unknown {
                    region,
                    confidence: None,
                });
                continue;
            };

            let label = EmployeeId(prediction.label);
            let Some(employee) = self.directory.employee(label)? else {
                tracing::warn!(error = %PipelineError::NotFound(label), "face skipped");
                report.faces.push(FaceOutcome::Unrecognized { region, label });
                continue;
            };

            let confidence = confidence_from_distance(prediction.distance, self.settings.distance_divisor);
            let accepted = confidence > self.settings.confidence_threshold;
            if !accepted {
                tracing::debug!(frame = self.frames, label = %label, confidence, "below threshold");
                report.faces.push(FaceOutcome::Unknown {
                    region,
                    confidence: Some(confidence),
                });
                continue;
            }

            if label != self.employee_id {
                tracing::warn!(expected = %self.employee_id, recognized = %label, confidence, "identity mismatch");
                return Err(PipelineError::IdentityMismatch {
                    expected: self.employee_id,
                    recognized: label,
                });
            }

            let event = AttendanceEvent::now(label, self.kind, self.location.clone());
            self.ledger.append(&event)?;
            tracing::info!(
                employee = %label,
                kind = %event.kind,
                date = %event.date_string(),
                time = %event.time_string(),
                confidence,
                "attendance recorded"
            );
            return Ok(RecognitionOutcome::Recorded(Verification {
                event,
                display_name: employee.display_name,
                confidence,
                region,
            }));
        }

        Ok(RecognitionOutcome::Frame(report))
    }
}

impl<'a, S, F, E, L, M> Iterator for AttendanceSession<'a, S, F, E, L, M>
where
    S: FrameSource,
    F: FaceDetect,
    E: EmployeeDirectory,
    L: AttendanceLedger,
    M: Classifier,
{
    type Item = Result<RecognitionOutcome, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.source.as_ref()?;
        if self.cancel.is_cancelled() {
            self.release("cancelled");
            return None;
        }

        let frame = match self.source.as_mut()?.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.release("camera failure");
                return Some(Err(e.into()));
            }
        };
        self.frames += 1;

        let result = self.process(frame);
        match &result {
            Ok(RecognitionOutcome::Frame(_)) => {}
            Ok(RecognitionOutcome::Recorded(_)) => self.release("attendance recorded"),
            Err(_) => self.release("aborted"),
        }
        Some(result)
    }
}

impl<'a, S, F, E, L, M> Drop for AttendanceSession<'a, S, F, E, L, M> {
    fn drop(&mut self) {
        self.release("dropped");
    }
}
