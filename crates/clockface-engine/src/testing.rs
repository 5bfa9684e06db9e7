//! Scripted camera, detector, classifier and model store shared by the
//! capture-loop tests.

use crate::model_store::ModelStore;
use clockface_core::{Classifier, DetectorError, FaceDetect, LbphModel, ModelError, Prediction, Region};
use clockface_hw::{CameraError, CaptureDevice, Frame, FrameSource};
use image::{GrayImage, Luma};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Width in pixels of one face slot in a scripted frame.
pub const SLOT: u32 = 8;
pub const SLOTS: u32 = 4;
/// Pixel value of "no face" background. Bright enough not to count as dark.
pub const BACKGROUND: u8 = 40;

/// A frame of `SLOTS` vertical stripes. A non-background stripe is a face
/// whose pixels all carry that value.
pub fn frame(faces: &[u8]) -> Frame {
    let width = SLOT * SLOTS;
    let mut data = vec![BACKGROUND; (width * SLOT) as usize];
    for (slot, &value) in faces.iter().enumerate() {
        for y in 0..SLOT {
            for x in 0..SLOT {
                data[(y * width + slot as u32 * SLOT + x) as usize] = value;
            }
        }
    }
    Frame::from_gray(data, width, SLOT, 0)
}

/// Side of a textured face, and of the frame that holds exactly one.
pub const FACE: u32 = 32;

/// Deterministic xorshift noise. Distinct seeds give unrelated LBP histograms.
pub fn texture(seed: u32) -> GrayImage {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    GrayImage::from_fn(FACE, FACE, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        Luma([(state & 0xff) as u8])
    })
}

/// A frame filled edge to edge by `texture(seed)`.
pub fn face_frame(seed: u32) -> Frame {
    Frame::from_gray(texture(seed).into_raw(), FACE, FACE, seed)
}

pub fn dark_frame() -> Frame {
    Frame::from_gray(vec![0; (SLOT * SLOTS * SLOT) as usize], SLOT * SLOTS, SLOT, 0)
}

#[derive(Clone, Default)]
pub struct Counters {
    pub acquired: Rc<Cell<u32>>,
    pub released: Rc<Cell<u32>>,
    pub frames_read: Rc<Cell<u32>>,
}

/// Hands out a source that replays `frames`, then reports a disconnect.
pub struct ScriptedDevice {
    frames: RefCell<Vec<Frame>>,
    unavailable: bool,
    pub counters: Counters,
}

impl ScriptedDevice {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: RefCell::new(frames),
            unavailable: false,
            counters: Counters::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(Vec::new())
        }
    }
}

impl CaptureDevice for ScriptedDevice {
    type Source = ScriptedSource;

    fn acquire(&self) -> Result<ScriptedSource, CameraError> {
        if self.unavailable {
            return Err(CameraError::NotFound("/dev/video-test".into()));
        }
        self.counters.acquired.set(self.counters.acquired.get() + 1);
        Ok(ScriptedSource {
            frames: self.frames.borrow_mut().drain(..).collect(),
            counters: self.counters.clone(),
        })
    }
}

pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    counters: Counters,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.counters.frames_read.set(self.counters.frames_read.get() + 1);
        self.frames
            .pop_front()
            .ok_or_else(|| CameraError::Read("device disconnected".into()))
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.counters.released.set(self.counters.released.get() + 1);
    }
}

/// Reports one region per non-background stripe, left to right.
pub struct StripeDetector;

impl FaceDetect for StripeDetector {
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<Region>, DetectorError> {
        Ok((0..width / SLOT)
            .filter(|slot| gray[(slot * SLOT) as usize] != BACKGROUND)
            .map(|slot| Region {
                x: slot * SLOT,
                y: 0,
                width: SLOT,
                height: height.min(SLOT),
                score: 0.9,
            })
            .collect())
    }
}

/// Reports the whole frame as a single face.
pub struct WholeFrameDetector;

impl FaceDetect for WholeFrameDetector {
    fn detect(&mut self, _gray: &[u8], width: u32, height: u32) -> Result<Vec<Region>, DetectorError> {
        Ok(vec![Region {
            x: 0,
            y: 0,
            width,
            height,
            score: 0.9,
        }])
    }
}

/// Classifies a face by its uniform pixel value.
#[derive(Clone, Default)]
pub struct TableClassifier {
    table: HashMap<u8, Prediction>,
}

impl TableClassifier {
    pub fn with(mut self, value: u8, label: i64, distance: f64) -> Self {
        self.table.insert(value, Prediction { label, distance });
        self
    }
}

impl Classifier for TableClassifier {
    fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        self.table.get(&face.get_pixel(0, 0)[0]).copied()
    }
}

/// In-memory model store holding an optional classifier.
pub struct StubModelStore {
    pub model: Option<TableClassifier>,
    pub loads: Cell<u32>,
}

impl StubModelStore {
    pub fn new(model: Option<TableClassifier>) -> Self {
        Self {
            model,
            loads: Cell::new(0),
        }
    }
}

impl ModelStore for StubModelStore {
    type Model = TableClassifier;

    fn exists(&self) -> bool {
        self.model.is_some()
    }

    fn load(&self) -> Result<Option<TableClassifier>, ModelError> {
        self.loads.set(self.loads.get() + 1);
        Ok(self.model.clone())
    }

    fn replace(&self, _model: &LbphModel) -> Result<(), ModelError> {
        Ok(())
    }
}
