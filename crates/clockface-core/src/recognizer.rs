//! LBPH (Local Binary Patterns Histograms) face recognizer.
//!
//! Each training sample is reduced to a spatial histogram of circular LBP
//! codes; prediction is nearest-neighbour over every stored histogram using
//! the alternative chi-square distance. The model is trained from scratch on
//! every run and serialized with `bincode`.

use crate::imaging;
use crate::types::{Classifier, Prediction};
use chrono::{DateTime, Utc};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::io::{Read, Write};
use thiserror::Error;

/// Bumped whenever the serialized layout changes.
pub const MODEL_FORMAT_VERSION: u32 = 1;

const MAX_NEIGHBORS: u32 = 16;
const LBP_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no training samples")]
    EmptyTrainingSet,
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
    #[error("unsupported model format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

/// LBPH operator and grid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    /// Cell dimensions for a `size` × `size` sample. Trailing pixels that do not
    /// fill a whole cell are ignored.
    fn cell_dims(&self, size: u32) -> (u32, u32) {
        let inner = size.saturating_sub(2 * self.radius);
        (inner / self.grid_x.max(1), inner / self.grid_y.max(1))
    }

    fn validate(&self, size: u32) -> Result<(), ModelError> {
        if self.radius == 0 || self.neighbors == 0 || self.neighbors > MAX_NEIGHBORS {
            return Err(ModelError::InvalidParams(format!(
                "radius must be >= 1 and neighbors in 1..={MAX_NEIGHBORS}, got radius={} neighbors={}",
                self.radius, self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(ModelError::InvalidParams("grid must be at least 1x1".into()));
        }
        let (cw, ch) = self.cell_dims(size);
        if cw == 0 || ch == 0 {
            return Err(ModelError::InvalidParams(format!(
                "canonical size {size} too small for a {}x{} grid",
                self.grid_x, self.grid_y
            )));
        }
        if (cw as u64) * (ch as u64) > u16::MAX as u64 {
            return Err(ModelError::InvalidParams(format!(
                "cells of {cw}x{ch} pixels overflow 16-bit bins; use a finer grid"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainedSample {
    label: i64,
    histogram: Vec<u16>,
}

/// A trained LBPH model. Replaced wholesale on every training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphModel {
    pub format_version: u32,
    pub params: LbphParams,
    /// Side of the square resolution every sample and probe is resized to.
    pub canonical_size: u32,
    pub trained_at: DateTime<Utc>,
    /// Fingerprint of the sample corpus this model was fitted on.
    pub corpus_fingerprint: String,
    samples: Vec<TrainedSample>,
}

impl LbphModel {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Distinct labels present in the training set, ascending.
    pub fn labels(&self) -> BTreeSet<i64> {
        self.samples.iter().map(|s| s.label).collect()
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), ModelError> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self, ModelError> {
        let model: LbphModel = bincode::deserialize_from(reader)?;
        if model.format_version != MODEL_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: model.format_version,
                expected: MODEL_FORMAT_VERSION,
            });
        }
        Ok(model)
    }

    fn cell_pixels(&self) -> f64 {
        let (cw, ch) = self.params.cell_dims(self.canonical_size);
        (cw * ch) as f64
    }
}

impl Classifier for LbphModel {
    fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        let probe = imaging::to_canonical(face, self.canonical_size);
        let query = spatial_histogram(&probe, &self.params);
        let scale = 2.0 / self.cell_pixels();

        let mut best: Option<Prediction> = None;
        for sample in &self.samples {
            let distance = chi_square_alt(&sample.histogram, &query) * scale;
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Prediction {
                    label: sample.label,
                    distance,
                });
            }
        }
        best
    }
}

/// Incremental builder: samples are reduced to histograms as they arrive so
/// the full image corpus never has to be held in memory.
pub struct LbphTrainer {
    params: LbphParams,
    canonical_size: u32,
    samples: Vec<TrainedSample>,
}

impl LbphTrainer {
    pub fn new(params: LbphParams, canonical_size: u32) -> Result<Self, ModelError> {
        params.validate(canonical_size)?;
        Ok(Self {
            params,
            canonical_size,
            samples: Vec::new(),
        })
    }

    pub fn add(&mut self, face: &GrayImage, label: i64) {
        let face = imaging::to_canonical(face, self.canonical_size);
        self.samples.push(TrainedSample {
            label,
            histogram: spatial_histogram(&face, &self.params),
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn finish(self, corpus_fingerprint: String) -> Result<LbphModel, ModelError> {
        if self.samples.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        Ok(LbphModel {
            format_version: MODEL_FORMAT_VERSION,
            params: self.params,
            canonical_size: self.canonical_size,
            trained_at: Utc::now(),
            corpus_fingerprint,
            samples: self.samples,
        })
    }
}

/// Circular LBP code image with bilinear neighbour sampling.
///
/// Output is `(w - 2r) × (h - 2r)`, row-major.
fn lbp_codes(img: &GrayImage, params: &LbphParams) -> (Vec<u32>, u32, u32) {
    let r = params.radius;
    let (w, h) = img.dimensions();
    let out_w = w.saturating_sub(2 * r);
    let out_h = h.saturating_sub(2 * r);
    let mut codes = vec![0u32; (out_w * out_h) as usize];
    let px = |x: u32, y: u32| img.get_pixel(x, y).0[0] as f64;

    for n in 0..params.neighbors {
        let angle = 2.0 * PI * n as f64 / params.neighbors as f64;
        let sx = -(r as f64) * angle.sin();
        let sy = r as f64 * angle.cos();

        let fx = sx.floor();
        let fy = sy.floor();
        let tx = sx - fx;
        let ty = sy - fy;
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;
        let (fx, fy) = (fx as i64, fy as i64);

        for y in 0..out_h {
            for x in 0..out_w {
                let cx = (x + r) as i64;
                let cy = (y + r) as i64;
                let at = |dx: i64, dy: i64| {
                    let sx = (cx + dx).clamp(0, w as i64 - 1) as u32;
                    let sy = (cy + dy).clamp(0, h as i64 - 1) as u32;
                    px(sx, sy)
                };
                let sample = w1 * at(fx, fy)
                    + w2 * at(fx + 1, fy)
                    + w3 * at(fx, fy + 1)
                    + w4 * at(fx + 1, fy + 1);
                let center = px(cx as u32, cy as u32);
                if sample >= center - LBP_TOLERANCE {
                    codes[(y * out_w + x) as usize] |= 1 << n;
                }
            }
        }
    }

    (codes, out_w, out_h)
}

/// Concatenated per-cell histograms of LBP codes, `grid_x * grid_y * 2^neighbors` bins.
fn spatial_histogram(img: &GrayImage, params: &LbphParams) -> Vec<u16> {
    let (codes, out_w, _) = lbp_codes(img, params);
    let (cell_w, cell_h) = params.cell_dims(img.width());
    let bins = params.bins();
    let mut hist = vec![0u16; params.grid_x as usize * params.grid_y as usize * bins];

    for gy in 0..params.grid_y {
        for gx in 0..params.grid_x {
            let base = (gy * params.grid_x + gx) as usize * bins;
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    let code = codes[(y * out_w + x) as usize] as usize;
                    hist[base + code] = hist[base + code].saturating_add(1);
                }
            }
        }
    }
    hist
}

/// Σ (a − b)² / (a + b) over raw counts; callers scale by `2 / cell_pixels`.
fn chi_square_alt(a: &[u16], b: &[u16]) -> f64 {
    a.iter()
        .zip(b)
        .filter(|&(&x, &y)| x != 0 || y != 0)
        .map(|(&x, &y)| {
            let diff = x as f64 - y as f64;
            diff * diff / (x as f64 + y as f64)
        })
        .sum()
}
