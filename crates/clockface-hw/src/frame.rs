//! Grayscale frames and the raw pixel formats a camera may deliver.

use thiserror::Error;

/// Pixels at or below this value count as black for the dark-frame test.
const DARK_LEVEL: u8 = 31;
/// A frame is dark when more than this share of its pixels is black.
pub const DARK_FRAME_RATIO: f32 = 0.95;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{format:?} buffer holds {actual} bytes, {width}x{height} needs {expected}")]
    ShortBuffer {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Raw layouts accepted from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, `[Y0 U Y1 V]`. Luma is every even byte.
    Yuyv,
    /// 8-bit luma.
    Grey,
    /// 16-bit little-endian luma.
    Y16,
}

impl PixelFormat {
    fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }

    /// Extract 8-bit luma from a raw buffer. Trailing driver padding is ignored.
    pub fn to_gray(self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        let pixels = width as usize * height as usize;
        let expected = pixels * self.bytes_per_pixel();
        if raw.len() < expected {
            return Err(FrameError::ShortBuffer {
                format: self,
                width,
                height,
                expected,
                actual: raw.len(),
            });
        }
        let raw = &raw[..expected];
        Ok(match self {
            PixelFormat::Grey => raw.to_vec(),
            PixelFormat::Yuyv => raw.iter().step_by(2).copied().collect(),
            // High byte of each little-endian sample.
            PixelFormat::Y16 => raw.chunks_exact(2).map(|px| px[1]).collect(),
        })
    }
}

/// One grayscale frame, `width * height` bytes, row-major.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    /// Driver sequence number; 0 when unknown.
    pub sequence: u32,
    /// Almost entirely black, e.g. while the sensor is still adjusting exposure.
    pub is_dark: bool,
}

impl Frame {
    /// Wrap an already-grayscale buffer, e.g. from a file or a test fixture.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark(&data, DARK_FRAME_RATIO);
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// Mean luma, 0.0 for an empty frame.
    pub fn mean_luma(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.data.iter().map(|&p| p as u64).sum();
        sum as f32 / self.data.len() as f32
    }
}

/// Whether more than `max_ratio` of `gray` is black. Empty input counts as dark.
pub fn is_dark(gray: &[u8], max_ratio: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let black = gray.iter().filter(|&&p| p <= DARK_LEVEL).count();
    black as f32 / gray.len() as f32 > max_ratio
}
