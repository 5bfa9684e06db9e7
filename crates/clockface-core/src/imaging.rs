//! Grayscale normalization: histogram equalization, cropping, canonical resize.

use crate::types::Region;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("pixel buffer too short for {width}x{height}: got {actual} bytes")]
    BufferTooShort {
        width: u32,
        height: u32,
        actual: usize,
    },
    #[error("region {x},{y} {width}x{height} lies outside the frame")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Global histogram equalization of an 8-bit grayscale buffer.
///
/// Returns an equalized copy; the input is left untouched. A buffer with a
/// single intensity level is returned unchanged.
pub fn equalize_histogram(gray: &[u8]) -> Vec<u8> {
    let mut hist = [0u32; 256];
    for &p in gray {
        hist[p as usize] += 1;
    }

    let total = gray.len() as u32;
    let cdf_min = hist.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == 0 || total == cdf_min {
        return gray.to_vec();
    }

    let scale = 255.0 / (total - cdf_min) as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (level, &count) in hist.iter().enumerate() {
        cumulative += count;
        lut[level] = (cumulative.saturating_sub(cdf_min) as f32 * scale)
            .round()
            .clamp(0.0, 255.0) as u8;
    }

    gray.iter().map(|&p| lut[p as usize]).collect()
}

/// Borrow a raw grayscale buffer as an image view.
pub fn view(
    gray: &[u8],
    width: u32,
    height: u32,
) -> Result<ImageBuffer<Luma<u8>, &[u8]>, ImagingError> {
    ImageBuffer::from_raw(width, height, gray).ok_or(ImagingError::BufferTooShort {
        width,
        height,
        actual: gray.len(),
    })
}

/// Crop `region` out of a grayscale frame and resize it to `size` × `size`.
pub fn crop_face(
    gray: &[u8],
    width: u32,
    height: u32,
    region: &Region,
    size: u32,
) -> Result<GrayImage, ImagingError> {
    if region.width == 0
        || region.height == 0
        || region.x + region.width > width
        || region.y + region.height > height
    {
        return Err(ImagingError::RegionOutOfBounds {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
        });
    }

    let frame = view(gray, width, height)?;
    let frame = GrayImage::from_raw(width, height, frame.into_raw().to_vec())
        .expect("view already validated buffer length");
    let cropped = imageops::crop_imm(&frame, region.x, region.y, region.width, region.height)
        .to_image();
    Ok(to_canonical(&cropped, size))
}

/// Resize a face crop to the canonical square resolution, if it is not already.
pub fn to_canonical(face: &GrayImage, size: u32) -> GrayImage {
    if face.width() == size && face.height() == size {
        return face.clone();
    }
    imageops::resize(face, size, size, FilterType::Triangle)
}
