//! V4L2 camera capture via the `v4l` crate.
//!
//! A [`Camera`] is the exclusive owner of its device for as long as it lives.
//! Dropping it stops streaming and closes the device node, so a later capture
//! loop can reacquire it.

use crate::frame::{Frame, PixelFormat};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera {0} not found")]
    NotFound(String),
    #[error("camera {0} is in use by another process")]
    Busy(String),
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("unsupported camera format: {0}")]
    Format(String),
    #[error("frame read failed: {0}")]
    Read(String),
}

/// A source of grayscale frames, polled one at a time by a capture loop.
pub trait FrameSource {
    /// Block until the next frame is available.
    ///
    /// There is no timeout: a driver that never delivers a buffer blocks the
    /// caller indefinitely.
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Something that can hand out exclusive access to a camera.
///
/// The returned source owns the device; dropping it releases the device.
pub trait CaptureDevice {
    type Source: FrameSource;

    fn acquire(&self) -> Result<Self::Source, CameraError>;
}

/// A capture-capable node found under `/dev`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub card: String,
    pub driver: String,
    pub bus: String,
}

/// A V4L2 device path plus the resolution to request when it is acquired.
#[derive(Debug, Clone)]
pub struct V4lDevice {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

impl V4lDevice {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            width: 640,
            height: 480,
        }
    }
}

impl CaptureDevice for V4lDevice {
    type Source = Camera;

    fn acquire(&self) -> Result<Camera, CameraError> {
        Camera::open(&self.path, self.width, self.height)
    }
}

/// Open, streaming V4L2 camera.
pub struct Camera {
    // Declared before `device` so streaming stops before the node is closed.
    stream: MmapStream<'static>,
    #[allow(dead_code)]
    device: Device,
    pub width: u32,
    pub height: u32,
    pub path: String,
    pub fourcc: FourCC,
    format: PixelFormat,
}

impl Camera {
    /// Open `path`, negotiate a format close to `width` × `height` and start streaming.
    pub fn open(path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        let device = open_node(path)?;
        let card = match device.query_caps() {
            Ok(caps) if caps.capabilities.contains(Flags::VIDEO_CAPTURE) => caps.card,
            Ok(_) => return Err(CameraError::NotCaptureDevice(path.to_string())),
            Err(e) => return Err(CameraError::Read(format!("{path}: querying capabilities: {e}"))),
        };

        let (fourcc, format, width, height) = negotiate(&device, width, height)?;
        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::Read(format!("{path}: mapping buffers: {e}")))?;

        tracing::info!(device = path, %card, width, height, ?fourcc, "camera acquired");
        Ok(Self {
            stream,
            device,
            width,
            height,
            path: path.to_string(),
            fourcc,
            format,
        })
    }

    /// Capture-capable devices among `/dev/video*`, in path order.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };
        let mut paths: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path().to_string_lossy().into_owned())
            .filter(|p| p.starts_with("/dev/video"))
            .collect();
        paths.sort_by_key(|p| (p.len(), p.clone()));

        paths
            .into_iter()
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities.contains(Flags::VIDEO_CAPTURE).then(|| DeviceInfo {
                    card: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                    path,
                })
            })
            .collect()
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (raw, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::Read(format!("{}: {e}", self.path)))?;
        let gray = self
            .format
            .to_gray(raw, self.width, self.height)
            .map_err(|e| CameraError::Read(e.to_string()))?;

        Ok(Frame::from_gray(gray, self.width, self.height, meta.sequence))
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.path, "camera released");
    }
}

fn open_node(path: &str) -> Result<Device, CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::NotFound(path.to_string()));
    }
    Device::with_path(path).map_err(|e| match e.raw_os_error() {
        Some(EBUSY) => CameraError::Busy(path.to_string()),
        _ => CameraError::NotFound(format!("{path}: {e}")),
    })
}

/// Ask for YUYV at the requested size and accept whatever luma-bearing format
/// the driver settles on.
fn negotiate(device: &Device, width: u32, height: u32) -> Result<(FourCC, PixelFormat, u32, u32), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::Format(format!("reading current format: {e}")))?;
    wanted.fourcc = FourCC::new(b"YUYV");
    wanted.width = width;
    wanted.height = height;

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::Format(format!("setting format: {e}")))?;
    let format = pixel_format_for(got.fourcc)?;
    Ok((got.fourcc, format, got.width, got.height))
}

fn pixel_format_for(fourcc: FourCC) -> Result<PixelFormat, CameraError> {
    match &fourcc.repr {
        b"YUYV" => Ok(PixelFormat::Yuyv),
        b"GREY" => Ok(PixelFormat::Grey),
        b"Y16 " | b"Y16\0" => Ok(PixelFormat::Y16),
        _ => Err(CameraError::Format(format!("{fourcc:?} (supported: YUYV, GREY, Y16)"))),
    }
}
