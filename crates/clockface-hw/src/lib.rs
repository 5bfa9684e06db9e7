//! clockface-hw: Camera acquisition for the attendance pipeline.
//!
//! Provides V4L2-based frame capture plus the `CaptureDevice` / `FrameSource`
//! seams the capture loops are written against.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureDevice, DeviceInfo, FrameSource, V4lDevice};
pub use frame::{Frame, FrameError, PixelFormat};
