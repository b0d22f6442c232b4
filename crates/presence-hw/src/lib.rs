//! presence-hw — Camera capture for live attendance scans.
//!
//! Provides V4L2-based camera access and conversion of captured frames
//! into RGB images.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraProvider, DeviceInfo, FrameSource, PixelFormat, V4lCameraProvider};
pub use frame::{Frame, FrameError};
