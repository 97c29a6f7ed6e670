//! faceattend-hw — Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access and conversion of captured
//! buffers into RGB frames that can be encoded as JPEG.

pub mod camera;
pub mod frame;

pub use camera::{capture_usable, Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
