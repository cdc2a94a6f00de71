//! likeness-hw — Camera capture for live verification.
//!
//! Opens V4L2 devices, negotiates YUYV/MJPG/GREY, and hands out packed RGB
//! frames ready for the embedding provider.

pub mod camera;
pub mod frame;

pub use camera::{list_devices, Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
