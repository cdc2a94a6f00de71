//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Highest `/dev/videoN` index scanned by [`list_devices`].
const MAX_DEVICE_INDEX: u32 = 16;

/// Longest wait for a buffer before a stalled device is given up on.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied opening {0}")]
    PermissionDenied(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported by {0}")]
    CaptureNotSupported(String),
    #[error("no frame from {device} within {timeout:?}")]
    Stalled { device: String, timeout: Duration },
    #[error("frame conversion failed: {0}")]
    Convert(#[from] frame::FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and request
    /// `width`×`height`. The driver may settle on a different size.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported(device_path.to_string()));
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Capture a single RGB frame.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.open_stream()?;
        self.next_frame(&mut stream)
    }

    /// Stream frames into `on_frame` until it returns `false`.
    ///
    /// Frames that fail to convert are skipped; a dequeue failure or a device
    /// silent for [`DEQUEUE_TIMEOUT`] ends the stream with an error.
    pub fn stream<F>(&self, mut on_frame: F) -> Result<(), CameraError>
    where
        F: FnMut(Frame) -> bool,
    {
        let mut stream = self.open_stream()?;
        loop {
            let frame = match self.next_frame(&mut stream) {
                Ok(frame) => frame,
                Err(CameraError::Convert(e)) => {
                    tracing::debug!(error = %e, "skipping unreadable frame");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !on_frame(frame) {
                return Ok(());
            }
        }
    }

    fn open_stream(&self) -> Result<MmapStream<'_>, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        Ok(stream)
    }

    fn next_frame(&self, stream: &mut MmapStream<'_>) -> Result<Frame, CameraError> {
        let (buf, meta) = stream.next().map_err(|e| dequeue_error(&self.device_path, e))?;
        let sequence = meta.sequence;

        let data = self.buf_to_rgb(buf)?;

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, frame::FrameError> {
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height),
        }
    }
}

fn open_error(device_path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(device_path.to_string()),
        io::ErrorKind::NotFound => CameraError::DeviceNotFound(device_path.to_string()),
        _ if e.raw_os_error() == Some(EBUSY) || e.to_string().contains("busy") => {
            CameraError::DeviceBusy(device_path.to_string())
        }
        _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
    }
}

const EBUSY: i32 = 16;

fn dequeue_error(device_path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::TimedOut => CameraError::Stalled {
            device: device_path.to_string(),
            timeout: DEQUEUE_TIMEOUT,
        },
        _ => CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")),
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..MAX_DEVICE_INDEX {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}
