use std::time::Duration;

use labellens_common::config::CameraConfig;
use labellens_common::frame::{Frame, PixelLayout};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use tracing::{error, info, warn};

use super::device_thread::{Device, DeviceThread};
use super::{FrameSource, SourceError};

/// Platform camera through `nokhwa`.
///
/// The OS handle never leaves its dedicated device thread, which keeps this
/// type `Send` regardless of what the platform backend allows.
pub struct NativeCamera {
    width: u32,
    height: u32,
    fps: u32,
    read_timeout: Duration,
    device: Option<DeviceThread>,
}

impl NativeCamera {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps.round().max(1.0) as u32,
            read_timeout: config.read_timeout(),
            device: None,
        }
    }
}

struct NokhwaDevice {
    camera: Camera,
}

impl NokhwaDevice {
    fn open(index: u32, width: u32, height: u32, fps: u32) -> Result<Self, String> {
        let wanted = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));
        let mut camera =
            Camera::new(CameraIndex::Index(index), requested).map_err(|e| e.to_string())?;
        camera.open_stream().map_err(|e| e.to_string())?;
        Ok(Self { camera })
    }
}

impl Device for NokhwaDevice {
    fn grab(&mut self, seq: u64) -> Option<Frame> {
        let buffer = match self.camera.frame() {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "camera read failed");
                return None;
            }
        };
        let rgb = match buffer.decode_image::<RgbFormat>() {
            Ok(img) => img,
            Err(e) => {
                warn!(error = %e, "camera frame could not be decoded");
                return None;
            }
        };
        let (width, height) = (rgb.width(), rgb.height());
        Frame::new(PixelLayout::Rgb, width, height, rgb.into_raw(), seq)
            .map_err(|e| warn!(error = %e, "camera frame rejected"))
            .ok()
    }

    fn close(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!(error = %e, "failed to stop camera stream");
        }
    }
}

impl FrameSource for NativeCamera {
    fn open(&mut self, device_index: u32) -> Result<(), SourceError> {
        if self.device.is_some() {
            return Err(SourceError::AlreadyOpen);
        }

        let (width, height, fps) = (self.width, self.height, self.fps);
        let device = DeviceThread::spawn(
            format!("labellens-camera-{device_index}"),
            self.read_timeout,
            move || NokhwaDevice::open(device_index, width, height, fps),
        )
        .map_err(|reason| {
            error!(device_index, reason = %reason, "camera open failed");
            SourceError::Open {
                index: device_index,
                reason,
            }
        })?;

        info!(device_index, width, height, fps, "camera opened");
        self.device = Some(device);
        Ok(())
    }

    fn read(&mut self) -> Option<Frame> {
        self.device.as_mut()?.read()
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn release(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        if device.release() {
            info!("camera released");
        }
    }

    fn name(&self) -> &str {
        "native"
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.release();
    }
}
