#[cfg(any(feature = "native-camera", test))]
mod device_thread;
#[cfg(feature = "native-camera")]
pub mod native;
#[cfg(feature = "snapshot")]
pub mod snapshot;
pub mod synthetic;

use labellens_common::config::{CameraBackend, CameraConfig};
use labellens_common::frame::Frame;

pub use synthetic::SyntheticSource;

/// A capture device that hands out raw frames on demand.
///
/// While open, a source holds the OS-level handle to its device exclusively.
/// The session shares one source between the caller's thread and the capture
/// thread behind a mutex, hence `Send`.
pub trait FrameSource: Send {
    /// Acquire the device at `device_index`.
    fn open(&mut self, device_index: u32) -> Result<(), SourceError>;

    /// Pull the next frame, blocking for at most one device read timeout.
    /// `None` means no frame was available this time, which is not an error.
    fn read(&mut self) -> Option<Frame>;

    fn is_open(&self) -> bool;

    /// Give the device back. Safe to call when not open.
    fn release(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("device {index} could not be opened: {reason}")]
    Open { index: u32, reason: String },
    #[error("device {0} is held by another source")]
    Busy(u32),
    #[error("source is already open")]
    AlreadyOpen,
    #[error("camera backend {0:?} is not compiled into this build")]
    Unsupported(CameraBackend),
}

/// Build the frame source selected by `config.backend`.
pub fn from_config(config: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
    match config.backend {
        CameraBackend::Synthetic => Ok(Box::new(SyntheticSource::from_config(config))),
        #[cfg(feature = "snapshot")]
        CameraBackend::Snapshot => Ok(Box::new(snapshot::SnapshotSource::from_config(config))),
        #[cfg(feature = "native-camera")]
        CameraBackend::Native => Ok(Box::new(native::NativeCamera::from_config(config))),
        #[allow(unreachable_patterns)]
        other => Err(SourceError::Unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_backend_always_available() {
        let config = CameraConfig {
            backend: CameraBackend::Synthetic,
            ..CameraConfig::default()
        };
        let source = from_config(&config).unwrap();
        assert_eq!(source.name(), "synthetic");
        assert!(!source.is_open());
    }

    #[cfg(not(feature = "native-camera"))]
    #[test]
    fn native_backend_reports_unsupported_when_not_compiled() {
        let config = CameraConfig::default();
        let err = from_config(&config).err().unwrap();
        assert!(matches!(err, SourceError::Unsupported(CameraBackend::Native)));
    }
}
