use std::collections::BTreeSet;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use labellens_common::config::CameraConfig;
use labellens_common::frame::{Frame, PixelLayout};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{FrameSource, SourceError};

/// Device indices currently held by a synthetic source in this process.
/// Mirrors the exclusivity a real camera driver enforces.
static CLAIMED: Mutex<BTreeSet<u32>> = parking_lot::const_mutex(BTreeSet::new());

enum Pattern {
    Gradient { width: u32, height: u32 },
    Still(RgbImage),
    File(PathBuf),
}

/// In-process frame source serving a still image or a generated gradient.
///
/// Frames are emitted in BGR, the layout most capture devices hand out, and
/// paced to the configured frame interval.
pub struct SyntheticSource {
    pattern: Pattern,
    interval: Duration,
    /// BGR bytes of the current pattern, rendered on open.
    rendered: Option<(u32, u32, Vec<u8>)>,
    claimed: Option<u32>,
    next_due: Option<Instant>,
    seq: u64,
}

impl SyntheticSource {
    pub fn from_config(config: &CameraConfig) -> Self {
        let pattern = match &config.image_path {
            Some(path) => Pattern::File(PathBuf::from(path)),
            None => Pattern::Gradient {
                width: config.width,
                height: config.height,
            },
        };
        Self::with_pattern(pattern, config.frame_interval())
    }

    pub fn gradient(width: u32, height: u32, interval: Duration) -> Self {
        Self::with_pattern(Pattern::Gradient { width, height }, interval)
    }

    pub fn still(image: RgbImage, interval: Duration) -> Self {
        Self::with_pattern(Pattern::Still(image), interval)
    }

    fn with_pattern(pattern: Pattern, interval: Duration) -> Self {
        Self {
            pattern,
            interval,
            rendered: None,
            claimed: None,
            next_due: None,
            seq: 0,
        }
    }

    fn render(&self) -> Result<RgbImage, String> {
        match &self.pattern {
            Pattern::Gradient { width, height } => Ok(gradient_image(*width, *height)),
            Pattern::Still(image) => Ok(image.clone()),
            Pattern::File(path) => image::open(path)
                .map(|img| img.to_rgb8())
                .map_err(|e| format!("failed to load {}: {e}", path.display())),
        }
    }

    fn pace(&mut self) {
        if self.interval.is_zero() {
            return;
        }
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, device_index: u32) -> Result<(), SourceError> {
        if self.claimed.is_some() {
            return Err(SourceError::AlreadyOpen);
        }
        if !CLAIMED.lock().insert(device_index) {
            warn!(device_index, "synthetic device already claimed");
            return Err(SourceError::Busy(device_index));
        }

        let image = match self.render() {
            Ok(image) => image,
            Err(reason) => {
                CLAIMED.lock().remove(&device_index);
                return Err(SourceError::Open {
                    index: device_index,
                    reason,
                });
            }
        };
        let (width, height) = image.dimensions();
        let bgr: Vec<u8> = image
            .into_raw()
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();

        self.rendered = Some((width, height, bgr));
        self.claimed = Some(device_index);
        self.next_due = None;
        info!(device_index, width, height, "synthetic source opened");
        Ok(())
    }

    fn read(&mut self) -> Option<Frame> {
        if self.rendered.is_none() {
            return None;
        }
        self.pace();
        let (width, height, bgr) = self.rendered.as_ref()?;
        let seq = self.seq;
        self.seq += 1;
        match Frame::new(PixelLayout::Bgr, *width, *height, bgr.clone(), seq) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "synthetic frame rejected");
                None
            }
        }
    }

    fn is_open(&self) -> bool {
        self.claimed.is_some()
    }

    fn release(&mut self) {
        if let Some(index) = self.claimed.take() {
            CLAIMED.lock().remove(&index);
            self.rendered = None;
            debug!(device_index = index, "synthetic source released");
        }
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Smooth diagonal gradient. Contains no finder patterns, so decoders see
/// nothing in it.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = ((x + y) * 255 / (width + height).max(1)) as u8;
        image::Rgb([r, g, b])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Indices are unique per test: the claim table is process-wide and tests
    // run in parallel.

    #[test]
    fn open_read_release() {
        let mut source = SyntheticSource::gradient(8, 4, Duration::ZERO);
        assert!(!source.is_open());
        assert!(source.read().is_none());

        source.open(101).unwrap();
        assert!(source.is_open());

        let first = source.read().unwrap();
        let second = source.read().unwrap();
        assert_eq!(first.layout(), PixelLayout::Bgr);
        assert_eq!((first.width(), first.height()), (8, 4));
        assert_eq!(first.data().len(), 8 * 4 * 3);
        assert!(second.seq() > first.seq());

        source.release();
        assert!(!source.is_open());
        assert!(source.read().is_none());
        source.release();
    }

    #[test]
    fn index_is_exclusive_until_released() {
        let mut a = SyntheticSource::gradient(4, 4, Duration::ZERO);
        let mut b = SyntheticSource::gradient(4, 4, Duration::ZERO);
        a.open(102).unwrap();
        assert!(matches!(b.open(102), Err(SourceError::Busy(102))));
        a.release();
        b.open(102).unwrap();
        assert!(matches!(b.open(102), Err(SourceError::AlreadyOpen)));
    }

    #[test]
    fn drop_releases_claim() {
        {
            let mut a = SyntheticSource::gradient(4, 4, Duration::ZERO);
            a.open(103).unwrap();
        }
        let mut b = SyntheticSource::gradient(4, 4, Duration::ZERO);
        b.open(103).unwrap();
    }

    #[test]
    fn still_image_is_emitted_as_bgr() {
        let image = RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));
        let mut source = SyntheticSource::still(image, Duration::ZERO);
        source.open(104).unwrap();
        let frame = source.read().unwrap();
        assert_eq!(&frame.data()[..3], &[30, 20, 10]);
    }

    #[test]
    fn missing_image_file_fails_open_and_frees_index() {
        let config = CameraConfig {
            image_path: Some("/nonexistent/label.png".into()),
            ..CameraConfig::default()
        };
        let mut source = SyntheticSource::from_config(&config);
        let err = source.open(105).unwrap_err();
        assert!(matches!(err, SourceError::Open { index: 105, .. }));
        assert!(!source.is_open());

        let mut other = SyntheticSource::gradient(4, 4, Duration::ZERO);
        other.open(105).unwrap();
    }

    #[test]
    fn reads_are_paced() {
        let mut source = SyntheticSource::gradient(4, 4, Duration::from_millis(30));
        source.open(106).unwrap();
        let start = Instant::now();
        for _ in 0..3 {
            source.read().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
