use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use labellens_common::config::CameraConfig;
use labellens_common::frame::{Frame, PixelLayout};
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use super::{FrameSource, SourceError};

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Network camera exposing a single-frame JPEG endpoint
/// (`GET {url}?quality=N` → `image/jpeg`).
///
/// The HTTP client is only built on `open`: a blocking client must not be
/// created or dropped on an async runtime thread.
pub struct SnapshotSource {
    url: String,
    quality: u32,
    timeout: Duration,
    client: Option<Client>,
}

impl SnapshotSource {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(&config.snapshot_url, config.snapshot_quality, config.read_timeout())
    }

    pub fn new(url: &str, quality: u32, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            quality,
            timeout,
            client: None,
        }
    }

    fn frame_url(&self) -> String {
        format!("{}?quality={}", self.url, self.quality)
    }

    fn fetch(client: &Client, url: &str) -> Result<Vec<u8>, String> {
        let resp = client.get(url).send().map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP status {}", resp.status().as_u16()));
        }
        resp.bytes().map(|b| b.to_vec()).map_err(|e| e.to_string())
    }
}

impl FrameSource for SnapshotSource {
    fn open(&mut self, device_index: u32) -> Result<(), SourceError> {
        if self.client.is_some() {
            return Err(SourceError::AlreadyOpen);
        }
        let open_err = |reason: String| SourceError::Open {
            index: device_index,
            reason,
        };

        let client = Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()
            .map_err(|e| open_err(e.to_string()))?;

        // Probe once so an unreachable camera fails `open`, not every read.
        let url = self.frame_url();
        Self::fetch(&client, &url).map_err(|reason| {
            warn!(url, reason, "snapshot camera probe failed");
            open_err(reason)
        })?;

        info!(url, device_index, "snapshot camera connected");
        self.client = Some(client);
        Ok(())
    }

    fn read(&mut self) -> Option<Frame> {
        let client = self.client.as_ref()?;
        let url = self.frame_url();
        let jpeg = match Self::fetch(client, &url) {
            Ok(bytes) => bytes,
            Err(reason) => {
                warn!(url, reason, "failed to fetch camera frame");
                return None;
            }
        };

        let rgb = match image::load_from_memory(&jpeg) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                warn!(error = %e, bytes = jpeg.len(), "camera returned undecodable image");
                return None;
            }
        };
        let (width, height) = rgb.dimensions();
        let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!(seq, width, height, bytes = jpeg.len(), "snapshot frame fetched");

        Frame::new(PixelLayout::Rgb, width, height, rgb.into_raw(), seq)
            .map_err(|e| warn!(error = %e, "snapshot frame rejected"))
            .ok()
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn release(&mut self) {
        if self.client.take().is_some() {
            debug!(url = self.url, "snapshot camera released");
        }
    }

    fn name(&self) -> &str {
        "snapshot"
    }
}
