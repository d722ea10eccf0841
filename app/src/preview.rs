use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use labellens_common::frame::DisplayImage;
use labellens_pipeline::DisplayEvent;
use parking_lot::Mutex;
use tracing::{debug, info};

/// The image currently "on screen". Each new preview supersedes the last.
#[derive(Default)]
pub struct PreviewSlot {
    latest: Mutex<Option<DisplayImage>>,
}

impl PreviewSlot {
    pub fn latest(&self) -> Option<DisplayImage> {
        self.latest.lock().clone()
    }

    fn apply(&self, event: DisplayEvent) {
        match event {
            DisplayEvent::Image(image) => {
                debug!(seq = image.seq, "preview updated");
                *self.latest.lock() = Some(image);
            }
            DisplayEvent::Cleared => {
                debug!("preview cleared");
                *self.latest.lock() = None;
            }
        }
    }
}

/// Drain the session's hand-off queue into `slot` on a dedicated thread.
/// Exits once every sender is gone.
pub fn spawn_drain(
    rx: Receiver<DisplayEvent>,
    slot: Arc<PreviewSlot>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("labellens-preview".into())
        .spawn(move || {
            for event in rx.iter() {
                slot.apply(event);
            }
            info!("preview queue closed");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use labellens_pipeline::{ChannelSink, DisplaySink};

    fn image(seq: u64) -> DisplayImage {
        DisplayImage {
            image: RgbImage::new(4, 4),
            seq,
            captured_at_ms: 0,
        }
    }

    #[test]
    fn latest_image_wins_and_clear_empties() {
        let slot = PreviewSlot::default();
        slot.apply(DisplayEvent::Image(image(1)));
        slot.apply(DisplayEvent::Image(image(2)));
        assert_eq!(slot.latest().map(|i| i.seq), Some(2));
        slot.apply(DisplayEvent::Cleared);
        assert!(slot.latest().is_none());
    }

    #[test]
    fn drain_thread_follows_sink_and_exits_when_sender_drops() {
        let (sink, rx) = ChannelSink::bounded(4);
        let slot = Arc::new(PreviewSlot::default());
        let handle = spawn_drain(rx, Arc::clone(&slot)).unwrap();

        sink.on_display_image(image(7));
        drop(sink);
        handle.join().unwrap();
        assert_eq!(slot.latest().map(|i| i.seq), Some(7));
    }
}
