use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use labellens_common::frame::DisplayImage;
use tracing::{debug, warn};

/// Receiver of display images produced by the capture loop.
///
/// Called from the capture thread. Implementations must return promptly
/// and marshal onto their own update mechanism; the session only promises
/// in-order delivery, not the thread it happens on.
pub trait DisplaySink: Send + Sync {
    fn on_display_image(&self, image: DisplayImage);

    /// The session stopped; whatever is on screen should be cleared.
    fn on_cleared(&self);
}

#[derive(Debug)]
pub enum DisplayEvent {
    Image(DisplayImage),
    Cleared,
}

/// Ordered hand-off queue between the capture thread and the presentation side.
///
/// Images are dropped rather than queued once `depth` events are pending, so
/// a slow consumer sees frame drops but never reordering, and the capture
/// loop never blocks on it. One extra slot is kept free for `Cleared`.
pub struct ChannelSink {
    tx: Sender<DisplayEvent>,
    depth: usize,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn bounded(depth: usize) -> (Self, Receiver<DisplayEvent>) {
        let depth = depth.max(1);
        let (tx, rx) = crossbeam_channel::bounded(depth + 1);
        let sink = Self {
            tx,
            depth,
            dropped: AtomicU64::new(0),
        };
        (sink, rx)
    }

    /// Images discarded because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DisplaySink for ChannelSink {
    fn on_display_image(&self, image: DisplayImage) {
        if self.tx.len() >= self.depth {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(seq = image.seq, dropped, "preview queue full, dropping frame");
            return;
        }
        match self.tx.try_send(DisplayEvent::Image(image)) {
            Ok(()) => {}
            Err(TrySendError::Full(DisplayEvent::Image(image))) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(seq = image.seq, "preview queue full, dropping frame");
            }
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!("preview receiver gone, discarding frame");
            }
        }
    }

    fn on_cleared(&self) {
        if let Err(e) = self.tx.try_send(DisplayEvent::Cleared) {
            warn!(error = %e, "failed to queue preview clear");
        }
    }
}
