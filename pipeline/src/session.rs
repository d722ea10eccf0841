use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use labellens_common::config::CameraConfig;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::convert;
use crate::decode::{DecodeOutcome, Decoder};
use crate::sink::DisplaySink;
use crate::source::FrameSource;

/// One-shot stop flag shared by the session (writer) and its capture thread
/// (reader). Release/acquire ordering makes everything the session did
/// before `cancel` visible to the thread once it observes the flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub device_index: u32,
    /// Pause after a read that produced nothing.
    pub idle_backoff: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            device_index: config.device_index,
            idle_backoff: config.idle_backoff(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device_index: 0,
            idle_backoff: Duration::from_millis(20),
        }
    }
}

/// Counters updated by the capture thread.
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_delivered: AtomicU64,
    frames_missed: AtomicU64,
    last_seq: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub frames_delivered: u64,
    pub frames_missed: u64,
    pub last_seq: Option<u64>,
}

impl SessionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let delivered = self.frames_delivered.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_delivered: delivered,
            frames_missed: self.frames_missed.load(Ordering::Relaxed),
            last_seq: (delivered > 0).then(|| self.last_seq.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture session is already running")]
    AlreadyRunning,
    #[error("capture session is not running")]
    NotRunning,
    #[error("failed to start capture thread: {0}")]
    Spawn(String),
}

type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

struct Worker {
    stop: StopSignal,
    handle: JoinHandle<()>,
}

enum State {
    Idle,
    Running(Worker),
}

/// Owner of the capture device and the background polling loop.
///
/// `start`, `stop` and `scan_once` run on the caller's thread. While running,
/// one capture thread reads frames, converts them and hands display images to
/// the sink in capture order. The device handle is the only state the two
/// threads share besides the stop signal; both go through `device`'s mutex,
/// which also serializes `scan_once` against the loop's reads.
pub struct CaptureSession {
    device: SharedSource,
    decoder: Box<dyn Decoder>,
    sink: Arc<dyn DisplaySink>,
    /// Held while handing an image to the sink and while clearing it, so no
    /// image from a stopped generation lands after its clear.
    delivery: Arc<Mutex<()>>,
    stats: Arc<SessionStats>,
    options: SessionOptions,
    state: State,
    /// Cancelled worker from the last `stop`, joined by the next `start`.
    retired: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(
        source: Box<dyn FrameSource>,
        decoder: Box<dyn Decoder>,
        sink: Arc<dyn DisplaySink>,
        options: SessionOptions,
    ) -> Self {
        Self {
            device: Arc::new(Mutex::new(source)),
            decoder,
            sink,
            delivery: Arc::new(Mutex::new(())),
            stats: Arc::new(SessionStats::default()),
            options,
            state: State::Idle,
            retired: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Idle => SessionState::Idle,
            State::Running(_) => SessionState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Open the device and launch the capture thread.
    ///
    /// Rejected without side effects when already running. If the device
    /// cannot be opened the session stays idle and no thread is created.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.is_running() {
            warn!("start requested while running, ignoring");
            return Err(SessionError::AlreadyRunning);
        }
        self.reap_retired();

        let device_index = self.options.device_index;
        let source_name = {
            let mut device = self.device.lock();
            if let Err(e) = device.open(device_index) {
                error!(device_index, source = device.name(), error = %e, "failed to open capture device");
                return Err(SessionError::DeviceUnavailable(e.to_string()));
            }
            device.name().to_string()
        };

        let stop = StopSignal::new();
        let capture = CaptureLoop {
            device: Arc::clone(&self.device),
            sink: Arc::clone(&self.sink),
            delivery: Arc::clone(&self.delivery),
            stats: Arc::clone(&self.stats),
            stop: stop.clone(),
            idle_backoff: self.options.idle_backoff,
        };
        let spawned = thread::Builder::new()
            .name("labellens-capture".into())
            .spawn(move || capture.run());

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "failed to spawn capture thread, releasing device");
                self.device.lock().release();
                return Err(SessionError::Spawn(e.to_string()));
            }
        };

        self.state = State::Running(Worker { stop, handle });
        info!(device_index, source = source_name, "capture session IDLE→RUNNING");
        Ok(())
    }

    /// Cancel the capture thread, release the device and clear the display.
    ///
    /// Does not wait for the thread to exit; the device is released before
    /// returning. A no-op when idle.
    pub fn stop(&mut self) {
        let State::Running(worker) = mem::replace(&mut self.state, State::Idle) else {
            debug!("stop requested while idle, nothing to do");
            return;
        };

        worker.stop.cancel();
        // Waits out at most one in-flight read.
        self.device.lock().release();
        {
            let _gate = self.delivery.lock();
            self.sink.on_cleared();
        }
        self.retired = Some(worker.handle);

        let stats = self.stats.snapshot();
        info!(
            frames_delivered = stats.frames_delivered,
            frames_missed = stats.frames_missed,
            "capture session RUNNING→IDLE"
        );
    }

    /// Pull one frame outside the polling cadence and try to decode it.
    pub fn scan_once(&self) -> Result<DecodeOutcome, SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }

        let frame = {
            let mut device = self.device.lock();
            if device.is_open() {
                device.read()
            } else {
                None
            }
        };
        let Some(frame) = frame else {
            warn!("scan requested but no frame was available");
            return Ok(DecodeOutcome::error("no frame available"));
        };

        let seq = frame.seq();
        let buffer = convert::to_decode_buffer(&frame);
        drop(frame);
        let outcome = self.decoder.decode(&buffer);

        match &outcome {
            DecodeOutcome::Decoded { text } => {
                info!(seq, decoder = self.decoder.name(), text, "symbol decoded")
            }
            DecodeOutcome::NotFound => info!(seq, decoder = self.decoder.name(), "no symbol in frame"),
            DecodeOutcome::DecodeError { message } => {
                warn!(seq, decoder = self.decoder.name(), message, "decode failed")
            }
        }
        Ok(outcome)
    }

    /// Application teardown. Same as `stop`, safe in any state, never waits
    /// on the capture thread.
    pub fn shutdown(&mut self) {
        self.stop();
        // Detach whatever is left; it has been cancelled and holds no device.
        self.retired = None;
    }

    fn reap_retired(&mut self) {
        if let Some(handle) = self.retired.take() {
            if handle.join().is_err() {
                warn!("previous capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Capture thread
// =============================================================================

struct CaptureLoop {
    device: SharedSource,
    sink: Arc<dyn DisplaySink>,
    delivery: Arc<Mutex<()>>,
    stats: Arc<SessionStats>,
    stop: StopSignal,
    idle_backoff: Duration,
}

impl CaptureLoop {
    fn run(self) {
        debug!("capture loop started");
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let frame = {
                let mut device = self.device.lock();
                // Re-check under the lock: `stop` may have released the
                // device while this thread was waiting for it.
                if self.stop.is_cancelled() || !device.is_open() {
                    break;
                }
                device.read()
            };

            let Some(frame) = frame else {
                self.stats.frames_missed.fetch_add(1, Ordering::Relaxed);
                debug!("no frame from device, skipping iteration");
                thread::sleep(self.idle_backoff);
                continue;
            };

            let display = convert::to_display_image(&frame);
            let seq = frame.seq();
            drop(frame);

            let _gate = self.delivery.lock();
            if self.stop.is_cancelled() {
                break;
            }
            self.sink.on_display_image(display);
            self.stats.last_seq.store(seq, Ordering::Relaxed);
            self.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
        }
        debug!("capture loop exited");
    }
}
