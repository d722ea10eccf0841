//! A capture device that lives on its own thread, driven by request/reply
//! messages.
//!
//! Platform camera handles are often not `Send`, so the handle is created on
//! the device thread and never leaves it. At most one read is in flight: a
//! read that times out leaves its reply pending, and the next read waits on
//! that reply rather than queueing another request.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use labellens_common::frame::Frame;
use tracing::{debug, error, warn};

/// The device-side half: whatever actually talks to the hardware.
pub(crate) trait Device {
    /// Capture one frame stamped with `seq`. `None` on a failed read.
    fn grab(&mut self, seq: u64) -> Option<Frame>;

    /// Stop streaming and drop the OS handle.
    fn close(&mut self);
}

enum Command {
    Read(Sender<Option<Frame>>),
    Release(Sender<()>),
}

pub(crate) struct DeviceThread {
    commands: Sender<Command>,
    in_flight: Option<Receiver<Option<Frame>>>,
    handle: JoinHandle<()>,
    timeout: Duration,
}

impl DeviceThread {
    /// Spawn the device thread and run `open` on it. Returns once the device
    /// is open, or with the reason it could not be.
    pub(crate) fn spawn<D, F>(name: String, timeout: Duration, open: F) -> Result<Self, String>
    where
        D: Device,
        F: FnOnce() -> Result<D, String> + Send + 'static,
    {
        let (opened_tx, opened_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let (commands, command_rx) = crossbeam_channel::bounded::<Command>(1);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || match open() {
                Ok(device) => {
                    let _ = opened_tx.send(Ok(()));
                    run(device, command_rx);
                }
                Err(reason) => {
                    let _ = opened_tx.send(Err(reason));
                }
            })
            .map_err(|e| format!("failed to spawn device thread: {e}"))?;

        let opened = opened_rx
            .recv()
            .unwrap_or_else(|_| Err("device thread exited during open".into()));
        if let Err(reason) = opened {
            let _ = handle.join();
            return Err(reason);
        }

        Ok(Self {
            commands,
            in_flight: None,
            handle,
            timeout,
        })
    }

    /// Wait up to one timeout for a frame.
    pub(crate) fn read(&mut self) -> Option<Frame> {
        let reply = match self.in_flight.take() {
            Some(reply) => reply,
            None => {
                let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
                match self.commands.try_send(Command::Read(reply_tx)) {
                    Ok(()) => reply_rx,
                    Err(TrySendError::Full(_)) => {
                        debug!("device thread busy");
                        return None;
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("device thread is gone");
                        return None;
                    }
                }
            }
        };

        match reply.recv_timeout(self.timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "device read timed out");
                self.in_flight = Some(reply);
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Ask the device thread to close the device, waiting at most one timeout.
    /// Returns `false` if the thread did not confirm in time; it is then
    /// detached and closes the device when its current read returns.
    pub(crate) fn release(self) -> bool {
        let Self {
            commands,
            in_flight,
            handle,
            timeout,
        } = self;
        drop(in_flight);

        let deadline = Instant::now() + timeout;
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let acked = commands
            .send_deadline(Command::Release(ack_tx), deadline)
            .is_ok()
            && ack_rx.recv_deadline(deadline).is_ok();
        drop(commands);

        if !acked {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "device did not confirm release in time, detaching its thread"
            );
            return false;
        }
        if handle.join().is_err() {
            error!("device thread panicked");
        }
        true
    }
}

fn run<D: Device>(mut device: D, commands: Receiver<Command>) {
    let mut seq: u64 = 0;
    for command in commands.iter() {
        match command {
            Command::Read(reply) => {
                let frame = device.grab(seq);
                if frame.is_some() {
                    seq += 1;
                }
                // The caller may have given up on this read.
                let _ = reply.send(frame);
            }
            Command::Release(ack) => {
                device.close();
                let _ = ack.send(());
                return;
            }
        }
    }
    // Owner went away without an explicit release.
    device.close();
}
