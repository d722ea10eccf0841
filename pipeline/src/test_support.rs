//! Rendered symbols and a scripted device, shared with downstream tests
//! through the `test-util` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{GrayImage, Luma, RgbImage};
use labellens_common::frame::{Frame, PixelLayout};

use crate::source::synthetic::gradient_image;
use crate::source::{FrameSource, SourceError};

/// Render `text` as a QR code on a white canvas, as an RGB image.
pub fn qr_image(text: &str) -> RgbImage {
    let code = qrcode::QrCode::new(text.as_bytes()).unwrap();
    let symbol: GrayImage = code
        .render::<Luma<u8>>()
        .module_dimensions(6, 6)
        .quiet_zone(true)
        .build();

    // Put the symbol off-centre on a larger canvas, like a label held up to a camera.
    let (sw, sh) = symbol.dimensions();
    let mut canvas = RgbImage::from_pixel(sw + 80, sh + 60, image::Rgb([255, 255, 255]));
    for (x, y, px) in symbol.enumerate_pixels() {
        let v = px.0[0];
        canvas.put_pixel(x + 50, y + 20, image::Rgb([v, v, v]));
    }
    canvas
}

/// A BGR frame showing a QR code for `text`.
pub fn qr_frame(text: &str) -> Frame {
    bgr_frame(&qr_image(text), 0)
}

const EAN_L: [&str; 10] = [
    "0001101", "0011001", "0010011", "0111101", "0100011", "0110001", "0101111", "0111011",
    "0110111", "0001011",
];
/// Left-half parity per leading digit.
const EAN_PARITY: [&str; 10] = [
    "LLLLLL", "LLGLGG", "LLGGLG", "LLGGGL", "LGLLGG", "LGGLLG", "LGGGLL", "LGLGLG", "LGLGGL",
    "LGGLGL",
];

/// The 95 modules of an EAN-13 symbol, `true` for a bar.
fn ean13_modules(digits: &str) -> Vec<bool> {
    let d: Vec<usize> = digits.bytes().map(|b| (b - b'0') as usize).collect();
    assert_eq!(d.len(), 13, "EAN-13 needs 13 digits");

    let l = |n: usize| -> Vec<bool> { EAN_L[n].bytes().map(|b| b == b'1').collect() };
    let r = |n: usize| -> Vec<bool> { l(n).into_iter().map(|m| !m).collect() };
    let g = |n: usize| -> Vec<bool> { r(n).into_iter().rev().collect() };

    let mut modules = vec![true, false, true];
    for (i, &n) in d[1..7].iter().enumerate() {
        if EAN_PARITY[d[0]].as_bytes()[i] == b'L' {
            modules.extend(l(n));
        } else {
            modules.extend(g(n));
        }
    }
    modules.extend([false, true, false, true, false]);
    for &n in &d[7..] {
        modules.extend(r(n));
    }
    modules.extend([true, false, true]);
    modules
}

/// Render a 13-digit EAN-13 (check digit included) at 3 px per module with
/// quiet zones, as an RGB image.
pub fn ean13_image(digits: &str) -> RgbImage {
    const MODULE: u32 = 3;
    const QUIET: u32 = 12;
    const BAR_HEIGHT: u32 = 90;
    const MARGIN: u32 = 20;

    let modules = ean13_modules(digits);
    let width = (modules.len() as u32 + 2 * QUIET) * MODULE;
    let mut canvas = RgbImage::from_pixel(width, BAR_HEIGHT + 2 * MARGIN, image::Rgb([255, 255, 255]));
    for (i, &bar) in modules.iter().enumerate() {
        if !bar {
            continue;
        }
        let x0 = (QUIET + i as u32) * MODULE;
        for x in x0..x0 + MODULE {
            for y in MARGIN..MARGIN + BAR_HEIGHT {
                canvas.put_pixel(x, y, image::Rgb([0, 0, 0]));
            }
        }
    }
    canvas
}

/// A BGR frame showing an EAN-13 barcode.
pub fn ean13_frame(digits: &str) -> Frame {
    bgr_frame(&ean13_image(digits), 0)
}

pub fn gradient_frame(width: u32, height: u32, seq: u64) -> Frame {
    bgr_frame(&gradient_image(width, height), seq)
}

fn bgr_frame(rgb: &RgbImage, seq: u64) -> Frame {
    let (w, h) = rgb.dimensions();
    let bgr: Vec<u8> = rgb
        .as_raw()
        .chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect();
    Frame::new(PixelLayout::Bgr, w, h, bgr, seq).unwrap()
}

/// Observable device state shared between a [`ScriptedSource`] and its test.
#[derive(Default)]
pub struct DeviceProbe {
    pub open: AtomicBool,
    pub opens: AtomicUsize,
    pub releases: AtomicUsize,
    pub reads: AtomicUsize,
    pub reads_after_release: AtomicUsize,
    pub fail_open: AtomicBool,
    /// When set, reads return nothing.
    pub starve: AtomicBool,
}

/// Frame source driven by a test: repeats a fallback frame (or nothing) and
/// records every device interaction.
pub struct ScriptedSource {
    probe: Arc<DeviceProbe>,
    fallback: Option<Frame>,
    read_delay: Duration,
    seq: u64,
    is_open: bool,
}

impl ScriptedSource {
    pub fn new(fallback: Option<Frame>) -> (Self, Arc<DeviceProbe>) {
        let probe = Arc::new(DeviceProbe::default());
        let source = Self {
            probe: Arc::clone(&probe),
            fallback,
            read_delay: Duration::from_millis(2),
            seq: 0,
            is_open: false,
        };
        (source, probe)
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self, device_index: u32) -> Result<(), SourceError> {
        if self.is_open {
            return Err(SourceError::AlreadyOpen);
        }
        if self.probe.fail_open.load(Ordering::SeqCst) {
            return Err(SourceError::Open {
                index: device_index,
                reason: "scripted failure".into(),
            });
        }
        self.is_open = true;
        self.probe.open.store(true, Ordering::SeqCst);
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Option<Frame> {
        if !self.is_open {
            self.probe.reads_after_release.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.read_delay);
        if self.probe.starve.load(Ordering::SeqCst) {
            return None;
        }
        let fallback = self.fallback.as_ref()?;
        let seq = self.seq;
        self.seq += 1;
        Frame::new(
            fallback.layout(),
            fallback.width(),
            fallback.height(),
            fallback.data().to_vec(),
            seq,
        )
        .ok()
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn release(&mut self) {
        if self.is_open {
            self.is_open = false;
            self.probe.open.store(false, Ordering::SeqCst);
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
