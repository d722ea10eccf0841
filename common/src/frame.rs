use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, RgbImage};

/// Byte order of the pixels in a raw [`Frame`].
///
/// Capture devices commonly hand out BGR; the presentation side wants RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Bgr,
    Rgb,
    Bgra,
    Rgba,
    Gray,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Bgr | PixelLayout::Rgb => 3,
            PixelLayout::Bgra | PixelLayout::Rgba => 4,
            PixelLayout::Gray => 1,
        }
    }
}

/// One raw image sample pulled from a capture device.
///
/// Immutable once built. The constructor checks that the buffer length
/// matches `width * height * channels`, so every `Frame` in circulation is
/// well-formed and downstream conversion can rely on it.
#[derive(Debug, Clone)]
pub struct Frame {
    layout: PixelLayout,
    width: u32,
    height: u32,
    data: Vec<u8>,
    seq: u64,
    captured_at_ms: i64,
}

impl Frame {
    /// Build a frame stamped with the current wall-clock time.
    pub fn new(
        layout: PixelLayout,
        width: u32,
        height: u32,
        data: Vec<u8>,
        seq: u64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * layout.channels();
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                got: data.len(),
                expected,
                width,
                height,
                layout,
            });
        }
        Ok(Self {
            layout,
            width,
            height,
            data,
            seq,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn with_captured_at(mut self, captured_at_ms: i64) -> Self {
        self.captured_at_ms = captured_at_ms;
        self
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }
}

/// Presentation-ready RGB image derived from a [`Frame`].
#[derive(Debug, Clone)]
pub struct DisplayImage {
    pub image: RgbImage,
    pub seq: u64,
    pub captured_at_ms: i64,
}

impl DisplayImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// Encode for handing to a renderer that only understands compressed images.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::with_capacity(64 * 1024));
        JpegEncoder::new_with_quality(&mut out, quality).encode_image(&self.image)?;
        Ok(out.into_inner())
    }
}

/// Luminance grid handed to a symbol decoder.
///
/// Built by the frame converter from a [`GrayImage`], which keeps it
/// consistent. [`DecodeBuffer::from_raw`] accepts arbitrary input so callers
/// outside the pipeline can feed a decoder directly; decoders must check
/// [`DecodeBuffer::is_well_formed`] before trusting the dimensions.
#[derive(Debug, Clone)]
pub struct DecodeBuffer {
    width: u32,
    height: u32,
    luma: Vec<u8>,
    pub seq: u64,
}

impl DecodeBuffer {
    pub fn from_gray(image: GrayImage, seq: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            luma: image.into_raw(),
            seq,
        }
    }

    pub fn from_raw(width: u32, height: u32, luma: Vec<u8>) -> Self {
        Self {
            width,
            height,
            luma,
            seq: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.luma.len() == self.pixel_count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame has empty dimensions {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("frame buffer is {got} bytes, expected {expected} for {width}x{height} {layout:?}")]
    LengthMismatch {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
        layout: PixelLayout,
    },
}
