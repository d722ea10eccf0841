use image::{GrayImage, RgbImage};
use labellens_common::frame::{DecodeBuffer, DisplayImage, Frame, PixelLayout};

/// Reorder a frame's pixels into packed RGB, dropping alpha and expanding gray.
///
/// Width, height and pixel count are preserved exactly. `Frame` validates its
/// buffer length on construction, so a size disagreement here is a broken
/// invariant rather than bad input.
pub fn to_rgb(frame: &Frame) -> RgbImage {
    let data = frame.data();
    let rgb: Vec<u8> = match frame.layout() {
        PixelLayout::Rgb => data.to_vec(),
        PixelLayout::Bgr => data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelLayout::Rgba => data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelLayout::Bgra => data
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelLayout::Gray => data.iter().flat_map(|&v| [v, v, v]).collect(),
    };
    RgbImage::from_raw(frame.width(), frame.height(), rgb)
        .expect("frame buffer length is validated at construction")
}

pub fn to_display_image(frame: &Frame) -> DisplayImage {
    DisplayImage {
        image: to_rgb(frame),
        seq: frame.seq(),
        captured_at_ms: frame.captured_at_ms(),
    }
}

/// Luminance grid for the decoder. Gray frames pass through untouched.
pub fn to_decode_buffer(frame: &Frame) -> DecodeBuffer {
    let gray = match frame.layout() {
        PixelLayout::Gray => GrayImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .expect("frame buffer length is validated at construction"),
        _ => image::imageops::grayscale(&to_rgb(frame)),
    };
    DecodeBuffer::from_gray(gray, frame.seq())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(layout: PixelLayout, width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame::new(layout, width, height, data, 3).unwrap()
    }

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let f = frame(PixelLayout::Bgr, 2, 1, vec![1, 2, 3, 4, 5, 6]);
        let rgb = to_rgb(&f);
        assert_eq!(rgb.into_raw(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn alpha_is_dropped() {
        let f = frame(PixelLayout::Bgra, 1, 2, vec![10, 20, 30, 255, 40, 50, 60, 0]);
        assert_eq!(to_rgb(&f).into_raw(), vec![30, 20, 10, 60, 50, 40]);

        let f = frame(PixelLayout::Rgba, 1, 1, vec![10, 20, 30, 128]);
        assert_eq!(to_rgb(&f).into_raw(), vec![10, 20, 30]);
    }

    #[test]
    fn gray_expands_for_display_and_passes_through_for_decode() {
        let f = frame(PixelLayout::Gray, 3, 1, vec![0, 128, 255]);
        assert_eq!(
            to_rgb(&f).into_raw(),
            vec![0, 0, 0, 128, 128, 128, 255, 255, 255]
        );
        assert_eq!(to_decode_buffer(&f).luma(), &[0, 128, 255]);
    }

    #[test]
    fn pixel_counts_match_across_outputs() {
        let (w, h) = (37, 23);
        for layout in [
            PixelLayout::Bgr,
            PixelLayout::Rgb,
            PixelLayout::Bgra,
            PixelLayout::Rgba,
            PixelLayout::Gray,
        ] {
            let len = w as usize * h as usize * layout.channels();
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let f = frame(layout, w, h, data);

            let display = to_display_image(&f);
            let buffer = to_decode_buffer(&f);

            assert_eq!(display.width(), w);
            assert_eq!(display.height(), h);
            assert_eq!(display.image.as_raw().len(), f.pixel_count() * 3);
            assert_eq!(buffer.luma().len(), f.pixel_count());
            assert!(buffer.is_well_formed());
            assert_eq!(display.seq, f.seq());
            assert_eq!(buffer.seq, f.seq());
        }
    }

    #[test]
    fn white_and_black_survive_luma_conversion() {
        let f = frame(PixelLayout::Bgr, 2, 1, vec![255, 255, 255, 0, 0, 0]);
        let buffer = to_decode_buffer(&f);
        assert_eq!(buffer.luma(), &[255, 0]);
    }
}
