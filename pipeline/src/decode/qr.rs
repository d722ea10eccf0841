use std::panic::{self, AssertUnwindSafe};

use labellens_common::frame::DecodeBuffer;
use tracing::{debug, warn};

use super::{malformed, DecodeOutcome, Decoder};

/// QR code decoder backed by `rqrr`.
///
/// Every grid the detector finds is tried in order and the first that
/// decodes wins. A detected grid that fails to decode (blur, glare, a
/// partial symbol) is reported as [`DecodeOutcome::NotFound`]: to the
/// operator an unreadable code and an absent one call for the same action.
#[derive(Debug, Default)]
pub struct QrDecoder;

impl QrDecoder {
    pub fn new() -> Self {
        Self
    }

    fn scan(buffer: &DecodeBuffer) -> DecodeOutcome {
        let width = buffer.width() as usize;
        let height = buffer.height() as usize;
        let luma = buffer.luma();

        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| luma[y * width + x]);
        let grids = prepared.detect_grids();
        if grids.is_empty() {
            return DecodeOutcome::NotFound;
        }

        let candidates = grids.len();
        for (idx, grid) in grids.into_iter().enumerate() {
            match grid.decode() {
                Ok((_meta, text)) => {
                    debug!(
                        seq = buffer.seq,
                        candidate = idx,
                        candidates,
                        "QR symbol decoded"
                    );
                    return DecodeOutcome::Decoded { text };
                }
                Err(e) => {
                    debug!(seq = buffer.seq, candidate = idx, error = ?e, "QR grid failed to decode");
                }
            }
        }
        DecodeOutcome::NotFound
    }
}

impl Decoder for QrDecoder {
    fn decode(&self, buffer: &DecodeBuffer) -> DecodeOutcome {
        if !buffer.is_well_formed() {
            return malformed(buffer);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| Self::scan(buffer))) {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(seq = buffer.seq, "QR decoder panicked");
                DecodeOutcome::error("decoder fault")
            }
        }
    }

    fn name(&self) -> &str {
        "qr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::to_decode_buffer;
    use crate::test_support::{gradient_frame, qr_frame};

    #[test]
    fn decodes_rendered_qr_code() {
        let frame = qr_frame("LABELLENS-0001");
        let outcome = QrDecoder::new().decode(&to_decode_buffer(&frame));
        assert_eq!(
            outcome,
            DecodeOutcome::Decoded {
                text: "LABELLENS-0001".into()
            }
        );
    }

    #[test]
    fn plain_image_is_not_found() {
        let frame = gradient_frame(160, 120, 0);
        let outcome = QrDecoder::new().decode(&to_decode_buffer(&frame));
        assert_eq!(outcome, DecodeOutcome::NotFound);
    }

    #[test]
    fn uniform_white_is_not_found() {
        let buffer = DecodeBuffer::from_raw(64, 64, vec![255; 64 * 64]);
        assert_eq!(QrDecoder::new().decode(&buffer), DecodeOutcome::NotFound);
    }

    #[test]
    fn truncated_buffer_is_decode_error() {
        let buffer = DecodeBuffer::from_raw(64, 64, vec![255; 100]);
        let outcome = QrDecoder::new().decode(&buffer);
        assert!(matches!(outcome, DecodeOutcome::DecodeError { .. }));
    }

    #[test]
    fn empty_buffer_is_decode_error() {
        let buffer = DecodeBuffer::from_raw(0, 0, vec![]);
        let outcome = QrDecoder::new().decode(&buffer);
        assert!(matches!(outcome, DecodeOutcome::DecodeError { .. }));
    }
}
