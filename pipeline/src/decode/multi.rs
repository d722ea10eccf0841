use std::panic::{self, AssertUnwindSafe};

use labellens_common::frame::DecodeBuffer;
use rxing::Exceptions;
use tracing::{debug, warn};

use super::{malformed, DecodeOutcome, Decoder};

/// Retail barcodes and 2D symbols through `rxing`, the Rust port of ZXing's
/// multi-format reader: EAN-13/8, UPC-A/E, Code 128/39/93, Codabar, ITF,
/// QR Code, Data Matrix, Aztec and PDF417.
#[derive(Debug, Default)]
pub struct MultiFormatDecoder;

impl MultiFormatDecoder {
    pub fn new() -> Self {
        Self
    }

    fn scan(buffer: &DecodeBuffer) -> DecodeOutcome {
        let luma = buffer.luma().to_vec();
        match rxing::helpers::detect_in_luma(luma, buffer.width(), buffer.height(), None) {
            Ok(result) => {
                debug!(
                    seq = buffer.seq,
                    format = ?result.getBarcodeFormat(),
                    "symbol decoded"
                );
                DecodeOutcome::Decoded {
                    text: result.getText().to_string(),
                }
            }
            Err(
                Exceptions::NotFoundException(_)
                | Exceptions::ChecksumException(_)
                | Exceptions::FormatException(_),
            ) => DecodeOutcome::NotFound,
            Err(e) => {
                warn!(seq = buffer.seq, error = %e, "multi-format reader failed");
                DecodeOutcome::error(e.to_string())
            }
        }
    }
}

impl Decoder for MultiFormatDecoder {
    fn decode(&self, buffer: &DecodeBuffer) -> DecodeOutcome {
        if !buffer.is_well_formed() {
            return malformed(buffer);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| Self::scan(buffer))) {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(seq = buffer.seq, "multi-format decoder panicked");
                DecodeOutcome::error("decoder fault")
            }
        }
    }

    fn name(&self) -> &str {
        "multi-format"
    }
}
