pub mod multi;
pub mod qr;

use labellens_common::frame::DecodeBuffer;
use serde::Serialize;
use tracing::warn;

pub use multi::MultiFormatDecoder;
pub use qr::QrDecoder;

/// Result of one attempt to read a symbol from one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecodeOutcome {
    Decoded { text: String },
    /// No readable symbol in the frame. The common case, not a failure.
    NotFound,
    /// The decoder itself faulted.
    DecodeError { message: String },
}

impl DecodeOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        DecodeOutcome::DecodeError {
            message: message.into(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            DecodeOutcome::Decoded { text } => Some(text),
            _ => None,
        }
    }

    /// Operator-facing phrasing.
    pub fn user_message(&self) -> String {
        match self {
            DecodeOutcome::Decoded { text } => format!("Scanned code: {text}"),
            DecodeOutcome::NotFound => "No code detected in this frame.".into(),
            DecodeOutcome::DecodeError { message } => format!("Scan failed: {message}"),
        }
    }
}

/// Symbol decoder over a luminance grid.
///
/// Implementations look for a single symbol and report only its primary
/// text. They must not panic or return errors out-of-band: every fault is
/// folded into [`DecodeOutcome::DecodeError`].
pub trait Decoder: Send + Sync {
    fn decode(&self, buffer: &DecodeBuffer) -> DecodeOutcome;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Runs decoders in order. The first decode wins; failing that, the first
/// fault is reported; otherwise nothing was found.
pub struct DecoderChain {
    decoders: Vec<Box<dyn Decoder>>,
}

impl DecoderChain {
    pub fn new(decoders: Vec<Box<dyn Decoder>>) -> Self {
        Self { decoders }
    }

    /// `rqrr` first for QR codes, then the multi-format reader for barcodes
    /// and the other 2D symbologies.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(QrDecoder::new()),
            Box::new(MultiFormatDecoder::new()),
        ])
    }
}

impl Decoder for DecoderChain {
    fn decode(&self, buffer: &DecodeBuffer) -> DecodeOutcome {
        let mut fault = None;
        for decoder in &self.decoders {
            match decoder.decode(buffer) {
                decoded @ DecodeOutcome::Decoded { .. } => return decoded,
                DecodeOutcome::NotFound => {}
                error @ DecodeOutcome::DecodeError { .. } => {
                    fault.get_or_insert(error);
                }
            }
        }
        fault.unwrap_or(DecodeOutcome::NotFound)
    }

    fn name(&self) -> &str {
        "chain"
    }
}

fn malformed(buffer: &DecodeBuffer) -> DecodeOutcome {
    warn!(
        width = buffer.width(),
        height = buffer.height(),
        len = buffer.luma().len(),
        "malformed decode buffer"
    );
    DecodeOutcome::error(format!(
        "malformed buffer: {} bytes for {}x{}",
        buffer.luma().len(),
        buffer.width(),
        buffer.height()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::to_decode_buffer;
    use crate::test_support::{ean13_frame, gradient_frame, qr_frame};

    struct Fixed(DecodeOutcome);

    impl Decoder for Fixed {
        fn decode(&self, _: &DecodeBuffer) -> DecodeOutcome {
            self.0.clone()
        }
    }

    fn chain(outcomes: &[DecodeOutcome]) -> DecoderChain {
        DecoderChain::new(
            outcomes
                .iter()
                .cloned()
                .map(|o| Box::new(Fixed(o)) as Box<dyn Decoder>)
                .collect(),
        )
    }

    #[test]
    fn chain_prefers_decoded_over_fault() {
        let buffer = DecodeBuffer::from_raw(1, 1, vec![0]);
        let decoded = DecodeOutcome::Decoded { text: "x".into() };
        let outcome = chain(&[DecodeOutcome::error("boom"), DecodeOutcome::NotFound, decoded.clone()])
            .decode(&buffer);
        assert_eq!(outcome, decoded);
    }

    #[test]
    fn chain_reports_first_fault_when_nothing_decodes() {
        let buffer = DecodeBuffer::from_raw(1, 1, vec![0]);
        let outcome = chain(&[
            DecodeOutcome::NotFound,
            DecodeOutcome::error("first"),
            DecodeOutcome::error("second"),
        ])
        .decode(&buffer);
        assert_eq!(outcome, DecodeOutcome::error("first"));
    }

    #[test]
    fn empty_chain_finds_nothing() {
        let buffer = DecodeBuffer::from_raw(1, 1, vec![0]);
        assert_eq!(chain(&[]).decode(&buffer), DecodeOutcome::NotFound);
    }

    #[test]
    fn standard_chain_reads_qr_and_retail_barcodes() {
        let decoder = DecoderChain::standard();
        let qr = decoder.decode(&to_decode_buffer(&qr_frame("LABELLENS-0003")));
        assert_eq!(qr.text(), Some("LABELLENS-0003"));

        let ean = decoder.decode(&to_decode_buffer(&ean13_frame("4006381333931")));
        assert_eq!(ean.text(), Some("4006381333931"));

        let blank = decoder.decode(&to_decode_buffer(&gradient_frame(160, 120, 0)));
        assert_eq!(blank, DecodeOutcome::NotFound);
    }

    #[test]
    fn user_messages_distinguish_outcomes() {
        assert_eq!(
            DecodeOutcome::Decoded { text: "4006381333931".into() }.user_message(),
            "Scanned code: 4006381333931"
        );
        assert_eq!(
            DecodeOutcome::NotFound.user_message(),
            "No code detected in this frame."
        );
        assert_eq!(
            DecodeOutcome::error("no frame available").user_message(),
            "Scan failed: no frame available"
        );
    }

    #[test]
    fn serializes_with_status_tag() {
        let json = serde_json::to_value(DecodeOutcome::Decoded { text: "abc".into() }).unwrap();
        assert_eq!(json["status"], "decoded");
        assert_eq!(json["text"], "abc");

        let json = serde_json::to_value(DecodeOutcome::NotFound).unwrap();
        assert_eq!(json["status"], "not_found");

        let json = serde_json::to_value(DecodeOutcome::error("boom")).unwrap();
        assert_eq!(json["status"], "decode_error");
        assert_eq!(json["message"], "boom");
    }
}
