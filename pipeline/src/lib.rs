//! Camera acquisition and on-demand symbol decoding.
//!
//! A [`session::CaptureSession`] owns one [`source::FrameSource`], runs a
//! background polling loop that converts frames into display images for a
//! [`sink::DisplaySink`], and decodes single frames on request through a
//! [`decode::Decoder`].

pub mod convert;
pub mod decode;
pub mod session;
pub mod sink;
pub mod source;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

pub use decode::{DecodeOutcome, Decoder, DecoderChain};
pub use session::{CaptureSession, SessionError, SessionOptions, SessionState};
pub use sink::{ChannelSink, DisplayEvent, DisplaySink};
pub use source::{FrameSource, SourceError};
