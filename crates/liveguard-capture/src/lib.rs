//! liveguard-capture: video sources and the frame capturer.

pub mod capturer;
pub mod source;

pub use capturer::{CaptureError, FrameCapturer, FrameSample};
pub use source::{ImageSequenceSource, SourceError, StillSource, VideoSource};
