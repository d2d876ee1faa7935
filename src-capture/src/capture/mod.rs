//! Frame acquisition for the capture worker.
//!
//! The camera is reached through the [`FrameSource`] trait so the capture
//! loop can be driven by real hardware, the synthetic source, or a scripted
//! source in tests.

pub mod error;
pub mod synthetic;
pub mod types;

use plotcam_common::{SourceKind, StreamConfig};
use tracing::info;

pub use error::CaptureError;
pub use synthetic::SyntheticSource;
pub use types::{rotate_ccw, ColorFrame, DepthFrame, FramePair};

/// A camera delivering synchronised colour and depth frames.
pub trait FrameSource: Send {
    /// Block until the next frame pair arrives.
    ///
    /// Returns `Ok(None)` when the device delivered an incomplete set
    /// (colour or depth missing); the caller skips the iteration.
    fn next_frame_pair(&mut self) -> Result<Option<FramePair>, CaptureError>;
}

/// Open the frame source of `kind` with the configured stream parameters.
///
/// Returns `None` when no device of that kind is connected.
pub fn open_source(kind: SourceKind, stream: StreamConfig) -> Option<Box<dyn FrameSource>> {
    match kind {
        SourceKind::Synthetic => {
            info!(
                "Opening synthetic source: {}x{} @ {} fps",
                stream.width, stream.height, stream.fps
            );
            Some(Box::new(SyntheticSource::new(stream)))
        }
        SourceKind::Absent => None,
    }
}
