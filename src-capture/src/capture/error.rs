//! Error types for frame acquisition.

/// Error raised by a [`super::FrameSource`].
#[derive(Debug)]
pub enum CaptureError {
    /// The device stopped delivering frames and cannot recover
    DeviceLost(String),
    /// The device delivered a frame whose size does not match the stream
    FrameSize {
        stream: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::DeviceLost(msg) => write!(f, "Camera lost: {}", msg),
            CaptureError::FrameSize {
                stream,
                expected,
                actual,
            } => write!(
                f,
                "{} frame has {} samples, expected {}",
                stream, actual, expected
            ),
        }
    }
}

impl std::error::Error for CaptureError {}
