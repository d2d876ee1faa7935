//! Shared types for the capture pipeline.

use serde::{Deserialize, Serialize};

/// Colour frames are BGR8: three bytes per pixel.
pub const COLOR_CHANNELS: u32 = 3;

/// Camera stream parameters, shared by the colour and depth streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sensor width in pixels
    pub width: u32,
    /// Sensor height in pixels
    pub height: u32,
    /// Frames per second requested from the device
    pub fps: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Geometry of one frame as stored in a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl FrameShape {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Shape of a colour frame after `rotation` is applied to a `stream` frame.
    pub fn for_display(stream: &StreamConfig, rotation: Rotation) -> Self {
        let (width, height) = rotation.apply(stream.width, stream.height);
        Self::new(width, height, COLOR_CHANNELS)
    }

    /// Number of bytes one frame occupies.
    pub fn bytes_per_frame(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

/// Orientation transform applied between the sensor and the operator.
///
/// The rig mounts the camera on its side, so frames are turned a quarter turn
/// counter-clockwise by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    /// Frames are used as delivered
    None,
    /// Quarter turn counter-clockwise
    #[default]
    Ccw90,
}

impl Rotation {
    /// Dimensions `(width, height)` after rotation.
    pub fn apply(&self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Rotation::None => (width, height),
            Rotation::Ccw90 => (height, width),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rotation::None => "none",
            Rotation::Ccw90 => "ccw90",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "0" => Some(Rotation::None),
            "ccw90" | "90" => Some(Rotation::Ccw90),
            _ => None,
        }
    }
}

/// Image container used for saved colour captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Windows bitmap, lossless (rig default)
    #[default]
    Bmp,
    /// PNG, lossless
    Png,
    /// JPEG, lossy
    Jpeg,
}

impl ImageFormat {
    /// Get the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Bmp => "bmp",
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bmp" => Some(ImageFormat::Bmp),
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// Which frame source the capture worker should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generated test pattern paced at the configured frame rate
    #[default]
    Synthetic,
    /// No camera attached
    Absent,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Synthetic => "synthetic",
            SourceKind::Absent => "absent",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "synthetic" | "test" => Some(SourceKind::Synthetic),
            "absent" | "none" => Some(SourceKind::Absent),
            _ => None,
        }
    }
}

/// Lifecycle status the capture worker publishes in the shared ring header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum WorkerStatus {
    /// Spawned, device not opened yet
    Starting = 0,
    /// Device open, frames are being published
    Streaming = 1,
    /// Loop ended because streaming was switched off
    Stopped = 2,
    /// No compatible camera was found
    NoDevice = 3,
    /// The camera failed while streaming
    DeviceError = 4,
    /// The control channel could not be set up
    ChannelError = 5,
}

impl WorkerStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(WorkerStatus::Starting),
            1 => Some(WorkerStatus::Streaming),
            2 => Some(WorkerStatus::Stopped),
            3 => Some(WorkerStatus::NoDevice),
            4 => Some(WorkerStatus::DeviceError),
            5 => Some(WorkerStatus::ChannelError),
            _ => None,
        }
    }

    /// Process exit code the worker uses for this terminal status.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerStatus::Starting | WorkerStatus::Streaming | WorkerStatus::Stopped => 0,
            WorkerStatus::NoDevice => 3,
            WorkerStatus::DeviceError => 4,
            WorkerStatus::ChannelError => 5,
        }
    }

    /// Inverse of [`WorkerStatus::exit_code`] for terminal statuses.
    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(WorkerStatus::Stopped),
            3 => Some(WorkerStatus::NoDevice),
            4 => Some(WorkerStatus::DeviceError),
            5 => Some(WorkerStatus::ChannelError),
            _ => None,
        }
    }

    /// Whether the worker has left its loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerStatus::Starting | WorkerStatus::Streaming)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Starting => write!(f, "starting"),
            WorkerStatus::Streaming => write!(f, "streaming"),
            WorkerStatus::Stopped => write!(f, "stopped"),
            WorkerStatus::NoDevice => write!(f, "no camera connected"),
            WorkerStatus::DeviceError => write!(f, "camera error"),
            WorkerStatus::ChannelError => write!(f, "control channel error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_shape_is_rotated() {
        let stream = StreamConfig::default();
        let shape = FrameShape::for_display(&stream, Rotation::Ccw90);
        assert_eq!((shape.width, shape.height, shape.channels), (480, 640, 3));
        assert_eq!(shape.bytes_per_frame(), 480 * 640 * 3);

        let shape = FrameShape::for_display(&stream, Rotation::None);
        assert_eq!((shape.width, shape.height), (640, 480));
    }

    #[test]
    fn test_status_exit_codes_roundtrip() {
        for status in [
            WorkerStatus::Stopped,
            WorkerStatus::NoDevice,
            WorkerStatus::DeviceError,
            WorkerStatus::ChannelError,
        ] {
            assert_eq!(WorkerStatus::from_exit_code(status.exit_code()), Some(status));
            assert!(status.is_terminal());
        }
        assert!(!WorkerStatus::Streaming.is_terminal());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(ImageFormat::parse("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("tiff"), None);
        assert_eq!(SourceKind::parse("none"), Some(SourceKind::Absent));
        assert_eq!(Rotation::parse("90"), Some(Rotation::Ccw90));
    }
}
