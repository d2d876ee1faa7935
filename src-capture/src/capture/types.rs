//! Frame types produced by a frame source (worker-internal).
//!
//! Colour frames are BGR8 as delivered by the camera; depth frames are raw
//! Z16 units that the save path scales to metres.

use plotcam_common::{Rotation, COLOR_CHANNELS};

use super::CaptureError;

/// A colour frame, BGR8, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorFrame {
    pub width: u32,
    pub height: u32,
    /// BGR pixel data
    pub data: Vec<u8>,
}

/// A depth frame, one Z16 sample per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

/// Colour and depth frames captured together.
#[derive(Debug, Clone)]
pub struct FramePair {
    pub color: ColorFrame,
    pub depth: DepthFrame,
}

impl ColorFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * COLOR_CHANNELS as usize;
        if data.len() != expected {
            return Err(CaptureError::FrameSize {
                stream: "colour",
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Copy of this frame with `rotation` applied.
    pub fn rotated(&self, rotation: Rotation) -> ColorFrame {
        let (width, height) = rotation.apply(self.width, self.height);
        ColorFrame {
            width,
            height,
            data: rotate(
                &self.data,
                self.width,
                self.height,
                COLOR_CHANNELS as usize,
                rotation,
            ),
        }
    }

    /// Pixel data reordered from BGR to RGB.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = self.data.clone();
        for pixel in rgb.chunks_exact_mut(3) {
            pixel.swap(0, 2);
        }
        rgb
    }
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, data: Vec<u16>) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(CaptureError::FrameSize {
                stream: "depth",
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Copy of this frame with `rotation` applied.
    pub fn rotated(&self, rotation: Rotation) -> DepthFrame {
        let (width, height) = rotation.apply(self.width, self.height);
        DepthFrame {
            width,
            height,
            data: rotate(&self.data, self.width, self.height, 1, rotation),
        }
    }
}

fn rotate<T: Copy>(
    data: &[T],
    width: u32,
    height: u32,
    channels: usize,
    rotation: Rotation,
) -> Vec<T> {
    match rotation {
        Rotation::None => data.to_vec(),
        Rotation::Ccw90 => rotate_ccw(data, width as usize, height as usize, channels),
    }
}

/// Rotate a row-major `width x height` image a quarter turn counter-clockwise.
///
/// The result is `height` pixels wide and `width` rows tall; output row `i`
/// is input column `width - 1 - i`.
pub fn rotate_ccw<T: Copy>(data: &[T], width: usize, height: usize, channels: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(data.len());
    for i in 0..width {
        let src_col = width - 1 - i;
        for j in 0..height {
            let src = (j * width + src_col) * channels;
            out.extend_from_slice(&data[src..src + channels]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_ccw_small() {
        // a b c
        // d e f
        let data = ['a', 'b', 'c', 'd', 'e', 'f'];
        let out = rotate_ccw(&data, 3, 2, 1);
        // c f
        // b e
        // a d
        assert_eq!(out, vec!['c', 'f', 'b', 'e', 'a', 'd']);
    }

    #[test]
    fn test_rotate_keeps_pixels_together() {
        let frame = ColorFrame::new(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let rotated = frame.rotated(Rotation::Ccw90);
        assert_eq!((rotated.width, rotated.height), (1, 2));
        assert_eq!(rotated.data, vec![4, 5, 6, 1, 2, 3]);

        let same = frame.rotated(Rotation::None);
        assert_eq!(same, frame);
    }

    #[test]
    fn test_four_rotations_are_identity() {
        let data: Vec<u16> = (0..12).collect();
        let mut frame = DepthFrame::new(4, 3, data.clone()).unwrap();
        for _ in 0..4 {
            frame = frame.rotated(Rotation::Ccw90);
        }
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data, data);
    }

    #[test]
    fn test_bgr_to_rgb() {
        let frame = ColorFrame::new(1, 1, vec![10, 20, 30]).unwrap();
        assert_eq!(frame.to_rgb(), vec![30, 20, 10]);
    }

    #[test]
    fn test_size_checked() {
        assert!(ColorFrame::new(2, 2, vec![0; 11]).is_err());
        assert!(DepthFrame::new(2, 2, vec![0; 3]).is_err());
    }
}
