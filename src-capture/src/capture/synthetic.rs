//! Synthetic camera: a moving colour test pattern and a depth ramp, paced at
//! the configured frame rate.

use std::time::{Duration, Instant};

use plotcam_common::StreamConfig;

use super::{CaptureError, ColorFrame, DepthFrame, FrameSource, FramePair};

/// Nearest simulated distance in Z16 units (0.5 m at 1 mm/unit).
const DEPTH_NEAR: u16 = 500;
/// Span of the simulated depth ramp in Z16 units.
const DEPTH_SPAN: u16 = 1500;

pub struct SyntheticSource {
    stream: StreamConfig,
    frame_index: u64,
    interval: Duration,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(stream: StreamConfig) -> Self {
        let interval = Duration::from_secs(1) / stream.fps.max(1);
        Self {
            stream,
            frame_index: 0,
            interval,
            next_due: None,
        }
    }

    fn pace(&mut self) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Do not accumulate debt when the consumer falls behind.
        self.next_due = Some(due.max(now) + self.interval);
    }

    fn color(&self) -> Vec<u8> {
        let (w, h) = (self.stream.width as usize, self.stream.height as usize);
        let shift = self.frame_index as usize;
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let band = ((x + shift) / 8) % 2 == 0;
                let b = (x * 255 / w.max(1)) as u8;
                let g = (y * 255 / h.max(1)) as u8;
                let r = if band { 200 } else { 40 };
                data.extend_from_slice(&[b, g, r]);
            }
        }
        data
    }

    fn depth(&self) -> Vec<u16> {
        let (w, h) = (self.stream.width as usize, self.stream.height as usize);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for _ in 0..w {
                // Farther towards the top of the frame, like looking down a row of plots.
                let step = (h - 1 - y) * DEPTH_SPAN as usize / h.max(1);
                data.push(DEPTH_NEAR + step as u16);
            }
        }
        data
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame_pair(&mut self) -> Result<Option<FramePair>, CaptureError> {
        self.pace();
        let color = ColorFrame::new(self.stream.width, self.stream.height, self.color())?;
        let depth = DepthFrame::new(self.stream.width, self.stream.height, self.depth())?;
        self.frame_index += 1;
        Ok(Some(FramePair { color, depth }))
    }
}
