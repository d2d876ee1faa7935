//! Display loop.
//!
//! Runs on its own fixed interval, independent of the capture rate. Each tick
//! copies the newest published frame out of the ring and hands it to a
//! [`FrameSink`]. A tick never waits for the camera: with nothing new, or
//! with the slot held by the writer, the previous frame is shown again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use plotcam_common::ring::{FrameRing, RingError};
use plotcam_common::FrameShape;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Something that presents frames to the operator.
pub trait FrameSink: Send {
    /// `frame` is BGR, `shape.width * shape.height * shape.channels` bytes.
    /// `fresh` is false when the same frame is shown again.
    fn render(&mut self, frame: &[u8], shape: FrameShape, fresh: bool);
}

/// Result of one display tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing published yet
    Empty,
    /// A new frame was rendered
    Fresh(u64),
    /// The previous frame was rendered again
    Repeated,
}

/// Counters kept by the display loop.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DisplayStats {
    /// Ticks that rendered something
    pub rendered: u64,
    pub fresh: u64,
    pub repeated: u64,
    /// Ticks that found the slot held by the writer
    pub busy: u64,
    pub elapsed_secs: f64,
}

impl DisplayStats {
    pub fn average_fps(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.rendered as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

pub struct DisplayLoop {
    ring: Arc<FrameRing>,
    interval: Duration,
    buffer: Vec<u8>,
    last_sequence: Option<u64>,
    stats: DisplayStats,
    started: Instant,
}

impl DisplayLoop {
    /// Display loop refreshing `fps` times per second.
    pub fn new(ring: Arc<FrameRing>, fps: u32) -> Self {
        let interval = Duration::from_millis((1000.0 / fps.max(1) as f64).round() as u64);
        let buffer = vec![0u8; ring.bytes_per_frame()];
        Self {
            ring,
            interval,
            buffer,
            last_sequence: None,
            stats: DisplayStats::default(),
            started: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> DisplayStats {
        DisplayStats {
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            ..self.stats
        }
    }

    /// Render the newest frame, or the previous one if none is available.
    pub fn tick(&mut self, sink: &mut dyn FrameSink) -> Tick {
        let shape = self.ring.shape();
        match self.ring.read_latest(&mut self.buffer) {
            Ok(Some(sequence)) if self.last_sequence != Some(sequence) => {
                self.last_sequence = Some(sequence);
                sink.render(&self.buffer, shape, true);
                self.stats.rendered += 1;
                self.stats.fresh += 1;
                Tick::Fresh(sequence)
            }
            Ok(Some(_)) => self.repeat(sink),
            Ok(None) => Tick::Empty,
            Err(RingError::SlotBusy(_)) => {
                self.stats.busy += 1;
                self.repeat(sink)
            }
            Err(e) => {
                warn!("Display read failed: {}", e);
                self.repeat(sink)
            }
        }
    }

    fn repeat(&mut self, sink: &mut dyn FrameSink) -> Tick {
        if self.last_sequence.is_none() {
            return Tick::Empty;
        }
        // A failed read leaves the buffer untouched, so it still holds the
        // last complete frame.
        sink.render(&self.buffer, self.ring.shape(), false);
        self.stats.rendered += 1;
        self.stats.repeated += 1;
        Tick::Repeated
    }

    /// Tick until `stop` turns true, then report statistics.
    pub async fn run<S: FrameSink>(
        mut self,
        mut sink: S,
        mut stop: watch::Receiver<bool>,
    ) -> DisplayStats {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("Timer limiting display refresh to {:?}", self.interval);

        self.started = Instant::now();
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick(&mut sink);
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        let stats = self.stats();
        info!(
            "Stream's average FPS: {:.2} ({} fresh, {} repeated, {} busy)",
            stats.average_fps(),
            stats.fresh,
            stats.repeated,
            stats.busy
        );
        stats
    }
}

/// Headless renderer: converts each frame to RGB in the operator layout and
/// keeps the result.
///
/// In VR layout the frame is duplicated side by side, one copy per eye.
pub struct PreviewSink {
    vr_layout: bool,
    frame: Vec<u8>,
    shape: Option<FrameShape>,
}

impl PreviewSink {
    pub fn new(vr_layout: bool) -> Self {
        Self {
            vr_layout,
            frame: Vec::new(),
            shape: None,
        }
    }

    /// Last composed RGB frame and its shape.
    #[cfg(test)]
    fn frame(&self) -> Option<(&[u8], FrameShape)> {
        self.shape.map(|shape| (self.frame.as_slice(), shape))
    }
}

impl FrameSink for PreviewSink {
    fn render(&mut self, frame: &[u8], shape: FrameShape, fresh: bool) {
        if !fresh && self.shape.is_some() {
            return;
        }
        self.shape = Some(compose_into(&mut self.frame, frame, shape, self.vr_layout));
    }
}

/// Convert a BGR frame to RGB into `out`, duplicating it side by side when
/// `vr_layout`. Returns the composed shape.
fn compose_into(out: &mut Vec<u8>, frame: &[u8], shape: FrameShape, vr_layout: bool) -> FrameShape {
    let channels = shape.channels as usize;
    let row_len = shape.width as usize * channels;
    let copies = if vr_layout { 2 } else { 1 };

    out.clear();
    for row in frame.chunks_exact(row_len.max(1)) {
        let start = out.len();
        for pixel in row.chunks_exact(channels.max(1)) {
            out.extend(pixel.iter().rev());
        }
        if vr_layout {
            out.extend_from_within(start..);
        }
    }

    FrameShape::new(shape.width * copies as u32, shape.height, shape.channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotcam_common::COLOR_CHANNELS;

    #[derive(Default)]
    struct RecordingSink {
        renders: Vec<(u8, bool)>,
    }

    impl FrameSink for RecordingSink {
        fn render(&mut self, frame: &[u8], _shape: FrameShape, fresh: bool) {
            self.renders.push((frame[0], fresh));
        }
    }

    fn ring() -> Arc<FrameRing> {
        let shape = FrameShape::new(4, 2, COLOR_CHANNELS);
        Arc::new(FrameRing::create(&FrameRing::unique_name(), 1, shape).unwrap())
    }

    #[test]
    fn test_tick_before_first_frame_renders_nothing() {
        let ring = ring();
        let mut display = DisplayLoop::new(ring, 30);
        let mut sink = RecordingSink::default();
        assert_eq!(display.tick(&mut sink), Tick::Empty);
        assert!(sink.renders.is_empty());
    }

    #[test]
    fn test_tick_repeats_frame_until_a_new_one_arrives() {
        let ring = ring();
        let mut display = DisplayLoop::new(ring.clone(), 30);
        let mut sink = RecordingSink::default();

        ring.write(0, &[1u8; 24]).unwrap();
        assert_eq!(display.tick(&mut sink), Tick::Fresh(1));
        assert_eq!(display.tick(&mut sink), Tick::Repeated);

        ring.write(0, &[2u8; 24]).unwrap();
        assert_eq!(display.tick(&mut sink), Tick::Fresh(2));

        assert_eq!(sink.renders, vec![(1, true), (1, false), (2, true)]);
        let stats = display.stats();
        assert_eq!(stats.rendered, 3);
        assert_eq!(stats.fresh, 2);
        assert_eq!(stats.repeated, 1);
    }

    #[test]
    fn test_interval_follows_fps() {
        let display = DisplayLoop::new(ring(), 20);
        assert_eq!(display.interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let ring = ring();
        ring.write(0, &[9u8; 24]).unwrap();
        let display = DisplayLoop::new(ring, 200);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(display.run(PreviewSink::new(false), stop_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.fresh, 1);
        assert!(stats.rendered >= 1);
    }

    #[test]
    fn test_compose_swaps_channels() {
        let shape = FrameShape::new(2, 1, 3);
        let mut out = Vec::new();
        let out_shape = compose_into(&mut out, &[1, 2, 3, 4, 5, 6], shape, false);
        assert_eq!(out, vec![3, 2, 1, 6, 5, 4]);
        assert_eq!(out_shape, shape);
    }

    #[test]
    fn test_compose_vr_duplicates_each_row() {
        let shape = FrameShape::new(1, 2, 3);
        let mut out = vec![0xff; 32];
        let out_shape = compose_into(&mut out, &[1, 2, 3, 4, 5, 6], shape, true);
        assert_eq!(out, vec![3, 2, 1, 3, 2, 1, 6, 5, 4, 6, 5, 4]);
        assert_eq!(out_shape, FrameShape::new(2, 2, 3));
    }

    #[test]
    fn test_preview_sink_keeps_last_fresh_frame() {
        let shape = FrameShape::new(1, 1, 3);
        let mut sink = PreviewSink::new(false);
        assert!(sink.frame().is_none());
        sink.render(&[1, 2, 3], shape, true);
        sink.render(&[7, 8, 9], shape, false);
        assert_eq!(sink.frame().unwrap().0, &[3, 2, 1]);
    }
}
