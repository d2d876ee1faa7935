//! The capture loop.
//!
//! Each iteration:
//! 1. takes the next frame pair from the source (incomplete pairs are skipped);
//! 2. waits while the target ring slot is busy, re-checking the streaming flag;
//! 3. if a save request is queued and a previous pair exists, saves that
//!    previous pair, releases the request's pending-save claim and replies;
//! 4. rotates the colour frame, writes it into the slot and advances the slot.
//!
//! A request whose claim on the pending-save word is gone was abandoned by
//! the console (it timed out) and is answered with `save_failed` without
//! saving. The loop runs until the console clears the streaming flag.
//! Requests still queued at that point are answered with `save_failed`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use plotcam_common::ipc::{Request, Response};
use plotcam_common::ring::{FrameRing, RingError};
use plotcam_common::{FrameShape, StreamConfig, WorkerStatus};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::capture::{FramePair, FrameSource};
use crate::control;
use crate::save::{save_pair, SaveOptions};

/// Parameters of one worker run.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub stream: StreamConfig,
    pub save: SaveOptions,
}

impl WorkerConfig {
    /// Shape the ring must have for frames of this configuration.
    pub fn display_shape(&self) -> FrameShape {
        FrameShape::for_display(&self.stream, self.save.rotation)
    }
}

/// Spin, then yield, then sleep. Each call to [`Backoff::snooze`] waits a
/// little longer, capped at [`Backoff::MAX_SLEEP`].
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;
    const MAX_SLEEP: Duration = Duration::from_micros(100);

    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    pub(crate) fn snooze(&mut self) {
        if self.step < Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step < Self::YIELD_LIMIT {
            std::thread::yield_now();
        } else {
            std::thread::sleep(Self::MAX_SLEEP);
        }
        self.step = self.step.saturating_add(1);
    }
}

/// Wait until `slot` is free. Returns `false` if streaming stopped meanwhile.
fn wait_for_slot(ring: &FrameRing, slot: usize) -> bool {
    let mut backoff = Backoff::new();
    while ring.is_slot_busy(slot) {
        if !ring.is_streaming() {
            return false;
        }
        backoff.snooze();
    }
    true
}

/// Write `frame` into `slot`, retrying while the reader holds it.
///
/// Returns `Ok(false)` if streaming stopped before the write went through.
fn publish(ring: &FrameRing, slot: usize, frame: &[u8]) -> Result<bool, RingError> {
    let mut backoff = Backoff::new();
    loop {
        match ring.write(slot, frame) {
            Ok(_) => return Ok(true),
            Err(RingError::SlotBusy(_)) => {
                if !ring.is_streaming() {
                    return Ok(false);
                }
                backoff.snooze();
            }
            Err(e) => return Err(e),
        }
    }
}

/// Serve one save request against `previous` and produce the reply.
fn serve_request(request: Request, previous: &FramePair, options: &SaveOptions) -> Response {
    let Request::SaveFrame {
        request_id,
        experiment_path,
        base_name,
    } = &request
    else {
        return Response::error("Unexpected request");
    };
    let request_id = *request_id;

    if let Err(e) = request.validate() {
        warn!("Rejected save request {}: {}", request_id, e);
        return Response::save_failed(request_id, e.to_string());
    }

    let started = Instant::now();
    match save_pair(previous, Path::new(experiment_path), base_name, options) {
        Ok(saved) => {
            info!(
                "Saved {} in {:.0?}",
                saved.color.display(),
                started.elapsed()
            );
            Response::Saved {
                request_id,
                color_path: saved.color.to_string_lossy().into_owned(),
                depth_path: saved.depth.to_string_lossy().into_owned(),
            }
        }
        Err(e) => {
            error!("Save {} failed: {}", request_id, e);
            Response::save_failed(request_id, e.to_string())
        }
    }
}

/// Serve `request` if it still owns the pending-save word, then release it.
fn handle_request(
    ring: &FrameRing,
    request: Request,
    previous: &FramePair,
    options: &SaveOptions,
) -> Response {
    let Some(request_id) = request.request_id() else {
        return Response::error("Unexpected request");
    };
    if ring.pending_request() != Some(request_id) {
        warn!("Skipping save request {}: abandoned by the console", request_id);
        return Response::save_failed(request_id, "Request abandoned");
    }
    let response = serve_request(request, previous, options);
    ring.release_pending(request_id);
    response
}

/// Run the capture loop until the streaming flag is cleared or the source fails.
///
/// Returns the terminal status; the caller publishes it.
pub fn capture_loop(
    ring: &FrameRing,
    source: &mut dyn FrameSource,
    options: &SaveOptions,
    requests: &mut mpsc::Receiver<Request>,
    replies: &mpsc::UnboundedSender<Response>,
) -> WorkerStatus {
    let mut slot = 0usize;
    let mut previous: Option<FramePair> = None;
    let mut frames: u64 = 0;
    let started = Instant::now();

    let status = loop {
        if !ring.is_streaming() {
            break WorkerStatus::Stopped;
        }

        let pair = match source.next_frame_pair() {
            Ok(Some(pair)) => pair,
            Ok(None) => continue,
            Err(e) => {
                error!("Frame source failed: {}", e);
                break WorkerStatus::DeviceError;
            }
        };

        if !wait_for_slot(ring, slot) {
            break WorkerStatus::Stopped;
        }

        // A request waits until a complete pair exists to save.
        if let Some(prev) = previous.as_ref() {
            if let Ok(request) = requests.try_recv() {
                let _ = replies.send(handle_request(ring, request, prev, options));
            }
        }

        let display = pair.color.rotated(options.rotation);
        match publish(ring, slot, &display.data) {
            Ok(true) => {}
            Ok(false) => break WorkerStatus::Stopped,
            Err(e) => {
                error!("Cannot write frame into ring: {}", e);
                break WorkerStatus::DeviceError;
            }
        }
        slot = (slot + 1) % ring.slot_count();
        frames += 1;
        previous = Some(pair);
    };

    requests.close();
    while let Ok(request) = requests.try_recv() {
        if let Some(request_id) = request.request_id() {
            ring.release_pending(request_id);
            let _ = replies.send(Response::save_failed(request_id, "Capture stopped"));
        }
    }

    let secs = started.elapsed().as_secs_f64();
    if secs > 0.0 && frames > 0 {
        info!(
            "Capture loop ended ({}): {} frames, average {:.1} fps",
            status,
            frames,
            frames as f64 / secs
        );
    }
    status
}

/// Run a worker session against an attached ring and control stream.
///
/// `source` is `None` when no camera was found; the worker then records
/// [`WorkerStatus::NoDevice`] and returns without streaming.
pub async fn run_worker(
    config: WorkerConfig,
    ring: Arc<FrameRing>,
    control: UnixStream,
    source: Option<Box<dyn FrameSource>>,
) -> WorkerStatus {
    let expected = config.display_shape();
    if ring.shape() != expected {
        error!(
            "Ring shape {:?} does not match stream shape {:?}",
            ring.shape(),
            expected
        );
        ring.set_worker_status(WorkerStatus::ChannelError);
        return WorkerStatus::ChannelError;
    }

    let Some(mut source) = source else {
        warn!("No camera connected; capture disabled");
        ring.set_worker_status(WorkerStatus::NoDevice);
        return WorkerStatus::NoDevice;
    };

    ring.set_worker_status(WorkerStatus::Streaming);
    info!(
        "Streaming {}x{} @ {} fps into {} ({} slots)",
        config.stream.width,
        config.stream.height,
        config.stream.fps,
        ring.name(),
        ring.slot_count()
    );

    let (mut requests, replies, tasks) = control::spawn(control, Arc::clone(&ring));

    let loop_ring = Arc::clone(&ring);
    let options = config.save;
    let joined = tokio::task::spawn_blocking(move || {
        capture_loop(&loop_ring, &mut *source, &options, &mut requests, &replies)
    })
    .await;

    let status = match joined {
        Ok(status) => status,
        Err(e) => {
            error!("Capture loop panicked: {}", e);
            WorkerStatus::DeviceError
        }
    };

    tasks.finish().await;
    ring.set_worker_status(status);
    debug!("Worker status: {}", status);
    status
}
