//! The worker binary as the console drives it: a console-owned ring, a
//! control socket handed over as a file descriptor, and an exit code that
//! mirrors the final worker status.

use std::os::fd::OwnedFd;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use plotcam_common::ring::FrameRing;
use plotcam_common::{FrameShape, Rotation, StreamConfig, WorkerStatus};

const WORKER: &str = env!("CARGO_BIN_EXE_plotcam-capture");
const TIMEOUT: Duration = Duration::from_secs(10);

const STREAM: StreamConfig = StreamConfig {
    width: 8,
    height: 4,
    fps: 60,
};

fn console_ring() -> FrameRing {
    let shape = FrameShape::for_display(&STREAM, Rotation::Ccw90);
    let ring = FrameRing::create(&FrameRing::unique_name(), 1, shape).unwrap();
    ring.set_streaming(true);
    ring
}

/// Spawn the worker with its end of a fresh socket pair as fd 0.
fn spawn(ring: &str, source: &str) -> (Child, std::os::unix::net::UnixStream) {
    let (console_end, worker_end) = std::os::unix::net::UnixStream::pair().unwrap();
    let child = Command::new(WORKER)
        .args(["--shm-name", ring, "--control-fd=0", "--source", source])
        .args(["--width", "8", "--height", "4", "--fps", "60"])
        .args(["--rotation", "ccw90", "--log-level", "warn"])
        .stdin(Stdio::from(OwnedFd::from(worker_end)))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    (child, console_end)
}

fn wait(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("worker did not exit within {:?}", TIMEOUT);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn streams_until_flag_cleared_then_exits_zero() {
    let ring = console_ring();
    let (mut child, _console_end) = spawn(ring.name(), "synthetic");

    let deadline = Instant::now() + TIMEOUT;
    while ring.latest().map_or(true, |(seq, _)| seq < 2) {
        assert!(Instant::now() < deadline, "no frames published");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(ring.worker_status(), WorkerStatus::Streaming);

    ring.set_streaming(false);
    let status = wait(&mut child);
    assert_eq!(status.code(), Some(0));
    assert_eq!(ring.worker_status(), WorkerStatus::Stopped);
}

#[test]
fn missing_camera_exits_with_no_device_code() {
    let ring = console_ring();
    let (mut child, _console_end) = spawn(ring.name(), "absent");

    let status = wait(&mut child);
    assert_eq!(status.code(), Some(WorkerStatus::NoDevice.exit_code()));
    assert_eq!(ring.worker_status(), WorkerStatus::NoDevice);
}

#[test]
fn unknown_ring_exits_with_channel_error_code() {
    let (mut child, _console_end) = spawn(&FrameRing::unique_name(), "synthetic");
    let status = wait(&mut child);
    assert_eq!(status.code(), Some(WorkerStatus::ChannelError.exit_code()));
}

#[test]
fn bad_arguments_exit_two() {
    let status = Command::new(WORKER)
        .arg("--control-fd=0")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}
