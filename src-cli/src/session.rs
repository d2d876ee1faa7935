//! Capture session: the worker process, its frame ring and its control channel.
//!
//! The console owns the ring and unlinks it; the worker attaches by name.
//! Teardown always runs in the order clear streaming flag, wait for the
//! worker to exit, unlink the ring.

use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use plotcam_common::ipc::{read_json, write_json, IpcError, Request, Response};
use plotcam_common::ring::{FrameRing, RingError};
use plotcam_common::security::validation::ValidationError;
use plotcam_common::{FrameShape, WorkerStatus};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;

const WORKER_BINARY: &str = "plotcam-capture";

/// How often shutdown polls the worker for exit.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Error type for starting a session.
#[derive(Debug)]
pub enum SessionError {
    Ring(RingError),
    Io(std::io::Error),
    /// The worker executable could not be located
    WorkerNotFound,
    /// The worker executable could not be started
    Spawn(std::io::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Ring(e) => write!(f, "Frame ring error: {}", e),
            SessionError::Io(e) => write!(f, "I/O error: {}", e),
            SessionError::WorkerNotFound => write!(f, "{} binary not found", WORKER_BINARY),
            SessionError::Spawn(e) => write!(f, "Failed to spawn capture worker: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RingError> for SessionError {
    fn from(e: RingError) -> Self {
        SessionError::Ring(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

/// Error type for a save request.
#[derive(Debug)]
pub enum SaveError {
    /// A save is already outstanding
    AlreadyPending,
    /// The worker did not answer in time
    Timeout(Duration),
    /// The worker is not streaming or went away
    WorkerStopped(WorkerStatus),
    /// The request was rejected before sending
    Invalid(ValidationError),
    /// The worker tried and failed
    Failed(String),
    Channel(IpcError),
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::AlreadyPending => write!(f, "A save is already in progress"),
            SaveError::Timeout(after) => write!(f, "Save timed out after {:?}", after),
            SaveError::WorkerStopped(status) => write!(f, "Capture worker is {}", status),
            SaveError::Invalid(e) => write!(f, "Invalid save request: {}", e),
            SaveError::Failed(msg) => write!(f, "Save failed: {}", msg),
            SaveError::Channel(e) => write!(f, "Control channel error: {}", e),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<IpcError> for SaveError {
    fn from(e: IpcError) -> Self {
        SaveError::Channel(e)
    }
}

/// Paths written by a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFrame {
    pub request_id: u64,
    pub color_path: PathBuf,
    pub depth_path: PathBuf,
}

/// Console end of the control channel.
///
/// The shared pending-save word admits one save at a time and records which
/// request holds it. Replies are read by a
/// background task, so a save that times out never leaves a half-read
/// message on the socket.
pub struct SaveRequestChannel {
    ring: Arc<FrameRing>,
    writer: Mutex<OwnedWriteHalf>,
    replies: Mutex<mpsc::UnboundedReceiver<Response>>,
    reader: JoinHandle<()>,
    next_request_id: AtomicU64,
    timeout: Duration,
}

impl SaveRequestChannel {
    /// Wrap the console end of a control socket.
    pub fn new(ring: Arc<FrameRing>, stream: UnixStream, timeout: Duration) -> Self {
        let (mut read_half, write_half) = stream.into_split();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            loop {
                match read_json::<_, Response>(&mut read_half).await {
                    Ok(response) => {
                        if reply_tx.send(response).is_err() {
                            break;
                        }
                    }
                    Err(IpcError::ConnectionClosed) => {
                        debug!("Worker closed the control channel");
                        break;
                    }
                    Err(e) => {
                        warn!("Control channel read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            ring,
            writer: Mutex::new(write_half),
            replies: Mutex::new(reply_rx),
            reader,
            next_request_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Ask the worker to save the most recently completed frame pair.
    ///
    /// Fails with [`SaveError::AlreadyPending`] while another save is
    /// outstanding. On timeout this request's claim is released; the worker
    /// then skips the request if it has not started on it yet.
    pub async fn request_save(
        &self,
        experiment_path: &Path,
        base_name: &str,
    ) -> Result<SavedFrame, SaveError> {
        let status = self.ring.worker_status();
        if status.is_terminal() || !self.ring.is_streaming() {
            return Err(SaveError::WorkerStopped(status));
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::SaveFrame {
            request_id,
            experiment_path: experiment_path.to_string_lossy().into_owned(),
            base_name: base_name.to_string(),
        };
        request.validate().map_err(SaveError::Invalid)?;

        if !self.ring.try_claim_pending(request_id) {
            return Err(SaveError::AlreadyPending);
        }

        debug!("Queueing image <{}> to be saved", base_name);
        let result = tokio::time::timeout(self.timeout, self.exchange(&request, request_id)).await;
        match result {
            Ok(Ok(saved)) => Ok(saved),
            Ok(Err(e)) => {
                self.ring.release_pending(request_id);
                Err(e)
            }
            Err(_) => {
                warn!("Save {} timed out after {:?}", request_id, self.timeout);
                self.ring.release_pending(request_id);
                Err(SaveError::Timeout(self.timeout))
            }
        }
    }

    async fn exchange(&self, request: &Request, request_id: u64) -> Result<SavedFrame, SaveError> {
        let mut replies = self.replies.lock().await;
        {
            let mut writer = self.writer.lock().await;
            write_json(&mut *writer, request).await?;
        }

        loop {
            let Some(response) = replies.recv().await else {
                return Err(SaveError::WorkerStopped(self.ring.worker_status()));
            };
            match response {
                Response::Saved {
                    request_id: id,
                    color_path,
                    depth_path,
                } if id == request_id => {
                    return Ok(SavedFrame {
                        request_id,
                        color_path: PathBuf::from(color_path),
                        depth_path: PathBuf::from(depth_path),
                    });
                }
                Response::SaveFailed {
                    request_id: id,
                    message,
                } if id == request_id => return Err(SaveError::Failed(message)),
                Response::Error { message } => return Err(SaveError::Failed(message)),
                stale => debug!("Discarding stale reply: {:?}", stale),
            }
        }
    }

    /// Round-trip a ping through the worker.
    pub async fn ping(&self) -> Result<Duration, SaveError> {
        let started = Instant::now();
        tokio::time::timeout(self.timeout, self.ping_exchange())
            .await
            .unwrap_or(Err(SaveError::Timeout(self.timeout)))?;
        Ok(started.elapsed())
    }

    async fn ping_exchange(&self) -> Result<(), SaveError> {
        let mut replies = self.replies.lock().await;
        {
            let mut writer = self.writer.lock().await;
            write_json(&mut *writer, &Request::Ping).await?;
        }
        loop {
            match replies.recv().await {
                Some(Response::Pong) => return Ok(()),
                Some(other) => debug!("Discarding reply while pinging: {:?}", other),
                None => return Err(SaveError::WorkerStopped(self.ring.worker_status())),
            }
        }
    }
}

impl Drop for SaveRequestChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// How the worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Status from the ring header, refined by the exit code
    pub status: WorkerStatus,
    /// `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Whether the worker had to be killed after the shutdown timeout
    pub killed: bool,
}

impl WorkerExit {
    fn new(header: WorkerStatus, exit_code: Option<i32>, killed: bool) -> Self {
        let status = exit_code
            .and_then(WorkerStatus::from_exit_code)
            .filter(|status| *status != WorkerStatus::Stopped || !header.is_terminal())
            .unwrap_or(header);
        Self {
            status,
            exit_code,
            killed,
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.killed && self.status == WorkerStatus::Stopped
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.exit_code, self.killed) {
            (_, true) => write!(f, "{} (killed)", self.status),
            (Some(code), false) => write!(f, "{} (exit code {})", self.status, code),
            (None, false) => write!(f, "{} (terminated by signal)", self.status),
        }
    }
}

/// A running capture worker and the resources it shares with the console.
pub struct CaptureSession {
    ring: Arc<FrameRing>,
    channel: Arc<SaveRequestChannel>,
    child: Option<Child>,
    shutdown_timeout: Duration,
}

impl CaptureSession {
    /// Allocate the ring, spawn the worker and connect the control channel.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &AppConfig, log_level: &str) -> Result<Self, SessionError> {
        let shape = FrameShape::for_display(&config.stream, config.rotation);
        let ring = Arc::new(FrameRing::create(
            &FrameRing::unique_name(),
            config.ring_slots,
            shape,
        )?);
        ring.set_streaming(true);

        let (console_end, worker_end) = std::os::unix::net::UnixStream::pair()?;
        let worker_path = find_worker_binary().ok_or(SessionError::WorkerNotFound)?;

        let mut command = Command::new(&worker_path);
        command
            .arg("--shm-name")
            .arg(ring.name())
            .arg(format!("--control-fd={}", worker_end.as_raw_fd()))
            .arg("--width")
            .arg(config.stream.width.to_string())
            .arg("--height")
            .arg(config.stream.height.to_string())
            .arg("--fps")
            .arg(config.stream.fps.to_string())
            .arg("--rotation")
            .arg(config.rotation.as_str())
            .arg("--depth-scale")
            .arg(config.depth_scale.to_string())
            .arg("--image-format")
            .arg(config.image_format.extension())
            .arg("--source")
            .arg(config.source.as_str())
            .arg("--log-level")
            .arg(log_level)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        inherit_fd(&mut command, worker_end.as_raw_fd());

        let child = command.spawn().map_err(SessionError::Spawn)?;
        // The worker holds its own copy now.
        drop(worker_end);
        info!(
            "Created capture worker {}, pid = {}",
            worker_path.display(),
            child.id()
        );

        console_end.set_nonblocking(true)?;
        let stream = UnixStream::from_std(console_end)?;
        let channel = Arc::new(SaveRequestChannel::new(
            Arc::clone(&ring),
            stream,
            Duration::from_secs(config.save_timeout_secs),
        ));

        Ok(Self {
            ring,
            channel,
            child: Some(child),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        })
    }

    pub fn ring(&self) -> &Arc<FrameRing> {
        &self.ring
    }

    /// Handle for issuing saves from another task.
    pub fn channel(&self) -> Arc<SaveRequestChannel> {
        Arc::clone(&self.channel)
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.ring.worker_status()
    }

    /// Stop the worker, wait for it to exit (killing it after the shutdown
    /// timeout), then release the ring.
    pub async fn shutdown(mut self) -> WorkerExit {
        self.ring.set_streaming(false);
        let Some(mut child) = self.child.take() else {
            return WorkerExit::new(self.ring.worker_status(), None, false);
        };

        let deadline = Instant::now() + self.shutdown_timeout;
        let exit = loop {
            match child.try_wait() {
                Ok(Some(status)) => break WorkerExit::new(self.ring.worker_status(), status.code(), false),
                Ok(None) if Instant::now() < deadline => tokio::time::sleep(EXIT_POLL).await,
                Ok(None) => {
                    warn!(
                        "Capture worker did not stop within {:?}, killing it",
                        self.shutdown_timeout
                    );
                    break kill(&mut child, self.ring.worker_status());
                }
                Err(e) => {
                    error!("Cannot wait for capture worker: {}", e);
                    break kill(&mut child, self.ring.worker_status());
                }
            }
        };

        info!("Terminated capture worker: {}", exit);
        exit
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.ring.set_streaming(false);

        let deadline = Instant::now() + self.shutdown_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL),
                _ => {
                    kill(&mut child, self.ring.worker_status());
                    return;
                }
            }
        }
    }
}

fn kill(child: &mut Child, header: WorkerStatus) -> WorkerExit {
    if let Err(e) = child.kill() {
        warn!("Failed to kill capture worker: {}", e);
    }
    let code = child.wait().ok().and_then(|status| status.code());
    WorkerExit::new(header, code, true)
}

/// Keep `fd` open across exec in the child.
fn inherit_fd(command: &mut Command, fd: RawFd) {
    unsafe {
        command.pre_exec(move || {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Find the worker binary path.
fn find_worker_binary() -> Option<PathBuf> {
    find_binary(WORKER_BINARY)
}

fn find_binary(name: &str) -> Option<PathBuf> {
    // 1. Sibling binary (installed together, or target/<profile>)
    if let Ok(exe_path) = std::env::current_exe() {
        // Test binaries live one level down in target/<profile>/deps.
        for dir in exe_path.ancestors().skip(1).take(2) {
            let path = dir.join(name);
            if path.is_file() {
                return Some(path);
            }
        }
    }

    // 2. In PATH
    which::which(name).ok()
}
