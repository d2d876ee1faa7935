//! Control channel tasks on the worker side.
//!
//! A reader task decodes requests from the console and forwards save requests
//! to the capture loop; a writer task serialises replies back. Pings are
//! answered directly so they never wait behind a frame.

use std::sync::Arc;

use plotcam_common::ipc::{read_json, write_json, IpcError, Request, Response};
use plotcam_common::ring::FrameRing;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue depth between the reader task and the capture loop.
const REQUEST_QUEUE: usize = 16;

/// Handles to the running control tasks.
pub struct ControlTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ControlTasks {
    /// Stop reading, then let the writer flush queued replies.
    ///
    /// All other reply senders must be dropped first.
    pub async fn finish(self) {
        self.reader.abort();
        let _ = self.reader.await;
        if tokio::time::timeout(std::time::Duration::from_secs(1), self.writer)
            .await
            .is_err()
        {
            warn!("Timed out flushing control channel replies");
        }
    }
}

/// Start the control tasks on `stream`.
///
/// Returns the queue of save requests for the capture loop and the sender
/// the loop replies through. Losing the console end clears the streaming
/// flag so the worker never outlives its console.
pub fn spawn(
    stream: UnixStream,
    ring: Arc<FrameRing>,
) -> (
    mpsc::Receiver<Request>,
    mpsc::UnboundedSender<Response>,
    ControlTasks,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Response>();

    let pong_tx = reply_tx.clone();
    let reader = tokio::spawn(async move {
        loop {
            match read_json::<_, Request>(&mut read_half).await {
                Ok(Request::Ping) => {
                    let _ = pong_tx.send(Response::Pong);
                }
                Ok(request) => {
                    debug!("Queued request: {:?}", request);
                    if request_tx.send(request).await.is_err() {
                        break;
                    }
                }
                Err(IpcError::Malformed(e)) => {
                    warn!("Malformed control request: {}", e);
                    let _ = pong_tx.send(Response::error("Malformed request"));
                }
                Err(IpcError::ConnectionClosed) => {
                    info!("Console closed the control channel");
                    ring.set_streaming(false);
                    break;
                }
                Err(e) => {
                    warn!("Control channel read failed: {}", e);
                    ring.set_streaming(false);
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(response) = reply_rx.recv().await {
            if let Err(e) = write_json(&mut write_half, &response).await {
                // Swallowed: the console is gone or going.
                debug!("Dropping reply, control channel closed: {}", e);
                break;
            }
        }
    });

    (request_rx, reply_tx, ControlTasks { reader, writer })
}
