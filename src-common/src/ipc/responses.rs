//! Control-channel responses sent by the capture worker.

use serde::{Deserialize, Serialize};

/// Response from the capture worker to the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The frame pair was written; paths are absolute
    Saved {
        request_id: u64,
        color_path: String,
        depth_path: String,
    },
    /// The save could not be performed (invalid request, I/O error, or the
    /// worker is stopping)
    SaveFailed { request_id: u64, message: String },
    /// Pong response to ping
    Pong,
    /// Error not tied to a request (message is sanitized - no internal details)
    Error { message: String },
}

impl Response {
    /// Create an error response with a sanitized message.
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// Create a failed-save response.
    pub fn save_failed(request_id: u64, message: impl Into<String>) -> Self {
        Response::SaveFailed {
            request_id,
            message: message.into(),
        }
    }

    /// Check if this response indicates an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. } | Response::SaveFailed { .. })
    }

    /// Request id this response answers, if any.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Response::Saved { request_id, .. } | Response::SaveFailed { request_id, .. } => {
                Some(*request_id)
            }
            Response::Pong | Response::Error { .. } => None,
        }
    }
}
