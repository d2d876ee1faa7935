//! Message framing for the control channel between console and worker.
//!
//! ```text
//! ┌──────────────────┬─────────────────────────────────┐
//! │ Length (4 bytes) │ JSON payload (variable length)  │
//! │ little-endian    │ at most MAX_MESSAGE_SIZE bytes  │
//! └──────────────────┴─────────────────────────────────┘
//! ```
//!
//! A frame is written with a single `write_all`, so the worker's reply
//! writer and the console's request writer never interleave partial frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload size (64 KiB). Control messages are a few hundred bytes.
pub const MAX_MESSAGE_SIZE: usize = 65536;

const PREFIX_LEN: usize = 4;

/// Error type for control channel I/O.
#[derive(Debug)]
pub enum IpcError {
    Io(std::io::Error),
    /// Length prefix above [`MAX_MESSAGE_SIZE`]
    MessageTooLarge { size: usize, max: usize },
    /// The payload is not the expected JSON
    Malformed(String),
    /// The value could not be serialised
    Encode(String),
    /// The peer closed the channel between messages
    ConnectionClosed,
    /// The peer closed the channel in the middle of a message
    Truncated { expected: usize },
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcError::Io(e) => write!(f, "I/O error: {}", e),
            IpcError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            IpcError::Malformed(e) => write!(f, "Malformed message: {}", e),
            IpcError::Encode(e) => write!(f, "Cannot encode message: {}", e),
            IpcError::ConnectionClosed => write!(f, "Connection closed"),
            IpcError::Truncated { expected } => {
                write!(f, "Connection closed mid-message ({} byte payload)", expected)
            }
        }
    }
}

impl std::error::Error for IpcError {}

impl From<std::io::Error> for IpcError {
    fn from(e: std::io::Error) -> Self {
        IpcError::Io(e)
    }
}

fn is_eof(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::UnexpectedEof
}

/// Read one frame and return its payload.
///
/// The size is checked before anything is allocated.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, IpcError> {
    let mut prefix = [0u8; PREFIX_LEN];
    reader.read_exact(&mut prefix).await.map_err(|e| {
        if is_eof(&e) {
            IpcError::ConnectionClosed
        } else {
            IpcError::Io(e)
        }
    })?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if is_eof(&e) {
            IpcError::Truncated { expected: len }
        } else {
            IpcError::Io(e)
        }
    })?;
    Ok(payload)
}

/// Build the wire form of `payload`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, IpcError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write `payload` as one frame and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), IpcError> {
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it as JSON.
pub async fn read_json<R: AsyncRead + Unpin, T: serde::de::DeserializeOwned>(
    reader: &mut R,
) -> Result<T, IpcError> {
    let payload = read_message(reader).await?;
    serde_json::from_slice(&payload).map_err(|e| IpcError::Malformed(e.to_string()))
}

/// Encode `value` as JSON and write it as one frame.
pub async fn write_json<W: AsyncWrite + Unpin, T: serde::Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), IpcError> {
    let payload = serde_json::to_vec(value).map_err(|e| IpcError::Encode(e.to_string()))?;
    write_message(writer, &payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(b"abc").unwrap();
        assert_eq!(frame, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_on_write() {
        let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut buf = Vec::new();

        let result = write_message(&mut buf, &oversized).await;
        assert!(matches!(result, Err(IpcError::MessageTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected_before_read() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_MESSAGE_SIZE as u32) + 1).to_le_bytes());
        let mut cursor = Cursor::new(buf);

        let result = read_message(&mut cursor).await;
        assert!(matches!(result, Err(IpcError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_clean_close_between_messages() {
        let mut cursor = Cursor::new(Vec::new());
        let result = read_message(&mut cursor).await;
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_mid_message_is_truncated() {
        let mut buf = encode_frame(b"partial payload").unwrap();
        buf.truncate(buf.len() - 3);
        let mut cursor = Cursor::new(buf);

        let result = read_message(&mut cursor).await;
        assert!(matches!(result, Err(IpcError::Truncated { expected: 15 })));
    }

    #[tokio::test]
    async fn test_json_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_json(&mut a, &vec![1u32, 2, 3]).await.unwrap();
        write_json(&mut a, &"second").await.unwrap();
        let first: Vec<u32> = read_json(&mut b).await.unwrap();
        let second: String = read_json(&mut b).await.unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, "second");
    }

    #[tokio::test]
    async fn test_non_json_payload_is_malformed() {
        let mut cursor = Cursor::new(encode_frame(b"{not json").unwrap());
        let result: Result<u32, _> = read_json(&mut cursor).await;
        assert!(matches!(result, Err(IpcError::Malformed(_))));
    }
}
