//! Swarm stream dispatcher.
//!
//! Serves exactly one request per stream: read the control message, answer
//! it, finish the stream. Generic over the reader and writer halves so the
//! same logic runs on QUIC streams and in-memory pipes.

use super::parser::{self, ControlMessage, ControlReply, ErrorCode, Framing};
use crate::chunk::ChunkSource;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

/// Default cap on the size of one control message
pub const DEFAULT_MAX_MESSAGE: usize = 64 * 1024;

/// Default time a peer gets to deliver its control message
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// How a stream was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Nothing usable arrived (EOF or timeout); the stream closed silently.
    Idle,
    /// `hello` answered with `{"type":"ok"}`.
    Acknowledged,
    /// An error frame was sent.
    Rejected(ErrorCode),
    /// Chunk bytes were sent.
    Chunk(usize),
}

/// Answers one control message per stream.
///
/// Cheap to clone; clones share the chunk source.
#[derive(Clone)]
pub struct StreamDispatcher {
    source: Arc<dyn ChunkSource>,
    read_timeout: Duration,
    max_message: usize,
}

impl StreamDispatcher {
    pub fn new(source: Arc<dyn ChunkSource>) -> Self {
        StreamDispatcher {
            source,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_message: DEFAULT_MAX_MESSAGE,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_max_message(mut self, max_message: usize) -> Self {
        self.max_message = max_message;
        self
    }

    /// Serve one stream.
    ///
    /// The writer is shut down on every path that gets this far, including
    /// when nothing usable was read. I/O errors mean the peer or transport
    /// went away; the caller should drop the stream.
    pub async fn dispatch<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> std::io::Result<StreamOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let read = self.read_request(&mut reader);
        let request = match tokio::time::timeout(self.read_timeout, read).await {
            Ok(request) => request?,
            Err(_) => {
                trace!(timeout = ?self.read_timeout, "Timed out waiting for request");
                BytesMut::new()
            }
        };

        if request.is_empty() {
            writer.shutdown().await?;
            return Ok(StreamOutcome::Idle);
        }

        let (response, outcome) = self.respond(&request);
        writer.write_all(&response).await?;
        writer.shutdown().await?;

        Ok(outcome)
    }

    /// Read until the buffer holds a complete or hopeless message, the peer
    /// finishes its side, or `max_message` bytes have arrived.
    async fn read_request<R>(&self, reader: &mut R) -> std::io::Result<BytesMut>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(self.max_message.min(16 * 1024));
        let mut limited = reader.take(self.max_message as u64);

        loop {
            let n = limited.read_buf(&mut buffer).await?;
            if n == 0 {
                break;
            }
            if parser::framing(&buffer) != Framing::Incomplete {
                break;
            }
        }

        Ok(buffer)
    }

    /// Build the response for one decoded request.
    fn respond(&self, request: &[u8]) -> (Bytes, StreamOutcome) {
        let message = match parser::decode(request) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = request.len(), "Malformed control message");
                return reject(ErrorCode::BadJson);
            }
        };

        trace!(?message, "Processing control message");

        match message {
            ControlMessage::Hello => (
                Bytes::from_static(parser::encode(&ControlReply::Ok)),
                StreamOutcome::Acknowledged,
            ),
            ControlMessage::RequestChunk { identity, length } => {
                let chunk = self.source.resolve(&identity, length);
                trace!(asset = %identity, ?length, len = chunk.len(), "Serving chunk");
                let len = chunk.len();
                (chunk, StreamOutcome::Chunk(len))
            }
            ControlMessage::Unrecognized(kind) => {
                warn!(kind = ?kind, "Unrecognized control message");
                reject(ErrorCode::BadType)
            }
        }
    }
}

impl std::fmt::Debug for StreamDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDispatcher")
            .field("read_timeout", &self.read_timeout)
            .field("max_message", &self.max_message)
            .finish_non_exhaustive()
    }
}

fn reject(code: ErrorCode) -> (Bytes, StreamOutcome) {
    let frame = parser::encode(&ControlReply::Error { code });
    (Bytes::from_static(frame), StreamOutcome::Rejected(code))
}
