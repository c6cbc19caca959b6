//! Async reader and writer halves of the framed message channel.
//!
//! Both endpoints (the guest's listener and the host's dialer) split their
//! stream into a [`MessageReader`], owned by the receive loop, and a
//! [`MessageWriter`], kept behind an async mutex so `send` can be called from
//! any task while the receive loop is running.
//!
//! The halves are type-erased (`Box<dyn AsyncRead …>`) so the same code serves
//! TCP streams, vsock streams, and in-memory test pipes.

use std::collections::VecDeque;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::protocol::codec::{encode_line, DecodeReport, FrameError, LineDecoder};
use crate::protocol::messages::Message;

/// Type-erased read half.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Type-erased write half.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Errors that can occur when sending on the channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No stream is currently live.
    #[error("not connected")]
    NotConnected,

    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] FrameError),
}

/// Splits a bidirectional stream into channel halves.
pub fn split_stream<S>(stream: S) -> (MessageReader, MessageWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (MessageReader::new(read_half), MessageWriter::new(write_half))
}

/// Lazily yields decoded messages from a byte stream.
///
/// Malformed lines are logged and skipped.  Once [`next_message`] returns
/// `None` the stream is finished and every later call also returns `None`.
///
/// [`next_message`]: MessageReader::next_message
pub struct MessageReader {
    inner: BoxedReader,
    decoder: LineDecoder,
    ready: VecDeque<Message>,
    buf: Vec<u8>,
    closed: bool,
}

impl MessageReader {
    /// Wraps a read half with the default line size limit.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::with_decoder(reader, LineDecoder::default())
    }

    /// Wraps a read half with a caller-supplied decoder.
    pub fn with_decoder(reader: impl AsyncRead + Send + Unpin + 'static, decoder: LineDecoder) -> Self {
        Self {
            inner: Box::new(reader),
            decoder,
            ready: VecDeque::new(),
            buf: vec![0u8; READ_CHUNK_BYTES],
            closed: false,
        }
    }

    /// Returns the next message, or `None` on EOF or read error.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Some(message);
            }
            if self.closed {
                return None;
            }

            match self.inner.read(&mut self.buf).await {
                Ok(0) => {
                    debug!("channel reached EOF");
                    self.closed = true;
                    let discarded = self.decoder.finish();
                    if discarded > 0 {
                        debug!("dropping {discarded} bytes of unterminated input at EOF");
                    }
                }
                Ok(n) => {
                    let report = self.decoder.push_chunk(&self.buf[..n]);
                    self.absorb(report);
                }
                Err(e) => {
                    warn!("channel read error: {e}");
                    self.closed = true;
                }
            }
        }
    }

    fn absorb(&mut self, report: DecodeReport) {
        for err in report.errors {
            warn!("discarding line: {err}");
        }
        self.ready.extend(report.messages);
    }
}

/// Writes whole messages to a byte stream.
pub struct MessageWriter {
    inner: BoxedWriter,
}

impl MessageWriter {
    /// Wraps a write half.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Encodes `message`, writes the full line, and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Encode`] if the message cannot be serialized and
    /// [`ChannelError::Io`] if the stream rejects the write.
    pub async fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        let line = encode_line(message)?;
        self.inner.write_all(&line).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts down the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
