//! Newline-delimited JSON codec for [`Message`]s.
//!
//! # Frame format
//!
//! ```text
//! {"type":"snapshot","devices":{…},"current-mount":{…},"ts":1718000000.0}\n
//! {"type":"ack","request_id":"…","status":"ok","message":"","ts":1718000000.1}\n
//! ```
//!
//! One compact JSON object per line, terminated by `\n`.  Compact JSON never
//! contains a raw newline (newlines inside strings are escaped as `\n`), so the
//! line terminator is an unambiguous frame boundary.
//!
//! # Decoding (for beginners)
//!
//! A stream socket delivers bytes, not messages.  A single `read` may return
//! half a line, or three lines and the start of a fourth.  [`LineDecoder`]
//! keeps the leftover bytes between reads and only hands back complete lines.
//!
//! Each line is decoded on its own.  A malformed line turns into a
//! [`FrameError`] in the [`DecodeReport`] and the decoder carries on with the
//! next line; one bad line never poisons the stream.

use thiserror::Error;

use crate::protocol::messages::Message;

/// Largest line the decoder will buffer before discarding it (1 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Errors produced while encoding or decoding a single line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A complete line was longer than the configured limit.
    #[error("line exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },

    /// Bytes accumulated without a newline past the configured limit.
    #[error("buffer exceeds max size without newline: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },

    /// The message could not be serialized.
    #[error("line encode failed: {0}")]
    Encode(String),

    /// The line is not valid JSON or not a valid message.
    #[error("line decode failed: {0}")]
    Decode(String),
}

/// Messages and errors produced by one call to [`LineDecoder::push_chunk`].
#[derive(Debug, Default)]
pub struct DecodeReport {
    /// Successfully decoded messages, in stream order.
    pub messages: Vec<Message>,
    /// Lines that were discarded, in stream order.
    pub errors: Vec<FrameError>,
}

/// Encodes `message` as compact JSON followed by a single `\n`.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if serialization fails.  With the message
/// types in this crate that only happens for non-finite `ts` values.
pub fn encode_line(message: &Message) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(message).map_err(|err| FrameError::Encode(err.to_string()))?;
    encoded.push(b'\n');
    Ok(encoded)
}

/// Incremental line splitter and decoder.
#[derive(Debug)]
pub struct LineDecoder {
    max_line_bytes: usize,
    pending: Vec<u8>,
}

impl LineDecoder {
    /// Creates a decoder that discards lines longer than `max_line_bytes`.
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            pending: Vec::new(),
        }
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    /// Appends `chunk` and decodes every complete line now available.
    ///
    /// Blank lines (including a bare `\r\n`) are skipped silently.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport {
        let mut report = DecodeReport::default();
        self.pending.extend_from_slice(chunk);

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline_idx).collect();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            self.decode_line(&line, &mut report);
        }

        if self.pending.len() > self.max_line_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_line_bytes,
            });
            self.pending.clear();
        }

        report
    }

    /// Drops whatever is left in the buffer once the stream has reached EOF.
    ///
    /// Only `\n`-terminated lines are messages, so an unterminated tail is
    /// never decoded.  Returns the number of non-blank bytes discarded.
    pub fn finish(&mut self) -> usize {
        let rest = std::mem::take(&mut self.pending);
        if rest.iter().all(u8::is_ascii_whitespace) {
            0
        } else {
            rest.len()
        }
    }

    fn decode_line(&self, line: &[u8], report: &mut DecodeReport) {
        if line.len() > self.max_line_bytes {
            report.errors.push(FrameError::OversizedFrame {
                size: line.len(),
                max: self.max_line_bytes,
            });
            return;
        }
        match serde_json::from_slice(line) {
            Ok(message) => report.messages.push(message),
            Err(err) => report.errors.push(FrameError::Decode(err.to_string())),
        }
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::AckStatus;

    fn ack_line(id: &str) -> Vec<u8> {
        encode_line(&Message::ack(id, true, "")).unwrap()
    }

    #[test]
    fn test_encode_line_ends_with_single_newline() {
        // Arrange
        let msg = Message::ack("r", false, "line one\nline two");

        // Act
        let bytes = encode_line(&msg).unwrap();

        // Assert: the embedded newline is escaped, only the terminator is raw
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(bytes.last(), Some(&b'\n'));
    }

    #[test]
    fn test_push_chunk_reassembles_line_split_across_reads() {
        // Arrange
        let line = ack_line("split");
        let (first, second) = line.split_at(line.len() / 2);
        let mut decoder = LineDecoder::default();

        // Act
        let early = decoder.push_chunk(first);
        let late = decoder.push_chunk(second);

        // Assert
        assert!(early.messages.is_empty());
        assert_eq!(late.messages.len(), 1);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_push_chunk_decodes_several_lines_in_one_read() {
        let mut bytes = ack_line("a");
        bytes.extend(ack_line("b"));
        bytes.extend(ack_line("c"));

        let report = LineDecoder::default().push_chunk(&bytes);

        let ids: Vec<_> = report
            .messages
            .iter()
            .map(|m| match m {
                Message::Ack(ack) => ack.request_id.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_push_chunk_strips_carriage_return_and_skips_blank_lines() {
        let report = LineDecoder::default()
            .push_chunk(b"\r\n\n{\"type\":\"ack\",\"request_id\":\"r\",\"status\":\"ok\"}\r\n");

        assert!(report.errors.is_empty());
        let Message::Ack(ack) = &report.messages[0] else {
            panic!("expected an ack");
        };
        assert_eq!(ack.status, AckStatus::Ok);
    }

    #[test]
    fn test_malformed_line_is_reported_and_following_line_still_decodes() {
        // Arrange
        let mut bytes = b"{not json}\n".to_vec();
        bytes.extend(ack_line("after"));

        // Act
        let report = LineDecoder::default().push_chunk(&bytes);

        // Assert
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], FrameError::Decode(_)));
        assert_eq!(report.messages.len(), 1);
    }

    #[test]
    fn test_unknown_type_decodes_without_error() {
        let report = LineDecoder::default().push_chunk(b"{\"type\":\"ping\"}\n");
        assert!(report.errors.is_empty());
        assert_eq!(report.messages, vec![Message::Unknown]);
    }

    #[test]
    fn test_oversized_unterminated_buffer_is_discarded() {
        // Arrange
        let mut decoder = LineDecoder::new(16);

        // Act
        let report = decoder.push_chunk(&[b'x'; 32]);

        // Assert
        assert!(matches!(
            report.errors[0],
            FrameError::OversizedBuffer { size: 32, max: 16 }
        ));
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_oversized_complete_line_is_discarded() {
        let mut decoder = LineDecoder::new(8);
        let mut bytes = vec![b'x'; 12];
        bytes.push(b'\n');

        let report = decoder.push_chunk(&bytes);

        assert!(matches!(
            report.errors[0],
            FrameError::OversizedFrame { size: 12, max: 8 }
        ));
    }

    #[test]
    fn test_finish_discards_unterminated_tail() {
        // Arrange
        let mut decoder = LineDecoder::default();
        let line = ack_line("tail");
        let tail = &line[..line.len() - 1];
        let report = decoder.push_chunk(tail);

        // Act
        let discarded = decoder.finish();

        // Assert
        assert!(report.messages.is_empty());
        assert_eq!(discarded, tail.len());
        assert_eq!(decoder.finish(), 0);
    }

    #[test]
    fn test_finish_on_empty_buffer_discards_nothing() {
        assert_eq!(LineDecoder::default().finish(), 0);
    }
}
