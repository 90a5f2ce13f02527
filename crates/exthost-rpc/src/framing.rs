//! Content-Length message framing.
//! - FrameDecoder: incremental header + payload parser
//! - encode_frame/write_frame: emit one payload

use std::io;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const CONTENT_LENGTH: &str = "Content-Length";

/// Upper bound for a single payload.
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;
const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("header block exceeds {MAX_HEADER_BYTES} bytes")]
    HeaderTooLarge,
    #[error("frame of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
    #[error("invalid utf-8 in frame")]
    InvalidUtf8,
}

/// Incremental decoder for `Content-Length: N\r\n\r\n<payload>` frames.
///
/// Bytes may arrive in arbitrary chunks; `next_frame` yields complete
/// payloads in order and keeps any trailing partial frame buffered.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending_length: Option<usize>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet returned as a frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Result<Option<String>, FrameError> {
        if self.pending_length.is_none() {
            let Some((header_len, consumed)) = header_end(&self.buffer) else {
                if self.buffer.len() > MAX_HEADER_BYTES {
                    return Err(FrameError::HeaderTooLarge);
                }
                return Ok(None);
            };
            let content_length = parse_content_length(&self.buffer[..header_len]);
            self.buffer.drain(..consumed);
            let length = content_length.ok_or(FrameError::MissingContentLength)?;
            if length > MAX_FRAME_BYTES {
                return Err(FrameError::TooLarge(length));
            }
            self.pending_length = Some(length);
        }

        let Some(length) = self.pending_length else {
            return Ok(None);
        };
        if self.buffer.len() < length {
            return Ok(None);
        }
        let payload: Vec<u8> = self.buffer.drain(..length).collect();
        self.pending_length = None;
        String::from_utf8(payload)
            .map(Some)
            .map_err(|_| FrameError::InvalidUtf8)
    }
}

/// Returns `(header_len, consumed)` once an empty line terminates the headers.
fn header_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (index, byte) in buffer.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line = &buffer[line_start..index];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return Some((line_start, index + 1));
        }
        line_start = index + 1;
    }
    None
}

fn parse_content_length(header: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(header);
    let mut content_length = None;
    for line in text.lines() {
        let trimmed = line.trim_end_matches('\r');
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                if let Ok(length) = value.trim().parse::<usize>() {
                    content_length = Some(length);
                }
            }
        }
    }
    content_length
}

#[must_use]
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload.as_bytes());
    frame
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &str) -> io::Result<()> {
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_frames_split_across_chunks() {
        let first = r#"{"type":"acknowledged","req":1}"#;
        let second = r#"{"type":"cancel","req":2}"#;
        let mut bytes = encode_frame(first);
        bytes.extend(encode_frame(second));

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(5) {
            decoder.push(chunk);
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![first.to_string(), second.to_string()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn accepts_bare_newlines_and_extra_headers() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"content-length: 2\nContent-Type: application/json\n\n{}");
        assert_eq!(decoder.next_frame().unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn rejects_missing_length() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Type: text/plain\r\n\r\n{}");
        assert_eq!(
            decoder.next_frame(),
            Err(FrameError::MissingContentLength)
        );
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.push(format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1).as_bytes());
        assert_eq!(
            decoder.next_frame(),
            Err(FrameError::TooLarge(MAX_FRAME_BYTES + 1))
        );
    }

    #[tokio::test]
    async fn write_frame_emits_header() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, "{\"a\":1}").await.unwrap();
        assert_eq!(buffer, b"Content-Length: 7\r\n\r\n{\"a\":1}");
    }
}
