//! Streaming line codec
//!
//! SCPI messages are ASCII lines terminated by `\n` (optionally preceded by
//! `\r`). Replies can arrive split across several reads, so the codec keeps
//! partial data buffered until a terminator shows up.

use crate::error::ParseError;

/// Default maximum line length (trace dumps can be long)
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Streaming SCPI line codec
#[derive(Debug)]
pub struct LineCodec {
    buffer: Vec<u8>,
    max_line_len: usize,
    /// Set while dropping the remainder of an oversized line
    discarding: bool,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a codec with the default maximum line length
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    /// Create a codec with a custom maximum line length
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            max_line_len: max_line_len.max(1),
            discarding: false,
        }
    }

    /// Push raw bytes into the codec's buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as a line
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Try to extract the next complete line from the buffer
    ///
    /// Returns `None` when no complete line is buffered yet. An oversized
    /// line is reported once as [`ParseError::LineTooLong`]; its remaining
    /// bytes are dropped up to the next terminator.
    pub fn next_line(&mut self) -> Option<Result<String, ParseError>> {
        loop {
            let Some(term_pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > self.max_line_len {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    if !self.discarding {
                        self.discarding = true;
                        return Some(Err(ParseError::LineTooLong {
                            len,
                            max: self.max_line_len,
                        }));
                    }
                }
                return None;
            };

            let line_bytes: Vec<u8> = self.buffer.drain(..=term_pos).collect();

            if self.discarding {
                // Tail of an oversized line that was already reported
                self.discarding = false;
                continue;
            }

            let mut end = line_bytes.len() - 1;
            if end > 0 && line_bytes[end - 1] == b'\r' {
                end -= 1;
            }

            if end > self.max_line_len {
                return Some(Err(ParseError::LineTooLong {
                    len: end,
                    max: self.max_line_len,
                }));
            }

            return Some(Ok(String::from_utf8_lossy(&line_bytes[..end]).into_owned()));
        }
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

/// Encode a command line with its terminator
pub fn encode_line(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.trim_end_matches(['\r', '\n']).as_bytes());
    bytes.push(b'\n');
    bytes
}
