//! Line decoding for newline-delimited serial text
//!
//! Bytes arrive in arbitrary chunks. They are buffered until a `\n` is seen and
//! only complete lines are decoded, always as UTF-8. A multi-byte character can
//! never contain `0x0A`, so chunk boundaries cannot change the decoded text.

use crate::error::DecodeError;
use log::warn;

const LINE_TERMINATOR: u8 = b'\n';

/// Observable state of the decode buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Nothing buffered
    Empty,
    /// Bytes buffered but no terminator yet
    Accumulating,
    /// At least one complete line can be taken with `next_line`
    LineReady,
}

/// Counters kept over the decoder's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Lines returned by `next_line`
    pub lines: u64,
    /// Bytes dropped because they were not valid UTF-8
    pub malformed_bytes: u64,
    /// Lines discarded for exceeding the configured maximum length
    pub overflows: u64,
}

/// Turns a stream of byte chunks into complete text lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_line_length: Option<usize>,
    /// Set after an overflow until the terminator of the oversized line arrives
    discarding: bool,
    stats: DecoderStats,
}

impl LineDecoder {
    /// Create a decoder with no bound on pending line length
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            ..Default::default()
        }
    }

    /// Create a decoder that discards lines longer than `limit` bytes
    pub fn with_max_line_length(limit: usize) -> Self {
        Self {
            max_line_length: Some(limit),
            ..Self::new()
        }
    }

    /// Append received bytes to the buffer
    pub fn feed(&mut self, mut bytes: &[u8]) {
        if self.discarding {
            match bytes.iter().position(|&b| b == LINE_TERMINATOR) {
                Some(end) => {
                    bytes = &bytes[end + 1..];
                    self.discarding = false;
                }
                None => return,
            }
        }

        self.buffer.extend_from_slice(bytes);
        self.enforce_limit();
    }

    /// Take the next complete line, without its terminator
    ///
    /// Returns `None` and leaves the buffer untouched while no terminator is
    /// buffered. Call repeatedly after each `feed` until it returns `None`.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.buffer.iter().position(|&b| b == LINE_TERMINATOR)?;
            let mut raw: Vec<u8> = self.buffer.drain(..=end).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }

            if let Some(limit) = self.max_line_length {
                if raw.len() > limit {
                    self.stats.overflows += 1;
                    warn!("{}", DecodeError::LineTooLong { limit });
                    continue;
                }
            }

            let (text, errors) = decode_utf8(&raw);
            for err in errors {
                if let DecodeError::InvalidSequence { len, .. } = err {
                    self.stats.malformed_bytes += len as u64;
                }
                warn!("{}", err);
            }

            self.stats.lines += 1;
            return Some(text);
        }
    }

    /// Current buffer state
    pub fn state(&self) -> DecoderState {
        if self.buffer.is_empty() {
            DecoderState::Empty
        } else if self.buffer.contains(&LINE_TERMINATOR) {
            DecoderState::LineReady
        } else {
            DecoderState::Accumulating
        }
    }

    /// Number of buffered bytes not yet returned as lines
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop the unterminated tail once it grows past the limit
    fn enforce_limit(&mut self) {
        let Some(limit) = self.max_line_length else {
            return;
        };

        let tail_start = self
            .buffer
            .iter()
            .rposition(|&b| b == LINE_TERMINATOR)
            .map_or(0, |pos| pos + 1);

        if self.buffer.len() - tail_start > limit {
            self.buffer.truncate(tail_start);
            self.discarding = true;
            self.stats.overflows += 1;
            warn!("{}", DecodeError::LineTooLong { limit });
        }
    }
}

/// Decode bytes as UTF-8, dropping malformed sequences
///
/// Decoding resumes right after each invalid sequence; every dropped fragment
/// is reported as a `DecodeError::InvalidSequence`.
pub fn decode_utf8(bytes: &[u8]) -> (String, Vec<DecodeError>) {
    let mut text = String::with_capacity(bytes.len());
    let mut errors = Vec::new();
    let mut offset = 0;
    let mut rest = bytes;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&rest[..valid_up_to]) {
                    text.push_str(valid);
                }

                // A sequence cut short by the end of the line has no error_len
                let len = e.error_len().unwrap_or(rest.len() - valid_up_to);
                errors.push(DecodeError::InvalidSequence {
                    offset: offset + valid_up_to,
                    len,
                });

                let skip = valid_up_to + len;
                offset += skip;
                rest = &rest[skip..];
            }
        }
    }

    (text, errors)
}
