// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing for DSO messages.
//!
//! TCP is a stream protocol without message boundaries. Each DNS message on
//! a DSO session is preceded by a 2-byte big-endian length (RFC 8490):
//!
//! ```text
//! +----------------+-------------------+
//! | Length (2B BE) | DNS message       |
//! +----------------+-------------------+
//! ```
//!
//! The codec maintains partial read state so a single non-blocking drain can
//! start in the middle of a length prefix, span message bodies, and complete
//! several back-to-back messages.

use std::io::{self, Read};

/// Frame header size (2 bytes for length).
pub const FRAME_HEADER_SIZE: usize = 2;

/// Maximum DSO message payload (the length field is 16 bits).
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Internal state for incremental reading.
///
/// Either up to one length byte has been collected and no body is pending,
/// or the length is known and the body is being filled.
#[derive(Debug, Clone, Copy)]
enum ReadState {
    ReadingLength { have: usize },
    ReadingBody { expected: usize, filled: usize },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::ReadingLength { have: 0 }
    }
}

/// Length-prefix frame codec with partial-read state.
#[derive(Debug, Default)]
pub struct FrameCodec {
    state: ReadState,
    header: [u8; FRAME_HEADER_SIZE],
    body: Vec<u8>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a message into a framed buffer: `[length: u16 BE][payload]`.
    ///
    /// The caller guarantees `payload.len() <= MAX_FRAME_PAYLOAD`.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        debug_assert!(payload.len() <= MAX_FRAME_PAYLOAD);
        let len = payload.len() as u16;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Try to decode one complete message from the reader.
    ///
    /// Returns:
    /// - `Ok(Some(payload))` - a complete message was decoded
    /// - `Ok(None)` - the reader would block; call again when readable
    /// - `Err(e)` - EOF (`UnexpectedEof`), a zero declared length
    ///   (`InvalidData`), or an I/O error
    ///
    /// Designed for non-blocking I/O: call repeatedly while it returns
    /// `Ok(Some(..))` to drain back-to-back messages.
    pub fn decode<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                ReadState::ReadingLength { have } => {
                    match reader.read(&mut self.header[have..]) {
                        Ok(0) => {
                            let detail = if have == 0 {
                                "connection closed"
                            } else {
                                "eof inside length prefix"
                            };
                            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, detail));
                        }
                        Ok(n) => {
                            let total = have + n;
                            if total < FRAME_HEADER_SIZE {
                                self.state = ReadState::ReadingLength { have: total };
                                continue;
                            }
                            let len = u16::from_be_bytes(self.header) as usize;
                            if len == 0 {
                                // A zero declared length is illegal on a DSO
                                // session and forces a forcible teardown.
                                self.state = ReadState::default();
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    "zero-length frame",
                                ));
                            }
                            self.body = vec![0u8; len];
                            self.state = ReadState::ReadingBody {
                                expected: len,
                                filled: 0,
                            };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                ReadState::ReadingBody { expected, filled } => {
                    match reader.read(&mut self.body[filled..]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "eof inside frame body",
                            ));
                        }
                        Ok(n) => {
                            let filled = filled + n;
                            if filled == expected {
                                self.state = ReadState::default();
                                return Ok(Some(std::mem::take(&mut self.body)));
                            }
                            self.state = ReadState::ReadingBody { expected, filled };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Whether the codec sits exactly on a message boundary.
    pub fn at_boundary(&self) -> bool {
        matches!(self.state, ReadState::ReadingLength { have: 0 })
    }
}
