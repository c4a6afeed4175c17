// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer DSO connection.
//!
//! A connection is in exactly one of three states:
//!
//! ```text
//!      +----------+
//!      |   Idle   |  (no socket)
//!      +----+-----+
//!           | connect() / accepted()
//!           v
//!      +----------+
//!      |Connected |  (fd valid, non-blocking)
//!      +----+-----+
//!           | close() or fault/EOF
//!           v
//!      +----------+
//!      |  Closed  |  (terminal; scheduled for removal)
//!      +----------+
//! ```
//!
//! Send semantics are best-effort and non-queued: partial writes are
//! continued in place, a would-block condition is a transport fault. No send
//! queue is kept.

use std::io;
use std::net::{SocketAddr, SocketAddrV6, TcpStream};
use std::os::unix::io::RawFd;

use tracing::debug;

use crate::error::{Error, Result};

use super::frame::{FrameCodec, MAX_FRAME_PAYLOAD};
use super::host::DisconnectMode;
use super::stream::DsoStream;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connected,
    Closed,
}

/// Terminal condition observed while draining the socket.
#[derive(Debug)]
pub(crate) enum DrainOutcome {
    /// The socket would block; nothing more to read for now.
    Idle,
    /// The peer closed the stream.
    Eof,
    /// The peer declared a zero-length frame; the session must be reset.
    ZeroLength,
    /// Any other socket error.
    Fault(io::Error),
}

/// A single DSO connection: framing state plus the underlying stream.
pub struct DsoConnection {
    peer: SocketAddrV6,
    stream: Option<Box<dyn DsoStream>>,
    state: ConnectionState,
    codec: FrameCodec,
}

impl DsoConnection {
    /// New outgoing connection in the Idle state.
    pub(crate) fn new(peer: SocketAddrV6) -> Self {
        Self {
            peer,
            stream: None,
            state: ConnectionState::Idle,
            codec: FrameCodec::new(),
        }
    }

    /// Wrap an accepted, already-established stream.
    pub(crate) fn accepted(peer: SocketAddrV6, stream: Box<dyn DsoStream>) -> Self {
        Self {
            peer,
            stream: Some(stream),
            state: ConnectionState::Connected,
            codec: FrameCodec::new(),
        }
    }

    pub fn peer(&self) -> SocketAddrV6 {
        self.peer
    }

    /// Retarget an Idle connection before a (re)connect attempt.
    pub(crate) fn set_peer(&mut self, peer: SocketAddrV6) {
        if self.state == ConnectionState::Idle {
            self.peer = peer;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    /// Establish the TCP session to the peer.
    ///
    /// The connect itself is blocking (as is the establishment in the mbed
    /// path this replaces); the socket is switched to non-blocking before
    /// any traffic flows.
    pub(crate) fn connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Idle {
            return Err(Error::InvalidState);
        }
        let stream = TcpStream::connect(SocketAddr::V6(self.peer))
            .map_err(|e| Error::Transport(e.to_string()))?;
        stream
            .set_nonblocking(true)
            .map_err(|e| Error::Transport(e.to_string()))?;
        self.stream = Some(Box::new(stream));
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Frame and write one message.
    ///
    /// The payload is consumed by the caller regardless of the outcome.
    pub(crate) fn send(&mut self, message: &[u8]) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(Error::InvalidState);
        }
        if message.len() > MAX_FRAME_PAYLOAD {
            return Err(Error::InvalidArgs(format!(
                "message of {} bytes exceeds the 16-bit length prefix",
                message.len()
            )));
        }
        let frame = FrameCodec::encode(message);
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(Error::InvalidState),
        };

        let mut offset = 0;
        while offset < frame.len() {
            match stream.write(&frame[offset..]) {
                Ok(0) => {
                    return Err(Error::Transport("connection closed during send".into()));
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Non-queued best effort: a full socket buffer is a fault.
                    return Err(Error::Transport("send would block".into()));
                }
                Err(e) => return Err(Error::Transport(e.to_string())),
            }
        }
        debug!("sent DSO message of {} bytes to {}", message.len(), self.peer);
        Ok(())
    }

    /// Drain the socket until it would block, EOF, or an error.
    ///
    /// Returns every message completed during the drain (in arrival order)
    /// together with the terminal condition.
    pub(crate) fn drain(&mut self) -> (Vec<Vec<u8>>, DrainOutcome) {
        let mut messages = Vec::new();
        if self.state != ConnectionState::Connected {
            return (messages, DrainOutcome::Idle);
        }
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return (messages, DrainOutcome::Idle),
        };
        loop {
            match self.codec.decode(&mut **stream) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => return (messages, DrainOutcome::Idle),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return (messages, DrainOutcome::Eof)
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return (messages, DrainOutcome::ZeroLength)
                }
                Err(e) => return (messages, DrainOutcome::Fault(e)),
            }
        }
    }

    /// Release the socket. Forcible abort resets the peer (zero linger), a
    /// graceful close sends FIN. Terminal in either case.
    pub(crate) fn close(&mut self, mode: DisconnectMode) {
        if let Some(mut stream) = self.stream.take() {
            match mode {
                DisconnectMode::ForciblyAbort => {
                    let _ = stream.abort();
                }
                DisconnectMode::GracefullyClose => {
                    let _ = stream.shutdown();
                }
            }
        }
        self.state = ConnectionState::Closed;
    }
}

impl std::fmt::Debug for DsoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsoConnection")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dso::stream::mock::MockStream;
    use std::net::Ipv6Addr;

    fn peer() -> SocketAddrV6 {
        SocketAddrV6::new(Ipv6Addr::LOCALHOST, 853, 0, 0)
    }

    fn connected(stream: MockStream) -> DsoConnection {
        DsoConnection::accepted(peer(), Box::new(stream))
    }

    #[test]
    fn test_send_frames_message() {
        let stream = MockStream::new();
        let state = stream.handle();
        let mut conn = connected(stream);

        conn.send(&[0x00, 0x0C, b'h', b'i']).unwrap();
        assert_eq!(
            state.borrow().write_data,
            vec![0x00, 0x04, 0x00, 0x0C, b'h', b'i']
        );
    }

    #[test]
    fn test_send_continues_partial_writes() {
        let stream = MockStream::new();
        let state = stream.handle();
        state.borrow_mut().write_limit = 1;
        let mut conn = connected(stream);

        conn.send(b"chunked").unwrap();
        assert_eq!(
            state.borrow().write_data,
            FrameCodec::encode(b"chunked")
        );
    }

    #[test]
    fn test_send_requires_connected_state() {
        let mut conn = DsoConnection::new(peer());
        assert_eq!(conn.send(b"x"), Err(Error::InvalidState));
    }

    #[test]
    fn test_send_would_block_is_a_fault() {
        let stream = MockStream::new();
        stream.inject_write_error(io::ErrorKind::WouldBlock);
        let mut conn = connected(stream);
        assert!(matches!(conn.send(b"hello"), Err(Error::Transport(_))));
    }

    #[test]
    fn test_drain_delivers_messages_in_order() {
        let stream = MockStream::new();
        stream.feed_read_data(&FrameCodec::encode(b"first"));
        stream.feed_read_data(&FrameCodec::encode(b"second"));
        let mut conn = connected(stream);

        let (messages, outcome) = conn.drain();
        assert_eq!(messages, vec![b"first".to_vec(), b"second".to_vec()]);
        assert!(matches!(outcome, DrainOutcome::Idle));
        assert!(conn.is_connected());
    }

    #[test]
    fn test_drain_reports_eof_after_last_message() {
        let stream = MockStream::new();
        stream.feed_read_data(&FrameCodec::encode(b"bye"));
        stream.disconnect();
        let mut conn = connected(stream);

        let (messages, outcome) = conn.drain();
        assert_eq!(messages, vec![b"bye".to_vec()]);
        assert!(matches!(outcome, DrainOutcome::Eof));
    }

    #[test]
    fn test_drain_flags_zero_length_frame() {
        let stream = MockStream::new();
        stream.feed_read_data(&[0x00, 0x00]);
        let mut conn = connected(stream);

        let (messages, outcome) = conn.drain();
        assert!(messages.is_empty());
        assert!(matches!(outcome, DrainOutcome::ZeroLength));
    }

    #[test]
    fn test_drain_reports_socket_faults() {
        let stream = MockStream::new();
        stream.inject_read_error(io::ErrorKind::ConnectionReset);
        let mut conn = connected(stream);

        let (_, outcome) = conn.drain();
        assert!(matches!(outcome, DrainOutcome::Fault(_)));
    }

    #[test]
    fn test_forcible_close_resets_the_stream() {
        let stream = MockStream::new();
        let state = stream.handle();
        let mut conn = connected(stream);

        conn.close(DisconnectMode::ForciblyAbort);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(state.borrow().aborted);
        assert!(!state.borrow().shut_down);
    }

    #[test]
    fn test_graceful_close_shuts_down_the_stream() {
        let stream = MockStream::new();
        let state = stream.handle();
        let mut conn = connected(stream);

        conn.close(DisconnectMode::GracefullyClose);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(state.borrow().shut_down);
        assert!(!state.borrow().aborted);
        assert!(conn.raw_fd().is_none());
    }
}
