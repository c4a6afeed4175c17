// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-stream abstraction for DSO connections.
//!
//! Unifies real TCP streams and test mocks so the connection layer can be
//! exercised without sockets. The trait is designed for non-blocking I/O.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// Abstraction over the byte stream beneath a DSO connection.
pub trait DsoStream: Read + Write {
    /// Set non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Arrange for the close to reset the peer (zero linger, RST on drop).
    fn abort(&mut self) -> io::Result<()>;

    /// Orderly shutdown (FIN).
    fn shutdown(&mut self) -> io::Result<()>;

    /// Raw fd for mainloop registration.
    fn as_raw_fd(&self) -> RawFd;
}

impl DsoStream for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn abort(&mut self) -> io::Result<()> {
        socket2::SockRef::from(&*self).set_linger(Some(Duration::from_secs(0)))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn as_raw_fd(&self) -> RawFd {
        AsRawFd::as_raw_fd(self)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Shared side of a [`MockStream`], kept by the test after the stream
    /// itself is boxed into a connection.
    #[derive(Debug, Default)]
    pub struct MockState {
        pub read_data: VecDeque<u8>,
        pub write_data: Vec<u8>,
        pub connected: bool,
        pub read_error: Option<io::ErrorKind>,
        pub write_error: Option<io::ErrorKind>,
        pub aborted: bool,
        pub shut_down: bool,
        /// Cap on how many bytes a single write accepts (0 = unlimited).
        pub write_limit: usize,
    }

    /// Mock byte stream with data feeding and error injection.
    #[derive(Debug, Clone)]
    pub struct MockStream {
        state: Rc<RefCell<MockState>>,
    }

    impl MockStream {
        pub fn new() -> Self {
            Self {
                state: Rc::new(RefCell::new(MockState {
                    connected: true,
                    ..MockState::default()
                })),
            }
        }

        /// Handle to the shared state, usable after the stream is boxed.
        pub fn handle(&self) -> Rc<RefCell<MockState>> {
            Rc::clone(&self.state)
        }

        pub fn feed_read_data(&self, data: &[u8]) {
            self.state.borrow_mut().read_data.extend(data);
        }

        pub fn written(&self) -> Vec<u8> {
            self.state.borrow().write_data.clone()
        }

        pub fn inject_read_error(&self, kind: io::ErrorKind) {
            self.state.borrow_mut().read_error = Some(kind);
        }

        pub fn inject_write_error(&self, kind: io::ErrorKind) {
            self.state.borrow_mut().write_error = Some(kind);
        }

        pub fn disconnect(&self) {
            self.state.borrow_mut().connected = false;
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.state.borrow_mut();
            if let Some(kind) = state.read_error.take() {
                return Err(io::Error::new(kind, "injected error"));
            }
            if state.read_data.is_empty() {
                if !state.connected {
                    return Ok(0); // EOF
                }
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
            }
            let n = buf.len().min(state.read_data.len());
            for (i, byte) in state.read_data.drain(..n).enumerate() {
                buf[i] = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut state = self.state.borrow_mut();
            if let Some(kind) = state.write_error.take() {
                return Err(io::Error::new(kind, "injected error"));
            }
            if !state.connected {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "not connected"));
            }
            let n = if state.write_limit == 0 {
                buf.len()
            } else {
                buf.len().min(state.write_limit)
            };
            state.write_data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl DsoStream for MockStream {
        fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
            Ok(())
        }

        fn abort(&mut self) -> io::Result<()> {
            self.state.borrow_mut().aborted = true;
            Ok(())
        }

        fn shutdown(&mut self) -> io::Result<()> {
            self.state.borrow_mut().shut_down = true;
            Ok(())
        }

        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }
}
