// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mainloop integration.
//!
//! All subsystems run on one thread driven by a select-style mainloop. Each
//! iteration the loop asks every registered [`MainloopProcessor`] to
//! contribute its interesting file descriptors and its earliest deadline via
//! [`MainloopProcessor::update`], blocks in `poll(2)`, and then hands the
//! ready set back through [`MainloopProcessor::process`].
//!
//! Backend timers are absolute deadlines; `update` converts them to the
//! remaining delta and takes the minimum with the currently proposed timeout.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interest sets and shared timeout for one mainloop iteration.
pub struct MainloopContext {
    fds: Vec<libc::pollfd>,
    timeout: Duration,
}

impl MainloopContext {
    /// Create a context with the maximum poll timeout for this iteration.
    pub fn new(max_timeout: Duration) -> Self {
        Self {
            fds: Vec::new(),
            timeout: max_timeout,
        }
    }

    fn entry(&mut self, fd: RawFd) -> &mut libc::pollfd {
        let pos = match self.fds.iter().position(|p| p.fd == fd) {
            Some(pos) => pos,
            None => {
                self.fds.push(libc::pollfd {
                    fd,
                    events: 0,
                    revents: 0,
                });
                self.fds.len() - 1
            }
        };
        &mut self.fds[pos]
    }

    /// Register interest in readability of `fd`.
    pub fn add_readable(&mut self, fd: RawFd) {
        self.entry(fd).events |= libc::POLLIN;
    }

    /// Register interest in writability of `fd`.
    pub fn add_writable(&mut self, fd: RawFd) {
        self.entry(fd).events |= libc::POLLOUT;
    }

    /// Lower the shared timeout to `timeout` if it is earlier.
    pub fn lower_timeout(&mut self, timeout: Duration) {
        if timeout < self.timeout {
            self.timeout = timeout;
        }
    }

    /// Lower the shared timeout so the loop wakes no later than `deadline`.
    pub fn lower_timeout_until(&mut self, deadline: Instant) {
        self.lower_timeout(deadline.saturating_duration_since(Instant::now()));
    }

    /// The currently proposed timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until an fd is ready or the timeout elapses.
    ///
    /// Returns the number of ready descriptors. An interrupted wait counts
    /// as zero ready descriptors.
    pub fn poll(&mut self) -> io::Result<usize> {
        let timeout_ms = self.timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: poll(2) FFI over a valid, owned pollfd slice; the kernel
        // only writes `revents` within the given length.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(rc as usize)
    }

    fn revents(&self, fd: RawFd) -> libc::c_short {
        self.fds
            .iter()
            .find(|p| p.fd == fd)
            .map(|p| p.revents)
            .unwrap_or(0)
    }

    /// Whether `fd` became readable (or hit an error/hangup) in this
    /// iteration.
    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.revents(fd) & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0
    }

    /// Whether `fd` became writable in this iteration.
    pub fn is_writable(&self, fd: RawFd) -> bool {
        self.revents(fd) & libc::POLLOUT != 0
    }
}

/// A subsystem driven by the shared mainloop.
pub trait MainloopProcessor {
    /// Contribute interesting fds and deadlines for the coming wait.
    fn update(&mut self, ctx: &mut MainloopContext);

    /// Handle the ready set after the wait returned.
    fn process(&mut self, ctx: &MainloopContext);
}

/// Minimal driver for a set of mainloop processors.
pub struct MainloopManager {
    should_break: Arc<AtomicBool>,
}

impl MainloopManager {
    pub fn new() -> Self {
        Self {
            should_break: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A flag that force-breaks [`MainloopManager::run`]. Safe to flip from
    /// another thread (e.g. a signal handler shim).
    pub fn break_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_break)
    }

    /// Run a single update/poll/process iteration.
    pub fn run_once(
        processors: &mut [&mut dyn MainloopProcessor],
        max_poll: Duration,
    ) -> io::Result<()> {
        let mut ctx = MainloopContext::new(max_poll);
        for processor in processors.iter_mut() {
            processor.update(&mut ctx);
        }
        ctx.poll()?;
        for processor in processors.iter_mut() {
            processor.process(&ctx);
        }
        Ok(())
    }

    /// Run iterations until the break flag is raised or `poll` fails.
    pub fn run(
        &self,
        processors: &mut [&mut dyn MainloopProcessor],
        max_poll: Duration,
    ) -> io::Result<()> {
        while !self.should_break.load(Ordering::SeqCst) {
            Self::run_once(processors, max_poll)?;
        }
        Ok(())
    }
}

impl Default for MainloopManager {
    fn default() -> Self {
        Self::new()
    }
}
