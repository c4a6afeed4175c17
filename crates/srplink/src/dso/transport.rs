// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DSO transport agent.
//!
//! Owns the listening socket and every [`DsoConnection`], dispatches the
//! accept loop, and exposes the platform API the DNS host drives:
//! enable listening, connect, send, disconnect.
//!
//! The process step iterates over a snapshot of the connection handles so an
//! upcall (e.g. an `on_receive` handler that disconnects its own connection)
//! may remove entries from the map mid-iteration.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6, TcpListener};
use std::os::unix::io::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mainloop::{MainloopContext, MainloopProcessor};

use super::connection::{DrainOutcome, DsoConnection};
use super::host::{ConnectionId, DisconnectMode, DnsHost};

/// DSO listening port (DNS-over-TCP port reused by DSO, RFC 8490).
pub const DSO_PORT: u16 = 853;

/// Listen backlog for incoming DSO sessions.
pub const DSO_BACKLOG: i32 = 10;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct DsoTransportConfig {
    /// Port the listener binds to. Port 0 picks an ephemeral port (tests).
    pub port: u16,

    /// Listen backlog.
    pub backlog: i32,

    /// Infrastructure network interface the listener binds to
    /// (SO_BINDTODEVICE). `None` leaves the socket unbound to a device.
    pub infra_if_name: Option<String>,
}

impl Default for DsoTransportConfig {
    fn default() -> Self {
        Self {
            port: DSO_PORT,
            backlog: DSO_BACKLOG,
            infra_if_name: None,
        }
    }
}

/// The transport agent: listener plus owned connections.
pub struct DsoTransport {
    config: DsoTransportConfig,
    listener: Option<TcpListener>,
    listening_enabled: bool,
    connections: HashMap<ConnectionId, DsoConnection>,
}

impl DsoTransport {
    pub fn new(config: DsoTransportConfig) -> Self {
        Self {
            config,
            listener: None,
            listening_enabled: false,
            connections: HashMap::new(),
        }
    }

    /// Enable or disable the listening socket. Idempotent.
    ///
    /// Disabling drops every connection forcibly. A bind/listen failure
    /// leaves listening disabled; no retry is attempted at this layer.
    pub fn enable_listening(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.listening_enabled {
            return Ok(());
        }
        if enabled {
            let listener = self.create_listener().map_err(|e| {
                warn!("failed to set up DSO listener: {}", e);
                Error::Transport(e.to_string())
            })?;
            info!(
                "DSO listening on {} (interface {:?})",
                listener
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "?".into()),
                self.config.infra_if_name
            );
            self.listener = Some(listener);
            self.listening_enabled = true;
        } else {
            info!("DSO listening disabled");
            self.listener = None;
            self.listening_enabled = false;
            let mut connections = std::mem::take(&mut self.connections);
            for (id, conn) in connections.iter_mut() {
                debug!("dropping connection {:?} to {}", id, conn.peer());
                conn.close(DisconnectMode::ForciblyAbort);
            }
        }
        Ok(())
    }

    fn create_listener(&self) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        set_reuseport(&socket)?;
        if let Some(ifname) = &self.config.infra_if_name {
            bind_to_device(&socket, ifname)?;
        }
        let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, self.config.port, 0, 0);
        socket.bind(&SocketAddr::V6(addr).into())?;
        socket.listen(self.config.backlog)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    pub fn is_listening(&self) -> bool {
        self.listening_enabled
    }

    /// Address the listener is bound to, when listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn has_connection(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Establish an outgoing connection for `id` and deliver `on_connected`
    /// synchronously on success. On failure the entry stays Idle.
    pub fn connect(
        &mut self,
        host: &mut dyn DnsHost,
        id: ConnectionId,
        peer: SocketAddrV6,
    ) -> Result<()> {
        let conn = self
            .connections
            .entry(id)
            .or_insert_with(|| DsoConnection::new(peer));
        conn.set_peer(peer);
        let result = conn.connect();
        match result {
            Ok(()) => {
                info!("connected to DSO peer {}", peer);
                host.on_connected(self, id);
                Ok(())
            }
            Err(e) => {
                warn!("failed to connect to DSO peer {}: {}", peer, e);
                Err(e)
            }
        }
    }

    /// Send one message on `id`. The message is consumed regardless of the
    /// outcome; a transport fault tears the connection down and notifies the
    /// host through the disconnected path.
    pub fn send(&mut self, host: &mut dyn DnsHost, id: ConnectionId, message: Vec<u8>) {
        let result = match self.connections.get_mut(&id) {
            Some(conn) => conn.send(&message),
            None => {
                debug!("send on unknown connection {:?}", id);
                return;
            }
        };
        if let Err(e) = result {
            warn!("send failed on {:?}: {}", id, e);
            self.teardown(host, id, DisconnectMode::ForciblyAbort);
        }
    }

    /// Disconnect `id`. Silent per the host contract: no `on_disconnected`
    /// upcall for host-initiated disconnects. A no-op for unknown handles.
    pub fn disconnect(&mut self, id: ConnectionId, mode: DisconnectMode) {
        if let Some(mut conn) = self.connections.remove(&id) {
            info!("disconnecting {:?} ({:?})", id, mode);
            conn.close(mode);
        }
    }

    /// Contribute the listener and every connection fd to the interest set.
    pub fn update(&mut self, ctx: &mut MainloopContext) {
        if let Some(listener) = &self.listener {
            ctx.add_readable(listener.as_raw_fd());
        }
        for conn in self.connections.values() {
            if let Some(fd) = conn.raw_fd() {
                ctx.add_readable(fd);
            }
        }
    }

    /// One mainloop tick: drive every connection through receive, then
    /// accept pending incoming connections.
    pub fn process(&mut self, _ctx: &MainloopContext, host: &mut dyn DnsHost) {
        self.process_connections(host);
        self.accept_incoming(host);
    }

    fn process_connections(&mut self, host: &mut dyn DnsHost) {
        // Snapshot the handles: upcalls may remove entries mid-iteration.
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            let conn = match self.connections.get_mut(&id) {
                Some(conn) => conn,
                None => continue, // removed by an earlier upcall
            };
            let (messages, outcome) = conn.drain();
            for message in messages {
                if !self.connections.contains_key(&id) {
                    // The host disconnected this session from a previous
                    // upcall; the remaining reassembled messages are dropped.
                    break;
                }
                host.on_receive(self, id, message);
            }
            match outcome {
                DrainOutcome::Idle => {}
                DrainOutcome::Eof => {
                    debug!("peer closed {:?}", id);
                    self.teardown(host, id, DisconnectMode::GracefullyClose);
                }
                DrainOutcome::ZeroLength => {
                    warn!("zero-length frame on {:?}, aborting", id);
                    self.teardown(host, id, DisconnectMode::ForciblyAbort);
                }
                DrainOutcome::Fault(e) => {
                    warn!("receive failed on {:?}: {}", id, e);
                    self.teardown(host, id, DisconnectMode::ForciblyAbort);
                }
            }
        }
    }

    /// Transport-detected teardown: close, drop, and notify the host.
    fn teardown(&mut self, host: &mut dyn DnsHost, id: ConnectionId, mode: DisconnectMode) {
        if let Some(mut conn) = self.connections.remove(&id) {
            conn.close(mode);
            host.on_disconnected(self, id, mode);
        }
    }

    fn accept_incoming(&mut self, host: &mut dyn DnsHost) {
        if !self.listening_enabled {
            return;
        }
        loop {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let peer = match addr {
                        SocketAddr::V6(v6) if v6.ip().to_ipv4_mapped().is_none() => v6,
                        other => {
                            info!("dropping non-IPv6 peer {}", other);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("failed to make accepted socket non-blocking: {}", e);
                        continue;
                    }
                    match host.on_accept(peer) {
                        Some(id) => {
                            info!("accepted DSO peer {} as {:?}", peer, id);
                            if self
                                .connections
                                .insert(id, DsoConnection::accepted(peer, Box::new(stream)))
                                .is_some()
                            {
                                warn!("handle {:?} reused, replacing old connection", id);
                            }
                            host.on_connected(self, id);
                        }
                        None => {
                            info!("host rejected connection from {}", peer);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    return;
                }
            }
        }
    }
}

impl Drop for DsoTransport {
    fn drop(&mut self) {
        for conn in self.connections.values_mut() {
            conn.close(DisconnectMode::ForciblyAbort);
        }
    }
}

/// A transport paired with its DNS host, registrable with the mainloop.
pub struct DsoAgent<H: DnsHost> {
    pub transport: DsoTransport,
    pub host: H,
}

impl<H: DnsHost> DsoAgent<H> {
    pub fn new(config: DsoTransportConfig, host: H) -> Self {
        Self {
            transport: DsoTransport::new(config),
            host,
        }
    }
}

impl<H: DnsHost> MainloopProcessor for DsoAgent<H> {
    fn update(&mut self, ctx: &mut MainloopContext) {
        self.transport.update(ctx);
    }

    fn process(&mut self, ctx: &MainloopContext) {
        self.transport.process(ctx, &mut self.host);
    }
}

/// Set SO_REUSEPORT so an agent restart can rebind while old sockets drain.
#[cfg(unix)]
fn set_reuseport(socket: &Socket) -> io::Result<()> {
    let fd = socket.as_raw_fd();
    let optval: libc::c_int = 1;
    // SAFETY: setsockopt FFI with a valid fd, standard socket option, and
    // correctly sized optval pointer
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Bind the socket to the infrastructure network interface by name.
#[cfg(unix)]
fn bind_to_device(socket: &Socket, ifname: &str) -> io::Result<()> {
    let fd = socket.as_raw_fd();
    // SAFETY: setsockopt FFI with a valid fd; the kernel copies at most
    // `ifname.len()` bytes of the interface name
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            ifname.as_ptr() as *const libc::c_void,
            ifname.len() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
