// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Platform API between the transport and the DNS protocol engine.
//!
//! The DNS host owns the logical DSO sessions; the transport identifies them
//! by the opaque [`ConnectionId`] the host hands out. Upcalls receive a
//! mutable reference to the transport so a handler may re-enter it (for
//! example, an `on_receive` handler is free to call
//! [`DsoTransport::disconnect`] on its own connection).

use std::net::SocketAddrV6;

use super::transport::DsoTransport;

/// Opaque handle for a logical DSO connection, issued by the DNS host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// How a connection is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectMode {
    /// TCP RST: zero linger before close.
    ForciblyAbort,
    /// Orderly FIN shutdown.
    GracefullyClose,
}

/// Upcall surface implemented by the DNS protocol engine.
pub trait DnsHost {
    /// An incoming connection arrived from `peer`. Return a fresh handle to
    /// accept it, or `None` to reject (the transport closes the socket).
    fn on_accept(&mut self, peer: SocketAddrV6) -> Option<ConnectionId>;

    /// The connection identified by `id` is established.
    fn on_connected(&mut self, transport: &mut DsoTransport, id: ConnectionId);

    /// A complete DSO message arrived on `id`. Ownership of the payload
    /// transfers to the host.
    fn on_receive(&mut self, transport: &mut DsoTransport, id: ConnectionId, message: Vec<u8>);

    /// The transport detected a close or fault on `id`. Never delivered for
    /// host-initiated disconnects.
    fn on_disconnected(&mut self, transport: &mut DsoTransport, id: ConnectionId, mode: DisconnectMode);
}
