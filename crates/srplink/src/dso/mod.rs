// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DSO transport (DNS Stateful Operations, RFC 8490).
//!
//! A long-lived, stateful TCP transport carrying length-prefixed DNS
//! messages between SRPL peers, non-blocking throughout:
//!
//! ```text
//! +----------------------------------------------------------+
//! |                       DsoTransport                       |
//! |  +----------------+  +------------------------------+    |
//! |  |    Listener    |  | HashMap<ConnectionId, Conn>  |    |
//! |  +----------------+  +------------------------------+    |
//! +----------------------------|-----------------------------+
//! |                      DsoConnection                       |
//! |  +-------------+ +-------------+ +------------------+    |
//! |  |  DsoStream  | | FrameCodec  | | ConnectionState  |    |
//! |  +-------------+ +-------------+ +------------------+    |
//! +----------------------------------------------------------+
//! ```
//!
//! The DNS protocol engine sits on top through the [`DnsHost`] trait: it
//! hands out connection handles, decides whether to accept incoming peers,
//! and consumes connected/receive/disconnected upcalls.

pub mod connection;
pub mod frame;
pub mod host;
pub mod stream;
pub mod transport;

pub use connection::{ConnectionState, DsoConnection};
pub use frame::{FrameCodec, FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};
pub use host::{ConnectionId, DisconnectMode, DnsHost};
pub use stream::DsoStream;
pub use transport::{DsoAgent, DsoTransport, DsoTransportConfig, DSO_BACKLOG, DSO_PORT};
