// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # srplink - border-router SRPL transport and discovery core
//!
//! Two tightly-coupled pieces of DNS-adjacent infrastructure used by SRP
//! Replication (SRPL) peers:
//!
//! - **DSO transport** ([`dso`]) - a long-lived, stateful TCP transport
//!   carrying length-prefixed DNS messages (RFC 8490), supporting outgoing
//!   and incoming connections on the infrastructure interface, non-blocking
//!   throughout.
//! - **SRPL DNS-SD** ([`mdns`], [`srpl`]) - advertises the local
//!   `_srpl-tls._tcp` instance, browses for remote peers, resolves them to
//!   IPv6 addresses, and reports add/remove events to the replication
//!   engine.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                   SRP Replication engine                     |
//! |            (ReplicationEngine / DnsHost traits)              |
//! +-------------------+---------------------+--------------------+
//! |     SrplDnssd     |      Publisher      |    DsoTransport    |
//! |  (controller)     |  (ledger + backend) |  (conns + accept)  |
//! +-------------------+---------------------+--------------------+
//! |                    Mainloop integration                      |
//! |        update(fds, timeout) / poll / process(ready)          |
//! +--------------------------------------------------------------+
//! ```
//!
//! Everything runs single-threaded and cooperative: subsystems contribute
//! fds and deadlines to the shared select-style mainloop and do all their
//! work synchronously inside `process()`.

pub mod dso;
pub mod error;
pub mod mainloop;
pub mod mdns;
pub mod srpl;

pub use error::{Error, Result};
