// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error taxonomy.
//!
//! Outcomes delivered to callbacks and upcalls across the transport and the
//! mDNS publisher. The enum is `Clone` so a single outcome can fan out to
//! every callback joined on a coalesced registration; I/O failures are
//! carried as rendered strings for the same reason.

use thiserror::Error;

/// Errors reported by the DSO transport and the mDNS publisher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Operation invoked outside its precondition (e.g. publish before the
    /// publisher is ready, connect on an already-connected connection).
    #[error("invalid state")]
    InvalidState,

    /// Malformed input (e.g. oversized TXT entry, unknown host name).
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    /// The backend reported a name conflict for a registration.
    #[error("name duplicated")]
    Duplicated,

    /// Resolve or subscribe failed because no matching record exists.
    #[error("not found")]
    NotFound,

    /// A pending registration was superseded or the publisher was torn down.
    #[error("aborted")]
    Aborted,

    /// Any other mDNS backend failure. The backend-specific detail is logged
    /// and carried here as text.
    #[error("mDNS error: {0}")]
    Mdns(String),

    /// Socket-level failure during connect, send or receive.
    #[error("transport failed: {0}")]
    Transport(String),
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::InvalidState.to_string(), "invalid state");
        assert!(Error::InvalidArgs("bad txt".into())
            .to_string()
            .contains("bad txt"));
        assert!(Error::Transport("broken pipe".into())
            .to_string()
            .contains("broken pipe"));
    }

    #[test]
    fn test_error_is_cloneable() {
        let err = Error::Mdns("daemon gone".into());
        assert_eq!(err.clone(), err);
    }
}
