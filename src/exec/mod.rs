//! Interactive exec subsystem.
//!
//! # Data Flow
//! ```text
//! Browser websocket (GET /api/exec?id=&cmd=&w=&h=)
//!     → bridge.rs (parse parameters, upgrade, pump frames)
//!     → engine.rs (create exec, dial, upgrade handshake, resize)
//!     → hijack.rs (raw socket ownership, duplex relay)
//!     → session.rs (parameters, state machine)
//! ```
//!
//! # Design Decisions
//! - One hijacked socket per session, owned by exactly one value
//! - Either side closing ends the session and releases the socket
//! - Resizes travel on separate requests, last one wins

use std::io;
use std::time::Duration;

use crate::net::TransportError;
use crate::resilience::TimedOut;

pub mod bridge;
pub mod engine;
pub mod hijack;
pub mod session;

pub use bridge::{exec_handler, ExecQuery};
pub use engine::HijackEngine;
pub use hijack::{HijackedConnection, RelayEnd, RelayStats};
pub use session::{ExecSession, ExecState, SessionState, TerminalSize};

/// Errors from the exec lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum HijackError {
    /// Dialing the cluster failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A request to the cluster failed in flight.
    #[error("cluster request failed: {0}")]
    Upstream(String),

    /// A setup stage exceeded its deadline.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// The cluster answered with a status the stage cannot accept.
    #[error("cluster answered {status} to exec {stage}: {message}")]
    UnexpectedStatus {
        stage: &'static str,
        status: u16,
        message: String,
    },

    /// Malformed response from the cluster.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Caller supplied unusable session parameters.
    #[error("{0}")]
    InvalidSession(String),

    /// A relay direction failed mid-session.
    #[error("session torn down: {0}")]
    Teardown(#[source] io::Error),
}

impl From<TimedOut> for HijackError {
    fn from(e: TimedOut) -> Self {
        HijackError::Timeout {
            stage: e.stage,
            after: e.after,
        }
    }
}
