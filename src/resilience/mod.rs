//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Exec create / handshake / resize:
//!     → timeouts.rs (deadline per stage)
//!     → On failure: surfaced to the caller, never retried
//! ```
//!
//! # Design Decisions
//! - Every setup call towards the cluster has a deadline
//! - No retries: exec sessions are not idempotent, forwarded calls are
//!   retried by their callers if at all

pub mod timeouts;

pub use timeouts::{within, TimedOut};
