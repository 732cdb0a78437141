//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Forwarded request:
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Pass to the cluster
//! Routed response:
//!     → headers.rs (CORS when enabled)
//! ```
//!
//! # Design Decisions
//! - No trust in client input: hop-by-hop headers never cross the gateway
//! - Authentication lives in the manager, not here

pub mod headers;
