//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → middleware/access_control.rs (access gate)
//!     → /api/exec                      → exec::bridge (websocket terminal)
//!     → anything else → route table    → forward.rs (reverse proxy)
//!     → Send to client
//! ```

pub mod forward;
pub mod middleware;
pub mod request;
pub mod server;

pub use forward::Forwarder;
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
