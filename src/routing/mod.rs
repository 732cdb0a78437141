//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → table.rs (route lookup, first match wins)
//!     → pattern.rs (segment matching, named and greedy captures)
//!     → Return: matched handler + captured params, or None
//!
//! Route Compilation (at startup):
//!     (method, template)[]
//!     → Parse templates
//!     → Duplicate under /v{version}
//!     → Wrap with CORS if enabled
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route

pub mod pattern;
pub mod table;

pub use pattern::{PathPattern, PatternError};
pub use table::{
    cluster_routes, is_interactive, RouteEntry, RouteHandler, RouteMatch, RouteParams, RouteTable,
    EXEC_ENDPOINT,
};
