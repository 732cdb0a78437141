//! Network layer towards the cluster manager.
//!
//! # Data Flow
//! ```text
//! GatewayConfig.cluster
//!     → transport.rs (endpoint parse, plain/TLS selection, dial)
//!     → tls.rs (rustls client config from PEM files)
//!     → connector.rs (hyper client over the same dial path)
//!     → connection.rs (hijacked session tracking)
//! ```
//!
//! # Design Decisions
//! - Transport is chosen once at startup and never changes
//! - No connection pooling; every request and hijack dials fresh

pub mod connection;
pub mod connector;
pub mod tls;
pub mod transport;

pub use connection::{SessionGuard, SessionId, SessionTracker};
pub use connector::{build_client, ClusterClient, ClusterConnector};
pub use transport::{ClusterEndpoint, ClusterStream, Transport, TransportError};
