//! Cluster Gateway Library
//!
//! Control-plane HTTP front end for a container-cluster manager: a route
//! table with version aliases, a reverse proxy to the cluster endpoint and
//! a websocket terminal bridge over hijacked exec sockets.

// Core subsystems
pub mod config;
pub mod error;
pub mod exec;
pub mod http;
pub mod manager;
pub mod net;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
