//! Manager capability consumed by the gateway.
//!
//! # Responsibilities
//! - Expose the cluster endpoint (read-only, process lifetime)
//! - Decide whether a caller may reach the API (access gate)
//! - Run the one-shot startup bootstrap hook
//!
//! # Design Decisions
//! - The gateway only depends on the [`Manager`] trait; [`ConfigManager`] is
//!   the config-backed default
//! - Implementations must be safe for concurrent use

use std::net::IpAddr;

use async_trait::async_trait;
use axum::http::Method;

use crate::error::GatewayError;
use crate::net::ClusterEndpoint;
use crate::routing::is_interactive;

pub mod gate;

pub use gate::{Cidr, ConfigManager};

/// Header carrying `username:token` credentials.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Query parameter fallback for callers that cannot set headers (browser websockets).
pub const ACCESS_TOKEN_QUERY: &str = "access_token";

/// Credentials presented by a caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    /// Parse `username:token`. Both halves must be non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let (username, token) = raw.split_once(':')?;
        if username.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            token: token.to_string(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// What the access gate sees of an inbound request.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub method: Method,
    pub path: String,
    pub peer: Option<IpAddr>,
    pub credentials: Option<Credentials>,
    /// The caller asked to switch protocols (`Connection: Upgrade`).
    pub upgrade: bool,
}

impl AccessRequest {
    /// Whether the request can change cluster state or run code in a
    /// container. Interactive streams count even when reached with GET.
    pub fn is_mutating(&self) -> bool {
        (self.method != Method::GET && self.method != Method::HEAD)
            || self.upgrade
            || is_interactive(&self.path)
    }
}

/// Access gate decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Allow,
    /// No usable credentials.
    Unauthenticated(String),
    /// Valid caller without permission for this request.
    Forbidden(String),
}

impl Access {
    /// Convert a denial into the error reported to the caller.
    pub fn into_result(self) -> Result<(), GatewayError> {
        match self {
            Access::Allow => Ok(()),
            Access::Unauthenticated(reason) => Err(GatewayError::Unauthenticated(reason)),
            Access::Forbidden(reason) => Err(GatewayError::Forbidden(reason)),
        }
    }
}

/// The external manager capability.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Cluster manager endpoint and its TLS material.
    fn cluster_endpoint(&self) -> &ClusterEndpoint;

    /// Decide whether the request may proceed. Runs before any dispatch.
    async fn authorize(&self, request: &AccessRequest) -> Access;

    /// Idempotent startup hook, invoked once before the listener binds.
    async fn bootstrap(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_parse() {
        let creds = Credentials::parse("admin:s3cret:with-colon").unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.token, "s3cret:with-colon");

        assert!(Credentials::parse("admin").is_none());
        assert!(Credentials::parse(":token").is_none());
        assert!(Credentials::parse("admin:").is_none());
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let creds = Credentials::parse("admin:s3cret").unwrap();
        let printed = format!("{:?}", creds);
        assert!(printed.contains("admin"));
        assert!(!printed.contains("s3cret"));
    }

    fn access(method: Method, path: &str, upgrade: bool) -> AccessRequest {
        AccessRequest {
            method,
            path: path.to_string(),
            peer: None,
            credentials: None,
            upgrade,
        }
    }

    #[test]
    fn test_is_mutating() {
        assert!(!access(Method::GET, "/containers/json", false).is_mutating());
        assert!(!access(Method::HEAD, "/_ping", false).is_mutating());
        assert!(!access(Method::GET, "/containers/web/logs", false).is_mutating());

        assert!(access(Method::POST, "/containers/web/stop", false).is_mutating());
        assert!(access(Method::GET, "/api/exec", false).is_mutating());
        assert!(access(Method::GET, "/containers/web/attach/ws", false).is_mutating());
        assert!(access(Method::GET, "/v1.41/containers/web/attach/ws", false).is_mutating());
        assert!(access(Method::GET, "/containers/web/json", true).is_mutating());
    }

    #[test]
    fn test_access_into_result() {
        assert!(Access::Allow.into_result().is_ok());
        assert!(matches!(
            Access::Unauthenticated("missing".into()).into_result(),
            Err(GatewayError::Unauthenticated(_))
        ));
        assert!(matches!(
            Access::Forbidden("read-only".into()).into_result(),
            Err(GatewayError::Forbidden(_))
        ));
    }
}
