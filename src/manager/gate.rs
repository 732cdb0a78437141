//! Config-backed access gate.
//!
//! # Responsibilities
//! - Let whitelisted peers (CIDR ranges) through without credentials
//! - Match `username:token` against configured accounts
//! - Restrict read-only accounts to GET and HEAD without protocol upgrades,
//!   and keep them off interactive container streams
//!
//! # Design Decisions
//! - Disabled gate allows everything
//! - Accounts are fixed at startup; no runtime mutation

use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;

use crate::config::{AccessConfig, AccessToken, GatewayConfig};
use crate::error::GatewayError;
use crate::manager::{Access, AccessRequest, Manager};
use crate::net::ClusterEndpoint;

/// An IPv4 or IPv6 network in `address/prefix` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for Cidr {
    type Err = String;

    /// A bare address is a host route (/32 or /128).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| format!("invalid address in CIDR: {}", s))?;

        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .map_err(|_| format!("invalid prefix length in CIDR: {}", s))?,
            None => max,
        };
        if prefix > max {
            return Err(format!("prefix length {} exceeds {} in CIDR: {}", prefix, max, s));
        }

        Ok(Self { network, prefix })
    }
}

/// Manager backed by the gateway configuration file.
#[derive(Debug)]
pub struct ConfigManager {
    endpoint: ClusterEndpoint,
    enabled: bool,
    whitelist: Vec<Cidr>,
    accounts: Vec<AccessToken>,
}

impl ConfigManager {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let endpoint = ClusterEndpoint::from_config(&config.cluster)?;
        Self::with_endpoint(endpoint, &config.access)
    }

    pub fn with_endpoint(
        endpoint: ClusterEndpoint,
        access: &AccessConfig,
    ) -> Result<Self, GatewayError> {
        let whitelist = access
            .whitelist_cidrs
            .iter()
            .map(|c| c.parse::<Cidr>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(GatewayError::Config)?;

        Ok(Self {
            endpoint,
            enabled: access.enabled,
            whitelist,
            accounts: access.tokens.clone(),
        })
    }

    fn whitelisted(&self, peer: Option<IpAddr>) -> bool {
        peer.map(|ip| self.whitelist.iter().any(|cidr| cidr.contains(ip)))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Manager for ConfigManager {
    fn cluster_endpoint(&self) -> &ClusterEndpoint {
        &self.endpoint
    }

    async fn authorize(&self, request: &AccessRequest) -> Access {
        if !self.enabled || self.whitelisted(request.peer) {
            return Access::Allow;
        }

        let Some(credentials) = &request.credentials else {
            return Access::Unauthenticated("missing access token".to_string());
        };

        let account = self
            .accounts
            .iter()
            .find(|a| a.username == credentials.username && a.token == credentials.token);

        match account {
            None => Access::Unauthenticated("invalid access token".to_string()),
            Some(account) if account.read_only && request.is_mutating() => {
                Access::Forbidden(format!(
                    "account {} is read-only",
                    account.username
                ))
            }
            Some(_) => Access::Allow,
        }
    }

    async fn bootstrap(&self) -> Result<(), GatewayError> {
        if !self.enabled {
            tracing::warn!("Access gate disabled, every caller is allowed");
            return Ok(());
        }

        for account in &self.accounts {
            tracing::info!(
                username = %account.username,
                read_only = account.read_only,
                "API account loaded"
            );
        }
        if self.accounts.is_empty() && self.whitelist.is_empty() {
            tracing::warn!("Access gate enabled without accounts or whitelist, every request will be denied");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use crate::config::ClusterConfig;
    use crate::manager::Credentials;

    fn manager(access: AccessConfig) -> ConfigManager {
        let endpoint = ClusterEndpoint::from_config(&ClusterConfig::default()).unwrap();
        ConfigManager::with_endpoint(endpoint, &access).unwrap()
    }

    fn enabled() -> AccessConfig {
        AccessConfig {
            enabled: true,
            whitelist_cidrs: vec!["10.0.0.0/8".into()],
            tokens: vec![
                AccessToken {
                    username: "admin".into(),
                    token: "s3cret".into(),
                    read_only: false,
                },
                AccessToken {
                    username: "viewer".into(),
                    token: "look".into(),
                    read_only: true,
                },
            ],
        }
    }

    fn request(method: Method, peer: &str, creds: Option<&str>) -> AccessRequest {
        AccessRequest {
            method,
            path: "/containers/json".into(),
            peer: Some(peer.parse().unwrap()),
            credentials: creds.and_then(Credentials::parse),
            upgrade: false,
        }
    }

    #[test]
    fn test_cidr_parse_and_contains() {
        let cidr: Cidr = "192.168.1.0/24".parse().unwrap();
        assert!(cidr.contains("192.168.1.77".parse().unwrap()));
        assert!(!cidr.contains("192.168.2.1".parse().unwrap()));
        assert!(!cidr.contains("::1".parse().unwrap()));

        let host: Cidr = "127.0.0.1".parse().unwrap();
        assert!(host.contains("127.0.0.1".parse().unwrap()));
        assert!(!host.contains("127.0.0.2".parse().unwrap()));

        let all: Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains("8.8.8.8".parse().unwrap()));

        let v6: Cidr = "fd00::/8".parse().unwrap();
        assert!(v6.contains("fd12:3456::1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_matches_ipv4_mapped_peer() {
        let cidr: Cidr = "10.0.0.0/8".parse().unwrap();
        assert!(cidr.contains("::ffff:10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn test_cidr_rejects_garbage() {
        assert!("10.0.0.0/40".parse::<Cidr>().is_err());
        assert!("::/129".parse::<Cidr>().is_err());
        assert!("not-an-ip/8".parse::<Cidr>().is_err());
        assert!("10.0.0.0/x".parse::<Cidr>().is_err());
    }

    #[tokio::test]
    async fn test_disabled_gate_allows_all() {
        let gate = manager(AccessConfig::default());
        let access = gate.authorize(&request(Method::DELETE, "203.0.113.9", None)).await;
        assert_eq!(access, Access::Allow);
    }

    #[tokio::test]
    async fn test_whitelisted_peer_bypasses_credentials() {
        let gate = manager(enabled());
        let access = gate.authorize(&request(Method::POST, "10.4.4.4", None)).await;
        assert_eq!(access, Access::Allow);
    }

    #[tokio::test]
    async fn test_credentials_required_outside_whitelist() {
        let gate = manager(enabled());

        let missing = gate.authorize(&request(Method::GET, "203.0.113.9", None)).await;
        assert!(matches!(missing, Access::Unauthenticated(_)));

        let wrong = gate
            .authorize(&request(Method::GET, "203.0.113.9", Some("admin:nope")))
            .await;
        assert!(matches!(wrong, Access::Unauthenticated(_)));

        let ok = gate
            .authorize(&request(Method::POST, "203.0.113.9", Some("admin:s3cret")))
            .await;
        assert_eq!(ok, Access::Allow);
    }

    #[tokio::test]
    async fn test_read_only_account() {
        let gate = manager(enabled());

        let read = gate
            .authorize(&request(Method::GET, "203.0.113.9", Some("viewer:look")))
            .await;
        assert_eq!(read, Access::Allow);

        let write = gate
            .authorize(&request(Method::POST, "203.0.113.9", Some("viewer:look")))
            .await;
        assert!(matches!(write, Access::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_read_only_account_cannot_open_streams() {
        let gate = manager(enabled());

        let mut terminal = request(Method::GET, "203.0.113.9", Some("viewer:look"));
        terminal.path = "/api/exec".into();
        assert!(matches!(gate.authorize(&terminal).await, Access::Forbidden(_)));

        let mut attach = request(Method::GET, "203.0.113.9", Some("viewer:look"));
        attach.path = "/containers/web/attach/ws".into();
        attach.upgrade = true;
        assert!(matches!(gate.authorize(&attach).await, Access::Forbidden(_)));

        let mut admin = request(Method::GET, "203.0.113.9", Some("admin:s3cret"));
        admin.path = "/api/exec".into();
        assert_eq!(gate.authorize(&admin).await, Access::Allow);
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let gate = manager(enabled());
        assert!(gate.bootstrap().await.is_ok());
        assert!(gate.bootstrap().await.is_ok());
    }

    #[test]
    fn test_invalid_whitelist_is_config_error() {
        let endpoint = ClusterEndpoint::from_config(&ClusterConfig::default()).unwrap();
        let access = AccessConfig {
            enabled: true,
            whitelist_cidrs: vec!["bogus".into()],
            tokens: vec![],
        };
        let err = ConfigManager::with_endpoint(endpoint, &access).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
