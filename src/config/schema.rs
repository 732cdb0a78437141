//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Cluster manager endpoint and its transport.
    pub cluster: ClusterConfig,

    /// Access gate settings.
    pub access: AccessConfig,

    /// API surface toggles.
    pub api: ApiConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Interactive exec settings.
    pub exec: ExecConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Cluster manager endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Endpoint URL (`tcp://`, `http://` or `https://`).
    pub url: String,

    /// TLS transport. When present every dial to the cluster uses it.
    pub tls: Option<ClusterTlsConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:2375".to_string(),
            tls: None,
        }
    }
}

/// TLS client material for the cluster endpoint (PEM files).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterTlsConfig {
    /// CA bundle used to verify the cluster manager.
    pub ca_path: String,

    /// Client certificate, required together with `key_path`.
    #[serde(default)]
    pub cert_path: Option<String>,

    /// Client private key.
    #[serde(default)]
    pub key_path: Option<String>,

    /// Name to verify instead of the endpoint host.
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Access gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AccessConfig {
    /// Enforce authentication. Disabled means every caller is allowed.
    pub enabled: bool,

    /// Peers inside these ranges bypass authentication.
    pub whitelist_cidrs: Vec<String>,

    /// Accepted `username:token` pairs.
    pub tokens: Vec<AccessToken>,
}

/// A static API account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessToken {
    pub username: String,
    pub token: String,

    /// Read-only accounts may only issue GET and HEAD.
    #[serde(default)]
    pub read_only: bool,
}

/// API surface toggles.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ApiConfig {
    /// Add permissive CORS headers to every routed response.
    pub enable_cors: bool,
}

/// Timeout configuration for cluster operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP (and TLS) connect timeout in seconds.
    pub connect_secs: u64,

    /// Exec creation and upgrade handshake timeout in seconds.
    pub handshake_secs: u64,

    /// How long the remote may keep flushing output after the client
    /// stopped sending input, in seconds.
    pub drain_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            handshake_secs: 10,
            drain_secs: 5,
        }
    }
}

/// Interactive exec settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecConfig {
    /// In-memory pipe size between the websocket and the hijacked socket.
    pub bridge_buffer_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            bridge_buffer_bytes: 64 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
