//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that referenced files exist (TLS material)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::manager::Cidr;
use crate::net::ClusterEndpoint;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }

    if let Err(e) = ClusterEndpoint::from_config(&config.cluster) {
        errors.push(ValidationError::new("cluster.url", e.to_string()));
    }

    if let Some(tls) = &config.cluster.tls {
        if !Path::new(&tls.ca_path).exists() {
            errors.push(ValidationError::new(
                "cluster.tls.ca_path",
                format!("file not found: {}", tls.ca_path),
            ));
        }
        match (&tls.cert_path, &tls.key_path) {
            (Some(cert), Some(key)) => {
                for (field, path) in [("cluster.tls.cert_path", cert), ("cluster.tls.key_path", key)] {
                    if !Path::new(path).exists() {
                        errors.push(ValidationError::new(field, format!("file not found: {}", path)));
                    }
                }
            }
            (None, None) => {}
            _ => errors.push(ValidationError::new(
                "cluster.tls",
                "cert_path and key_path must be set together",
            )),
        }
    }

    for (i, cidr) in config.access.whitelist_cidrs.iter().enumerate() {
        if let Err(e) = cidr.parse::<Cidr>() {
            errors.push(ValidationError::new(
                format!("access.whitelist_cidrs[{}]", i),
                e,
            ));
        }
    }

    for (i, token) in config.access.tokens.iter().enumerate() {
        if token.username.is_empty() || token.token.is_empty() {
            errors.push(ValidationError::new(
                format!("access.tokens[{}]", i),
                "username and token must not be empty",
            ));
        }
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_secs", timeouts.connect_secs),
        ("timeouts.handshake_secs", timeouts.handshake_secs),
        ("timeouts.drain_secs", timeouts.drain_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if config.exec.bridge_buffer_bytes == 0 {
        errors.push(ValidationError::new(
            "exec.bridge_buffer_bytes",
            "must be greater than zero",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
