//! TLS client configuration for the cluster endpoint.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::{
    self,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig, RootCertStore,
};

use crate::config::ClusterTlsConfig;
use crate::net::TransportError;

/// Build a rustls client configuration from PEM material.
///
/// The CA bundle is mandatory. A client certificate is presented when both
/// `cert_path` and `key_path` are set.
pub fn client_config(config: &ClusterTlsConfig) -> Result<ClientConfig, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(Path::new(&config.ca_path))? {
        roots
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("invalid CA certificate: {}", e)))?;
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(format!("unsupported protocol versions: {}", e)))?
        .with_root_certificates(roots);

    let client_config = match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(Path::new(cert_path))?;
            let key = load_private_key(Path::new(key_path))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| TransportError::Tls(format!("invalid client certificate: {}", e)))?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(client_config)
}

/// Name the cluster certificate is verified against.
pub fn server_name(
    config: &ClusterTlsConfig,
    endpoint_host: &str,
) -> Result<ServerName<'static>, TransportError> {
    let name = config
        .server_name
        .clone()
        .unwrap_or_else(|| endpoint_host.to_string());

    ServerName::try_from(name.clone())
        .map_err(|_| TransportError::Tls(format!("invalid server name: {}", name)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let data = fs::read(path)
        .map_err(|e| TransportError::Tls(format!("failed to read {:?}: {}", path, e)))?;

    let mut reader = BufReader::new(data.as_slice());
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|r| r.ok())
        .collect();

    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates found in {:?}",
            path
        )));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let data = fs::read(path)
        .map_err(|e| TransportError::Tls(format!("failed to read {:?}: {}", path, e)))?;

    let mut reader = BufReader::new(data.as_slice());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TransportError::Tls(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| TransportError::Tls(format!("no private key found in {:?}", path)))
}
