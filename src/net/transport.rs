//! Transport selection for the cluster manager endpoint.
//!
//! # Responsibilities
//! - Parse the configured cluster endpoint once at startup
//! - Decide plain TCP vs TLS for every outbound connection
//! - Dial fresh connections (no pooling, no reuse)
//!
//! # Design Decisions
//! - The selection is immutable for the process lifetime
//! - One dial path serves both forwarded requests and exec hijacks

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::uri::Scheme;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{client::TlsStream, TlsConnector};
use url::{Host, Url};

use crate::config::{ClusterConfig, ClusterTlsConfig};
use crate::net::tls;

/// Keep-alive interval for hijacked sockets.
pub const KEEPALIVE: Duration = Duration::from_secs(30);

const DEFAULT_PLAIN_PORT: u16 = 2375;
const DEFAULT_TLS_PORT: u16 = 2376;

/// Error type for cluster transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The configured endpoint is not usable.
    #[error("invalid cluster endpoint: {0}")]
    Endpoint(String),

    /// TLS material could not be loaded.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// TCP connect failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TLS handshake failed.
    #[error("TLS handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Connect or TLS handshake did not finish in time.
    #[error("connecting to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },
}

/// Address of the cluster manager plus its optional TLS material.
#[derive(Debug, Clone)]
pub struct ClusterEndpoint {
    host: String,
    port: u16,
    tls: Option<ClusterTlsConfig>,
}

impl ClusterEndpoint {
    /// Parse the endpoint from configuration.
    ///
    /// `tcp://` and `http://` select plain TCP unless a TLS section is
    /// present; `https://` requires one.
    pub fn from_config(config: &ClusterConfig) -> Result<Self, TransportError> {
        let url = Url::parse(&config.url)
            .map_err(|e| TransportError::Endpoint(format!("{}: {}", config.url, e)))?;

        match url.scheme() {
            "tcp" | "http" => {}
            "https" if config.tls.is_some() => {}
            "https" => {
                return Err(TransportError::Endpoint(
                    "https endpoint requires a [cluster.tls] section".to_string(),
                ))
            }
            other => {
                return Err(TransportError::Endpoint(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        }

        let host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            _ => {
                return Err(TransportError::Endpoint(format!(
                    "missing host: {}",
                    config.url
                )))
            }
        };

        let default_port = if config.tls.is_some() {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(default_port),
            tls: config.tls.clone(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn tls(&self) -> Option<&ClusterTlsConfig> {
        self.tls.as_ref()
    }
}

#[derive(Clone)]
struct TlsTransport {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

/// The transport selected at startup for every cluster connection.
#[derive(Clone)]
pub struct Transport {
    endpoint: ClusterEndpoint,
    tls: Option<TlsTransport>,
    connect_timeout: Duration,
}

impl Transport {
    /// Select plain or TLS transport for the endpoint.
    ///
    /// TLS material is read here, once.
    pub fn select(endpoint: ClusterEndpoint, connect_timeout: Duration) -> Result<Self, TransportError> {
        let tls = match endpoint.tls() {
            Some(config) => {
                let client_config = tls::client_config(config)?;
                Some(TlsTransport {
                    connector: TlsConnector::from(std::sync::Arc::new(client_config)),
                    server_name: tls::server_name(config, endpoint.host())?,
                })
            }
            None => None,
        };

        tracing::info!(
            endpoint = %endpoint.authority(),
            tls = tls.is_some(),
            "Cluster transport selected"
        );

        Ok(Self {
            endpoint,
            tls,
            connect_timeout,
        })
    }

    pub fn endpoint(&self) -> &ClusterEndpoint {
        &self.endpoint
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// URI scheme used when rewriting requests towards the cluster.
    pub fn scheme(&self) -> Scheme {
        if self.is_tls() {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        }
    }

    /// `scheme://host:port` of the cluster endpoint.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.endpoint.authority())
    }

    /// Open a fresh connection to the cluster manager.
    pub async fn dial(&self) -> Result<ClusterStream, TransportError> {
        let addr = self.endpoint.authority();
        let connect = TcpStream::connect((self.endpoint.host(), self.endpoint.port()));

        let tcp = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
            Err(_) => {
                return Err(TransportError::Timeout {
                    addr,
                    after: self.connect_timeout,
                })
            }
        };
        let _ = tcp.set_nodelay(true);

        let Some(tls) = &self.tls else {
            tracing::trace!(addr = %addr, "Dialed cluster (plain)");
            return Ok(ClusterStream::Plain(tcp));
        };

        let handshake = tls.connector.connect(tls.server_name.clone(), tcp);
        match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok(stream)) => {
                tracing::trace!(addr = %addr, "Dialed cluster (TLS)");
                Ok(ClusterStream::Tls(Box::new(stream)))
            }
            Ok(Err(source)) => Err(TransportError::Handshake { addr, source }),
            Err(_) => Err(TransportError::Timeout {
                addr,
                after: self.connect_timeout,
            }),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint.authority())
            .field("tls", &self.is_tls())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// A connection to the cluster manager, plain or TLS-wrapped.
pub enum ClusterStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClusterStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            ClusterStream::Plain(tcp) => tcp,
            ClusterStream::Tls(tls) => tls.get_ref().0,
        }
    }

    /// Enable TCP keep-alive probing on the underlying socket.
    pub fn set_keepalive(&self, period: Duration) -> io::Result<()> {
        let keepalive = TcpKeepalive::new().with_time(period);
        #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
        let keepalive = keepalive.with_interval(period);

        SockRef::from(self.tcp()).set_tcp_keepalive(&keepalive)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ClusterStream::Tls(_))
    }
}

impl AsyncRead for ClusterStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClusterStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ClusterStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClusterStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClusterStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ClusterStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClusterStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ClusterStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    /// Half-close: TCP sends FIN on the write side, TLS sends close_notify first.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClusterStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ClusterStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(url: &str) -> ClusterConfig {
        ClusterConfig {
            url: url.to_string(),
            tls: None,
        }
    }

    #[test]
    fn test_parse_tcp_endpoint() {
        let endpoint = ClusterEndpoint::from_config(&cluster("tcp://10.0.0.5:3375")).unwrap();
        assert_eq!(endpoint.host(), "10.0.0.5");
        assert_eq!(endpoint.port(), 3375);
        assert_eq!(endpoint.authority(), "10.0.0.5:3375");
        assert!(endpoint.tls().is_none());
    }

    #[test]
    fn test_default_ports() {
        let plain = ClusterEndpoint::from_config(&cluster("tcp://swarm.local")).unwrap();
        assert_eq!(plain.port(), 2375);

        let mut config = cluster("tcp://swarm.local");
        config.tls = Some(ClusterTlsConfig {
            ca_path: "ca.pem".into(),
            cert_path: None,
            key_path: None,
            server_name: None,
        });
        let tls = ClusterEndpoint::from_config(&config).unwrap();
        assert_eq!(tls.port(), 2376);
    }

    #[test]
    fn test_ipv6_authority_is_bracketed() {
        let endpoint = ClusterEndpoint::from_config(&cluster("http://[::1]:2375")).unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.authority(), "[::1]:2375");
    }

    #[test]
    fn test_rejects_unusable_endpoints() {
        assert!(ClusterEndpoint::from_config(&cluster("unix:///var/run/docker.sock")).is_err());
        assert!(ClusterEndpoint::from_config(&cluster("https://swarm.local")).is_err());
        assert!(ClusterEndpoint::from_config(&cluster("not a url")).is_err());
    }

    #[test]
    fn test_plain_selection() {
        let endpoint = ClusterEndpoint::from_config(&cluster("tcp://127.0.0.1:2375")).unwrap();
        let transport = Transport::select(endpoint, Duration::from_secs(1)).unwrap();
        assert!(!transport.is_tls());
        assert_eq!(transport.scheme(), Scheme::HTTP);
        assert_eq!(transport.base_url(), "http://127.0.0.1:2375");
    }

    #[test]
    fn test_tls_selection_fails_without_material() {
        let mut config = cluster("tcp://127.0.0.1:2376");
        config.tls = Some(ClusterTlsConfig {
            ca_path: "/nonexistent/ca.pem".into(),
            cert_path: None,
            key_path: None,
            server_name: None,
        });
        let endpoint = ClusterEndpoint::from_config(&config).unwrap();
        let err = Transport::select(endpoint, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::Tls(_)));
    }

    #[tokio::test]
    async fn test_dial_refused_is_connect_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint =
            ClusterEndpoint::from_config(&cluster(&format!("tcp://127.0.0.1:{}", port))).unwrap();
        let transport = Transport::select(endpoint, Duration::from_secs(2)).unwrap();
        let err = transport.dial().await.err().unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
