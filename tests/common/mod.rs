//! Shared utilities for integration testing.
//!
//! `FakeCluster` speaks just enough HTTP/1.1 on a raw socket to stand in for
//! a cluster manager: exec create, the hijacking start request, resize,
//! generic protocol upgrades, and a JSON reply for everything else. It can
//! serve plain TCP or TLS with a throwaway CA.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::{
    self,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    ServerConfig,
};
use tokio_rustls::TlsAcceptor;

use cluster_gateway::config::{ClusterConfig, ClusterTlsConfig, GatewayConfig, TimeoutConfig};
use cluster_gateway::exec::HijackEngine;
use cluster_gateway::manager::ConfigManager;
use cluster_gateway::net::{build_client, ClusterEndpoint, Transport};
use cluster_gateway::HttpServer;

/// What the fake does with a hijacked exec socket.
#[derive(Debug, Clone)]
pub enum ExecBehavior {
    /// Echo every byte until the gateway half-closes, then close.
    Echo,
    /// Write these bytes, close the write side, then wait for the gateway to hang up.
    Script(Vec<u8>),
    /// Swallow input and keep the socket open well past any drain window.
    Hold,
    /// Write these bytes, then abort the connection with a TCP reset.
    Reset(Vec<u8>),
}

/// A socket the fake can serve on.
pub trait ClusterSocket: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Make the next close send RST instead of FIN.
    fn abort_on_close(&self) -> io::Result<()>;
}

impl ClusterSocket for TcpStream {
    fn abort_on_close(&self) -> io::Result<()> {
        socket2::SockRef::from(self).set_linger(Some(Duration::ZERO))
    }
}

impl ClusterSocket for tokio_rustls::server::TlsStream<TcpStream> {
    fn abort_on_close(&self) -> io::Result<()> {
        self.get_ref().0.abort_on_close()
    }
}

/// Throwaway CA plus a `localhost` server certificate it signed.
pub struct TestPki {
    pub ca_pem: String,
    server_cert: CertificateDer<'static>,
    server_key: Vec<u8>,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = rcgen::KeyPair::generate().unwrap();
        let mut ca_params = rcgen::CertificateParams::default();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "gateway test CA");
        ca_params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();
        let ca_pem = ca_cert.pem();
        let issuer = rcgen::Issuer::new(ca_params, ca_key);

        let server_key = rcgen::KeyPair::generate().unwrap();
        let mut server_params =
            rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        server_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "localhost");
        server_params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
        let server_cert = server_params.signed_by(&server_key, &issuer).unwrap();

        Self {
            ca_pem,
            server_cert: CertificateDer::from(server_cert.der().to_vec()),
            server_key: server_key.serialize_der(),
        }
    }

    fn acceptor(&self) -> TlsAcceptor {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.clone()));
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![self.server_cert.clone()], key)
            .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }

    /// Write the CA bundle to a fresh temp file and return its path.
    pub fn write_ca(&self) -> String {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "cluster-gateway-ca-{}-{}.pem",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::write(&path, &self.ca_pem).unwrap();
        path.to_string_lossy().into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path and query as received.
    pub target: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }
}

struct FakeState {
    behavior: ExecBehavior,
    fail_create: bool,
    tls: bool,
    requests: Mutex<Vec<RecordedRequest>>,
    resizes: Mutex<Vec<(u16, u16)>>,
    upgrades_opened: AtomicUsize,
    upgrades_closed: AtomicUsize,
    next_exec: AtomicUsize,
}

pub struct FakeCluster {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeCluster {
    pub async fn start(behavior: ExecBehavior) -> Self {
        Self::start_with(behavior, false).await
    }

    /// A cluster whose exec create always answers 404.
    pub async fn failing_create() -> Self {
        Self::start_with(ExecBehavior::Echo, true).await
    }

    async fn start_with(behavior: ExecBehavior, fail_create: bool) -> Self {
        Self::listen(behavior, fail_create, None).await
    }

    /// A cluster behind TLS, presenting a certificate for `localhost`.
    pub async fn start_tls(behavior: ExecBehavior, pki: &TestPki) -> Self {
        Self::listen(behavior, false, Some(pki.acceptor())).await
    }

    async fn listen(behavior: ExecBehavior, fail_create: bool, tls: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(FakeState {
            behavior,
            fail_create,
            tls: tls.is_some(),
            requests: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            upgrades_opened: AtomicUsize::new(0),
            upgrades_closed: AtomicUsize::new(0),
            next_exec: AtomicUsize::new(1),
        });

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = Arc::clone(&shared);
                let tls = tls.clone();
                tokio::spawn(async move {
                    let _ = match tls {
                        Some(acceptor) => match acceptor.accept(socket).await {
                            Ok(stream) => serve(stream, state).await,
                            Err(e) => Err(e),
                        },
                        None => serve(socket, state).await,
                    };
                });
            }
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        if self.state.tls {
            format!("https://127.0.0.1:{}", self.addr.port())
        } else {
            format!("tcp://{}", self.addr)
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path() == path)
            .collect()
    }

    /// Resizes as `(width, height)` in arrival order.
    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.state.resizes.lock().unwrap().clone()
    }

    pub fn upgrades_opened(&self) -> usize {
        self.state.upgrades_opened.load(Ordering::SeqCst)
    }

    pub fn upgrades_closed(&self) -> usize {
        self.state.upgrades_closed.load(Ordering::SeqCst)
    }
}

async fn serve<S: ClusterSocket>(socket: S, state: Arc<FakeState>) -> io::Result<()> {
    let mut reader = BufReader::new(socket);
    let request = match read_request(&mut reader).await? {
        Some(request) => request,
        None => return Ok(()),
    };
    state.requests.lock().unwrap().push(request.clone());

    let path = request.path().to_string();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("POST", ["containers", _, "exec"]) => {
            if state.fail_create {
                respond(&mut reader, 404, r#"{"message":"No such container"}"#).await
            } else {
                let n = state.next_exec.fetch_add(1, Ordering::SeqCst);
                respond(&mut reader, 201, &format!(r#"{{"Id":"execfake{}"}}"#, n)).await
            }
        }
        ("POST", ["containers", _, "start"]) => respond(&mut reader, 204, "").await,
        ("POST", ["exec", _, "resize"]) => {
            let query = request.target.split_once('?').map(|(_, q)| q).unwrap_or("");
            let mut width = 0;
            let mut height = 0;
            for pair in query.split('&') {
                match pair.split_once('=') {
                    Some(("w", v)) => width = v.parse().unwrap_or(0),
                    Some(("h", v)) => height = v.parse().unwrap_or(0),
                    _ => {}
                }
            }
            state.resizes.lock().unwrap().push((width, height));
            respond(&mut reader, 200, "").await
        }
        ("POST", ["exec", _, "start"]) => hijack(reader, state).await,
        _ if request.header("upgrade").is_some() => {
            let protocol = request.header("upgrade").unwrap_or_default().to_string();
            echo_upgraded(reader, &protocol).await
        }
        _ => respond(&mut reader, 200, r#"{"ok":true}"#).await,
    }
}

/// Switch to `protocol` and echo until the gateway half-closes.
async fn echo_upgraded<S: ClusterSocket>(mut reader: BufReader<S>, protocol: &str) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: {}\r\n\r\n",
        protocol
    );
    reader.get_mut().write_all(head.as_bytes()).await?;
    let (mut rd, mut wr) = tokio::io::split(reader);
    tokio::io::copy(&mut rd, &mut wr).await?;
    wr.shutdown().await
}

async fn hijack<S: ClusterSocket>(mut reader: BufReader<S>, state: Arc<FakeState>) -> io::Result<()> {
    reader
        .get_mut()
        .write_all(
            b"HTTP/1.1 101 UPGRADED\r\n\
              Content-Type: application/vnd.docker.raw-stream\r\n\
              Connection: Upgrade\r\n\
              Upgrade: tcp\r\n\r\n",
        )
        .await?;
    state.upgrades_opened.fetch_add(1, Ordering::SeqCst);

    let result = match &state.behavior {
        ExecBehavior::Echo => {
            let (mut rd, mut wr) = tokio::io::split(reader);
            let copied = tokio::io::copy(&mut rd, &mut wr).await;
            let _ = wr.shutdown().await;
            copied.map(|_| ())
        }
        ExecBehavior::Script(output) => {
            reader.get_mut().write_all(output).await?;
            reader.get_mut().shutdown().await?;
            let mut sink = Vec::new();
            reader.read_to_end(&mut sink).await.map(|_| ())
        }
        ExecBehavior::Hold => {
            let mut sink = Vec::new();
            let _ = reader.read_to_end(&mut sink).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
        ExecBehavior::Reset(output) => {
            reader.get_mut().write_all(output).await?;
            reader.get_mut().flush().await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            reader.get_ref().abort_on_close()
        }
    };

    state.upgrades_closed.fetch_add(1, Ordering::SeqCst);
    result
}

async fn read_request<S: ClusterSocket>(
    reader: &mut BufReader<S>,
) -> io::Result<Option<RecordedRequest>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.trim_end().splitn(3, ' ');
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let chunked = headers
        .get("transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);
    let body = if chunked {
        read_chunked(reader).await?
    } else {
        let length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        body
    };

    Ok(Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    }))
}

async fn read_chunked<S: ClusterSocket>(reader: &mut BufReader<S>) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        reader.read_line(&mut line).await?;
        let size_field = line.trim().split(';').next().unwrap_or("0");
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if size == 0 {
            // Trailers end with an empty line.
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
                    return Ok(body);
                }
            }
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        line.clear();
        reader.read_line(&mut line).await?;
    }
}

async fn respond<S: ClusterSocket>(
    reader: &mut BufReader<S>,
    status: u16,
    body: &str,
) -> io::Result<()> {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        404 => "Not Found",
        _ => "Status",
    };
    let response = if status == 204 {
        format!(
            "HTTP/1.1 204 {}\r\nConnection: close\r\nKeep-Alive: timeout=5\r\n\r\n",
            reason
        )
    } else {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\nKeep-Alive: timeout=5\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        )
    };
    let socket = reader.get_mut();
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

/// Defaults pointed at `cluster_url`, with short timeouts.
pub fn gateway_config(cluster_url: &str) -> GatewayConfig {
    GatewayConfig {
        cluster: ClusterConfig {
            url: cluster_url.to_string(),
            tls: None,
        },
        timeouts: TimeoutConfig {
            connect_secs: 2,
            handshake_secs: 2,
            drain_secs: 1,
        },
        ..GatewayConfig::default()
    }
}

/// Defaults for a TLS cluster verified against `ca_path` as `localhost`.
pub fn tls_gateway_config(cluster_url: &str, ca_path: &str) -> GatewayConfig {
    let mut config = gateway_config(cluster_url);
    config.cluster.tls = Some(ClusterTlsConfig {
        ca_path: ca_path.to_string(),
        cert_path: None,
        key_path: None,
        server_name: Some("localhost".to_string()),
    });
    config
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub engine: HijackEngine,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Serve the full router on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let manager = ConfigManager::new(&config).unwrap();
    let server = HttpServer::new(&config, Arc::new(manager)).unwrap();
    let engine = server.engine().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestGateway { addr, engine }
}

/// An engine talking straight to `cluster_url`, without the HTTP front end.
pub fn engine_for(cluster_url: &str) -> HijackEngine {
    engine_with(gateway_config(cluster_url))
}

pub fn engine_with(config: GatewayConfig) -> HijackEngine {
    let endpoint = ClusterEndpoint::from_config(&config.cluster).unwrap();
    let transport = Arc::new(Transport::select(endpoint, config.timeouts.connect()).unwrap());
    HijackEngine::new(Arc::clone(&transport), build_client(transport), &config.timeouts)
}

/// Poll `condition` every 10ms until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
