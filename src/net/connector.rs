//! hyper client connector backed by the cluster transport.
//!
//! Every request the client sends dials a fresh connection through
//! [`Transport::dial`], so forwarded calls and exec hijacks share the same
//! plain/TLS decision.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};

use crate::net::transport::{ClusterStream, Transport, TransportError};

/// HTTP client that only ever talks to the cluster manager.
pub type ClusterClient = Client<ClusterConnector, Body>;

/// Build the client used for forwarding.
///
/// Idle pooling is off: each request gets its own connection.
pub fn build_client(transport: Arc<Transport>) -> ClusterClient {
    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build(ClusterConnector::new(transport))
}

/// `tower::Service<Uri>` that ignores the URI authority and dials the
/// configured cluster endpoint.
#[derive(Clone, Debug)]
pub struct ClusterConnector {
    transport: Arc<Transport>,
}

impl ClusterConnector {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }
}

impl tower::Service<Uri> for ClusterConnector {
    type Response = ClusterIo;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<ClusterIo, TransportError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        let transport = Arc::clone(&self.transport);
        Box::pin(async move {
            let stream = transport.dial().await?;
            Ok(ClusterIo(TokioIo::new(stream)))
        })
    }
}

/// A dialed cluster connection adapted to hyper's IO traits.
pub struct ClusterIo(TokioIo<ClusterStream>);

impl Connection for ClusterIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl Read for ClusterIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl Write for ClusterIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}
