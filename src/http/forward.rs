//! Reverse-proxy forwarding to the cluster manager.
//!
//! # Responsibilities
//! - Rewrite the request target to the cluster endpoint and scheme
//! - Strip hop-by-hop headers in both directions, add X-Forwarded-*
//! - Stream request and response bodies without buffering
//! - Carry `Connection: Upgrade` requests across and splice both sides on 101
//!
//! # Design Decisions
//! - Stateless: each call dials a fresh connection through the shared transport
//! - Connect failures become 502 before any response byte is written
//! - No retries; callers decide
//! - After a 101 the gateway is a byte pipe; the upgraded protocol is opaque

use std::error::Error as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Extensions, HeaderValue, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::error::GatewayError;
use crate::http::request::RequestIdExt;
use crate::net::{ClusterClient, Transport};
use crate::routing::RouteHandler;
use crate::security::headers::{
    add_forwarded_headers, set_upgrade_headers, strip_hop_by_hop, upgrade_protocol,
};

/// Forwards requests verbatim to the cluster manager.
#[derive(Clone)]
pub struct Forwarder {
    transport: Arc<Transport>,
    client: ClusterClient,
}

impl Forwarder {
    pub fn new(transport: Arc<Transport>, client: ClusterClient) -> Self {
        Self { transport, client }
    }

    /// The forwarder as a route table handler.
    pub fn handler(&self) -> RouteHandler {
        let forwarder = self.clone();
        Arc::new(move |request: Request<Body>| -> BoxFuture<'static, Response> {
            let forwarder = forwarder.clone();
            Box::pin(async move { forwarder.forward(request).await })
        })
    }

    /// `scheme://cluster-authority` + the original path and query.
    pub fn target_uri(&self, original: &Uri) -> Result<Uri, GatewayError> {
        let path_and_query = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = format!("{}{}", self.transport.base_url(), path_and_query);
        target
            .parse::<Uri>()
            .map_err(|e| GatewayError::Internal(format!("cannot build target URI {}: {}", target, e)))
    }

    pub async fn forward(&self, request: Request<Body>) -> Response {
        let request_id = request.request_id().to_string();
        let (mut parts, body) = request.into_parts();

        let target = match self.target_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Target rewrite failed");
                return e.into_response();
            }
        };

        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let upgrade = upgrade_protocol(&parts.headers);
        strip_hop_by_hop(&mut parts.headers);
        if let Some(protocol) = &upgrade {
            set_upgrade_headers(&mut parts.headers, protocol.clone());
        }
        add_forwarded_headers(&mut parts.headers, client_addr, "http");
        match HeaderValue::from_str(&self.transport.endpoint().authority()) {
            Ok(host) => {
                parts.headers.insert(header::HOST, host);
            }
            Err(e) => return GatewayError::Internal(e.to_string()).into_response(),
        }

        tracing::debug!(
            request_id = %request_id,
            method = %parts.method,
            target = %target,
            upgrade = upgrade.is_some(),
            "Forwarding to cluster"
        );

        let client_upgrade = match upgrade {
            Some(_) => parts.extensions.remove::<OnUpgrade>(),
            None => None,
        };
        parts.uri = target;
        parts.version = Version::HTTP_11;
        parts.extensions = Extensions::new();
        let outbound = Request::from_parts(parts, body);

        match self.client.request(outbound).await {
            Ok(response) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                switch_protocols(request_id, response, client_upgrade)
            }
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                let cause = e
                    .source()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| e.to_string());
                tracing::warn!(request_id = %request_id, error = %cause, "Cluster request failed");
                GatewayError::UpstreamUnreachable(cause).into_response()
            }
        }
    }
}

/// Answer the caller with the cluster's 101 and splice the two upgraded
/// connections once hyper hands them over.
fn switch_protocols(
    request_id: String,
    mut response: hyper::Response<hyper::body::Incoming>,
    client_upgrade: Option<OnUpgrade>,
) -> Response {
    let Some(client_upgrade) = client_upgrade else {
        tracing::warn!(request_id = %request_id, "Cluster switched protocols on a plain request");
        return GatewayError::ProtocolViolation("unexpected protocol switch".to_string())
            .into_response();
    };

    let upstream_upgrade = hyper::upgrade::on(&mut response);
    let (mut parts, _) = response.into_parts();
    let protocol = parts.headers.get(header::UPGRADE).cloned();
    strip_hop_by_hop(&mut parts.headers);
    if let Some(protocol) = protocol {
        set_upgrade_headers(&mut parts.headers, protocol);
    }

    tokio::spawn(async move {
        match tokio::try_join!(client_upgrade, upstream_upgrade) {
            Ok((client, upstream)) => {
                let mut client = TokioIo::new(client);
                let mut upstream = TokioIo::new(upstream);
                match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                    Ok((sent, received)) => tracing::debug!(
                        request_id = %request_id,
                        sent,
                        received,
                        "Upgraded connection closed"
                    ),
                    Err(e) => tracing::debug!(
                        request_id = %request_id,
                        error = %e,
                        "Upgraded connection torn down"
                    ),
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Protocol upgrade failed")
            }
        }
    });

    Response::from_parts(parts, Body::empty())
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("transport", &self.transport)
            .finish()
    }
}
