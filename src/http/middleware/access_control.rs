//! Access gate middleware.
//! Runs before routing, so denied requests never reach the route table.
//! Admitted requests lose their credentials before anything is forwarded.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{uri::PathAndQuery, Request, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::http::request::RequestIdExt;
use crate::http::server::AppState;
use crate::manager::{AccessRequest, Credentials, ACCESS_TOKEN_HEADER, ACCESS_TOKEN_QUERY};
use crate::security::headers::upgrade_protocol;

/// Context attached to requests that passed the gate.
#[derive(Clone, Debug)]
pub struct AccessContext {
    /// Account name, `None` for whitelisted or ungated callers.
    pub username: Option<String>,
}

pub async fn access_control_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let access = access_request(&req);

    if let Err(e) = state.manager.authorize(&access).await.into_result() {
        warn!(
            request_id = %req.request_id(),
            method = %access.method,
            path = %access.path,
            peer = ?access.peer,
            error = %e,
            "Request denied"
        );
        return e.into_response();
    }

    // Credentials are for the gateway only.
    req.headers_mut().remove(ACCESS_TOKEN_HEADER);
    if let Some(uri) = without_query_token(req.uri()) {
        *req.uri_mut() = uri;
    }
    req.extensions_mut().insert(AccessContext {
        username: access.credentials.map(|c| c.username),
    });
    next.run(req).await
}

/// Collect what the gate needs: method, path, peer and credentials.
///
/// The `X-Access-Token` header wins over the `access_token` query parameter.
pub fn access_request<B>(req: &Request<B>) -> AccessRequest {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let from_header = req
        .headers()
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(Credentials::parse);

    let credentials = from_header.or_else(|| {
        req.uri().query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == ACCESS_TOKEN_QUERY)
                .and_then(|(_, value)| Credentials::parse(&value))
        })
    });

    AccessRequest {
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        peer,
        credentials,
        upgrade: upgrade_protocol(req.headers()).is_some(),
    }
}

/// `uri` with the `access_token` query parameter removed, or `None` when it
/// carries none. Other parameters keep their order.
pub fn without_query_token(uri: &Uri) -> Option<Uri> {
    let query = uri.query()?;
    let mut pairs = url::form_urlencoded::parse(query.as_bytes());
    if !pairs.any(|(key, _)| key == ACCESS_TOKEN_QUERY) {
        return None;
    }

    let kept = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(
            url::form_urlencoded::parse(query.as_bytes())
                .filter(|(key, _)| key != ACCESS_TOKEN_QUERY),
        )
        .finish();
    let path_and_query = if kept.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), kept)
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_from_header() {
        let mut req = Request::builder()
            .uri("/containers/json")
            .header("X-Access-Token", "admin:s3cret")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.10:4000".parse::<SocketAddr>().unwrap()));

        let access = access_request(&req);
        assert_eq!(access.path, "/containers/json");
        assert_eq!(access.peer, Some("192.0.2.10".parse().unwrap()));
        let creds = access.credentials.unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.token, "s3cret");
    }

    #[test]
    fn test_credentials_from_query() {
        let req = Request::builder()
            .uri("/api/exec?id=abc&access_token=viewer%3Alook&cmd=sh")
            .body(())
            .unwrap();

        let access = access_request(&req);
        assert!(access.peer.is_none());
        assert_eq!(access.credentials.unwrap().username, "viewer");
    }

    #[test]
    fn test_query_token_is_removed() {
        let uri: Uri = "/api/exec?id=abc&access_token=viewer%3Alook&cmd=sh,-c"
            .parse()
            .unwrap();
        let stripped = without_query_token(&uri).unwrap();
        assert_eq!(stripped.path(), "/api/exec");
        assert_eq!(stripped.query(), Some("id=abc&cmd=sh%2C-c"));

        let only: Uri = "/info?access_token=viewer:look".parse().unwrap();
        assert_eq!(without_query_token(&only).unwrap().to_string(), "/info");

        let untouched: Uri = "/containers/json?all=1".parse().unwrap();
        assert!(without_query_token(&untouched).is_none());
    }

    #[test]
    fn test_upgrade_is_flagged() {
        let req = Request::builder()
            .uri("/containers/web/attach/ws")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .body(())
            .unwrap();
        assert!(access_request(&req).upgrade);
    }

    #[test]
    fn test_no_credentials() {
        let req = Request::builder().uri("/_ping").body(()).unwrap();
        assert!(access_request(&req).credentials.is_none());
    }
}
