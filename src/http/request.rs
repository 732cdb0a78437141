//! Request identification.
//!
//! # Design Decisions
//! - Request ID is set by `SetRequestIdLayer` as early as possible and
//!   echoed back by `PropagateRequestIdLayer`
//! - Forwarded requests carry the same `x-request-id` to the cluster

use axum::http::{HeaderMap, Request};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Read the request ID assigned at the edge.
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> &str {
        self.get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers().request_id()
    }
}
