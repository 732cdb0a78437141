//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled (method, pattern) → handler entries
//! - Register every path bare and under the `/v{version}` alias
//! - Wrap handlers with CORS headers at build time when enabled
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in registration order; first match wins
//! - Explicit None rather than silent default; the caller reports 404

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::routing::pattern::{PathPattern, PatternError};
use crate::security::headers::apply_cors_headers;

/// Handler bound to a route.
pub type RouteHandler =
    Arc<dyn Fn(Request<Body>) -> BoxFuture<'static, Response> + Send + Sync>;

/// Values captured from the path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(Vec<(String, String)>);

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// One compiled route.
pub struct RouteEntry {
    pub method: Method,
    pub pattern: PathPattern,
    pub cors: bool,
    handler: RouteHandler,
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("pattern", &self.pattern.to_string())
            .field("cors", &self.cors)
            .finish()
    }
}

/// Result of a successful lookup.
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub params: RouteParams,
}

impl RouteMatch<'_> {
    pub fn handler(&self) -> RouteHandler {
        Arc::clone(&self.entry.handler)
    }
}

/// Immutable route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn builder(cors: bool) -> RouteTableBuilder {
        RouteTableBuilder {
            cors,
            entries: Vec::new(),
        }
    }

    /// Find the first entry for `method` whose pattern matches `path`.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.entries
            .iter()
            .filter(|entry| entry.method == *method)
            .find_map(|entry| {
                entry.pattern.matches(path).map(|captures| RouteMatch {
                    entry,
                    params: RouteParams(captures),
                })
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}

/// Startup-time builder; `build` freezes the table.
pub struct RouteTableBuilder {
    cors: bool,
    entries: Vec<RouteEntry>,
}

impl RouteTableBuilder {
    /// Register `template` for `method`, plus its version-prefixed alias.
    pub fn route(
        mut self,
        method: Method,
        template: &str,
        handler: RouteHandler,
    ) -> Result<Self, PatternError> {
        let pattern = PathPattern::parse(template)?;
        let handler = if self.cors {
            with_cors(handler)
        } else {
            handler
        };

        self.entries.push(RouteEntry {
            method: method.clone(),
            pattern: pattern.clone(),
            cors: self.cors,
            handler: Arc::clone(&handler),
        });
        self.entries.push(RouteEntry {
            method,
            pattern: pattern.versioned(),
            cors: self.cors,
            handler,
        });
        Ok(self)
    }

    pub fn build(self) -> RouteTable {
        tracing::debug!(routes = self.entries.len(), cors = self.cors, "Route table built");
        RouteTable {
            entries: self.entries,
        }
    }
}

fn with_cors(inner: RouteHandler) -> RouteHandler {
    Arc::new(move |request: Request<Body>| -> BoxFuture<'static, Response> {
        let inner = Arc::clone(&inner);
        Box::pin(async move {
            let mut response = inner(request).await;
            apply_cors_headers(response.headers_mut());
            response
        })
    })
}

const GET_ROUTES: &[&str] = &[
    "/_ping",
    "/events",
    "/info",
    "/version",
    "/images/json",
    "/images/viz",
    "/images/search",
    "/images/get",
    "/images/{*name}/get",
    "/images/{*name}/history",
    "/images/{*name}/json",
    "/containers/ps",
    "/containers/json",
    "/containers/{*name}/export",
    "/containers/{*name}/changes",
    "/containers/{*name}/json",
    "/containers/{*name}/top",
    "/containers/{*name}/logs",
    "/containers/{*name}/stats",
    "/containers/{*name}/attach/ws",
    "/exec/{*execid}/json",
];

const POST_ROUTES: &[&str] = &[
    "/auth",
    "/commit",
    "/build",
    "/images/create",
    "/images/load",
    "/images/{*name}/push",
    "/images/{*name}/tag",
    "/containers/create",
    "/containers/{*name}/kill",
    "/containers/{*name}/pause",
    "/containers/{*name}/unpause",
    "/containers/{*name}/rename",
    "/containers/{*name}/restart",
    "/containers/{*name}/start",
    "/containers/{*name}/stop",
    "/containers/{*name}/wait",
    "/containers/{*name}/resize",
    "/containers/{*name}/attach",
    "/containers/{*name}/copy",
    "/containers/{*name}/exec",
    "/exec/{*execid}/start",
    "/exec/{*execid}/resize",
];

const DELETE_ROUTES: &[&str] = &["/containers/{*name}", "/images/{*name}"];

/// Browser terminal served by the gateway itself, outside the route table.
pub const EXEC_ENDPOINT: &str = "/api/exec";

/// Paths that open an interactive stream into a container even on GET.
const INTERACTIVE_ROUTES: &[&str] = &[EXEC_ENDPOINT, "/containers/{*name}/attach/ws"];

/// Whether `path`, bare or under a version prefix, opens an interactive
/// container stream.
pub fn is_interactive(path: &str) -> bool {
    INTERACTIVE_ROUTES
        .iter()
        .filter_map(|template| PathPattern::parse(template).ok())
        .any(|pattern| {
            pattern.matches(path).is_some() || pattern.versioned().matches(path).is_some()
        })
}

/// The cluster manager API surface, every path bound to `forward`.
///
/// Each path is also registered for OPTIONS so preflight requests reach
/// the cluster manager.
pub fn cluster_routes(forward: RouteHandler, cors: bool) -> Result<RouteTable, PatternError> {
    let mut builder = RouteTable::builder(cors);

    let groups = [
        (Method::GET, GET_ROUTES),
        (Method::POST, POST_ROUTES),
        (Method::DELETE, DELETE_ROUTES),
    ];
    for (method, paths) in &groups {
        for path in paths.iter() {
            builder = builder.route(method.clone(), path, Arc::clone(&forward))?;
        }
    }
    for (_, paths) in &groups {
        for path in paths.iter() {
            builder = builder.route(Method::OPTIONS, path, Arc::clone(&forward))?;
        }
    }

    Ok(builder.build())
}
