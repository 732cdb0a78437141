//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: exec websocket endpoint plus the route table fallback
//! - Wire up middleware (access gate, tracing, request ID)
//! - Bind server to listener and serve until shutdown
//! - Dispatch requests through the route table to the forwarder
//! - Drain live exec sessions on shutdown
//!
//! # Design Decisions
//! - The route table owns method/path matching; Axum only sees `/api/exec`
//! - No response timeout layer: log streams and attached sessions are long-lived
//! - Observability (metrics, correlation IDs) on every dispatched request

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::exec::{exec_handler, HijackEngine};
use crate::http::forward::Forwarder;
use crate::http::middleware::access_control_middleware;
use crate::http::request::RequestIdExt;
use crate::manager::Manager;
use crate::net::{build_client, Transport};
use crate::observability::metrics;
use crate::routing::{cluster_routes, RouteTable, EXEC_ENDPOINT};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub engine: HijackEngine,
    pub manager: Arc<dyn Manager>,
    pub bridge_buffer: usize,
}

/// HTTP front end of the gateway.
pub struct HttpServer {
    router: Router,
    engine: HijackEngine,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a new HTTP server talking to the manager's cluster endpoint.
    pub fn new(config: &GatewayConfig, manager: Arc<dyn Manager>) -> Result<Self, GatewayError> {
        let transport = Arc::new(Transport::select(
            manager.cluster_endpoint().clone(),
            config.timeouts.connect(),
        )?);
        let client = build_client(Arc::clone(&transport));

        let forwarder = Forwarder::new(Arc::clone(&transport), client.clone());
        let routes = cluster_routes(forwarder.handler(), config.api.enable_cors)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let engine = HijackEngine::new(transport, client, &config.timeouts);

        tracing::info!(
            routes = routes.len(),
            cors = config.api.enable_cors,
            cluster = %manager.cluster_endpoint().authority(),
            "Route table built"
        );

        let state = AppState {
            routes: Arc::new(routes),
            engine: engine.clone(),
            manager,
            bridge_buffer: config.exec.bridge_buffer_bytes,
        };

        Ok(Self {
            router: Self::build_router(state),
            engine,
            config: config.clone(),
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route(EXEC_ENDPOINT, get(exec_handler))
            .fallback(dispatch)
            .layer(middleware::from_fn_with_state(
                state.clone(),
                access_control_middleware,
            ))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The assembled router, for embedding and tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn engine(&self) -> &HijackEngine {
        &self.engine
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Stops accepting on the shutdown signal, then waits for live exec
    /// sessions up to the drain timeout.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        let drain = self.config.timeouts.drain();
        if !self.engine.tracker().wait_idle(drain).await {
            tracing::warn!(
                remaining = self.engine.active_sessions(),
                after = ?drain,
                "Exec sessions still open at shutdown"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Route table dispatch.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let (handler, params, route) = match state.routes.lookup(&method, &path) {
        Some(matched) => (
            matched.handler(),
            matched.params,
            matched.entry.pattern.to_string(),
        ),
        None => {
            tracing::debug!(
                request_id = %request.request_id(),
                method = %method,
                path = %path,
                "No route matched"
            );
            metrics::record_request(method.as_str(), 404, "none", start_time);
            return GatewayError::RouteNotFound {
                method: method.to_string(),
                path,
            }
            .into_response();
        }
    };

    tracing::debug!(
        request_id = %request.request_id(),
        route = %route,
        params = ?params,
        "Route matched"
    );
    let response = handler(request).await;
    metrics::record_request(method.as_str(), response.status().as_u16(), &route, start_time);
    response
}
