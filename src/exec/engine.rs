//! Exec session engine.
//!
//! # Responsibilities
//! - Create exec instances on the cluster manager
//! - Perform the upgrade handshake on a freshly dialed socket
//! - Send terminal resizes while a session is relaying
//!
//! # Design Decisions
//! - Create and resize are ordinary requests through the forwarding client
//! - The start request never goes through the client; the engine dials and
//!   keeps the raw socket
//! - Create and handshake are bounded by `timeouts.handshake_secs`
//! - Nothing is retried

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::BufReader;

use crate::config::TimeoutConfig;
use crate::exec::hijack::{read_response_head, write_start_request, HijackedConnection};
use crate::exec::session::{is_path_safe, ExecSession, ExecState, SessionState, TerminalSize};
use crate::exec::HijackError;
use crate::net::transport::KEEPALIVE;
use crate::net::{ClusterClient, SessionTracker, Transport};
use crate::resilience::timeouts::within;

/// Upper bound on JSON bodies read back from create/resize.
const MAX_REPLY_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateExecRequest<'a> {
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    tty: bool,
    cmd: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CreateExecResponse {
    #[serde(rename = "Id")]
    id: String,
}

/// Drives exec sessions against the cluster manager.
#[derive(Clone)]
pub struct HijackEngine {
    transport: Arc<Transport>,
    client: ClusterClient,
    tracker: SessionTracker,
    handshake_timeout: Duration,
    drain_timeout: Duration,
}

impl HijackEngine {
    pub fn new(transport: Arc<Transport>, client: ClusterClient, timeouts: &TimeoutConfig) -> Self {
        Self {
            transport,
            client,
            tracker: SessionTracker::new(),
            handshake_timeout: timeouts.handshake(),
            drain_timeout: timeouts.drain(),
        }
    }

    /// Number of hijacked sockets currently open.
    pub fn active_sessions(&self) -> u64 {
        self.tracker.active_count()
    }

    /// How long a finished session may spend flushing before it is cut.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Run `Creating → Handshaking → Hijacked` and apply the initial size.
    ///
    /// On any failure the state ends in `Failed` and no socket stays open.
    pub async fn open(
        &self,
        session: &ExecSession,
        state: &SessionState,
    ) -> Result<HijackedConnection, HijackError> {
        state.advance(ExecState::Creating);
        let exec_id = match self.create(session).await {
            Ok(id) => id,
            Err(e) => {
                state.fail();
                tracing::warn!(container = %session.container_id(), error = %e, "Exec create failed");
                return Err(e);
            }
        };

        state.advance(ExecState::Handshaking);
        let connection = match self.start(&exec_id).await {
            Ok(conn) => conn,
            Err(e) => {
                state.fail();
                tracing::warn!(exec_id = %exec_id, error = %e, "Exec handshake failed");
                return Err(e);
            }
        };
        state.advance(ExecState::Hijacked);

        let size = session.size();
        if size.is_valid() {
            if let Err(e) = self.resize(&exec_id, size).await {
                tracing::warn!(exec_id = %exec_id, error = %e, "Initial resize failed");
            }
        }

        tracing::info!(
            container = %session.container_id(),
            exec_id = %exec_id,
            width = size.width,
            height = size.height,
            "Exec session hijacked"
        );
        Ok(connection)
    }

    /// `POST /containers/{id}/exec`, returning the exec id.
    pub async fn create(&self, session: &ExecSession) -> Result<String, HijackError> {
        let body = serde_json::to_vec(&CreateExecRequest {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            cmd: session.cmd(),
        })
        .map_err(|e| HijackError::Protocol(format!("encoding exec request: {}", e)))?;

        let path = format!("/containers/{}/exec", session.container_id());
        let (status, reply) = self.call("create", &path, Body::from(body)).await?;
        if !status.is_success() {
            return Err(HijackError::UnexpectedStatus {
                stage: "create",
                status: status.as_u16(),
                message: String::from_utf8_lossy(&reply).trim().to_string(),
            });
        }

        let created: CreateExecResponse = serde_json::from_slice(&reply)
            .map_err(|e| HijackError::Protocol(format!("unparsable exec create reply: {}", e)))?;
        if !is_path_safe(&created.id) {
            return Err(HijackError::Protocol(format!(
                "exec id not usable in a path: {:?}",
                created.id
            )));
        }

        tracing::debug!(container = %session.container_id(), exec_id = %created.id, "Exec created");
        Ok(created.id)
    }

    /// Dial, send the start request and take over the socket.
    pub async fn start(&self, exec_id: &str) -> Result<HijackedConnection, HijackError> {
        let handshake = async {
            let mut stream = self.transport.dial().await?;
            let authority = self.transport.endpoint().authority();
            write_start_request(&mut stream, &authority, exec_id)
                .await
                .map_err(|e| HijackError::Upstream(format!("sending exec start: {}", e)))?;

            let mut reader = BufReader::new(stream);
            let head = read_response_head(&mut reader).await?;
            if !head.is_hijack() {
                return Err(HijackError::UnexpectedStatus {
                    stage: "start",
                    status: head.status,
                    message: head.reason,
                });
            }
            Ok::<_, HijackError>(reader)
        };

        let reader = within("exec handshake", self.handshake_timeout, handshake).await??;

        if let Err(e) = reader.get_ref().set_keepalive(KEEPALIVE) {
            tracing::warn!(exec_id = %exec_id, error = %e, "Failed to enable keep-alive");
        }

        Ok(HijackedConnection::new(
            exec_id.to_string(),
            reader,
            self.tracker.track(),
            self.drain_timeout,
        ))
    }

    /// `POST /exec/{id}/resize?h=&w=`.
    pub async fn resize(&self, exec_id: &str, size: TerminalSize) -> Result<(), HijackError> {
        if !is_path_safe(exec_id) {
            return Err(HijackError::InvalidSession(format!("invalid exec id: {:?}", exec_id)));
        }
        let path = format!("/exec/{}/resize?h={}&w={}", exec_id, size.height, size.width);
        let (status, reply) = self.call("resize", &path, Body::empty()).await?;
        if !status.is_success() {
            return Err(HijackError::UnexpectedStatus {
                stage: "resize",
                status: status.as_u16(),
                message: String::from_utf8_lossy(&reply).trim().to_string(),
            });
        }
        tracing::trace!(exec_id = %exec_id, width = size.width, height = size.height, "Exec resized");
        Ok(())
    }

    async fn call(
        &self,
        stage: &'static str,
        path_and_query: &str,
        body: Body,
    ) -> Result<(StatusCode, axum::body::Bytes), HijackError> {
        let uri = format!("{}{}", self.transport.base_url(), path_and_query);
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::HOST, self.transport.endpoint().authority())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .map_err(|e| HijackError::Protocol(format!("building {} request: {}", stage, e)))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| HijackError::Upstream(format!("{} request: {}", stage, e)))?;
            let status = response.status();
            let reply = axum::body::to_bytes(Body::new(response.into_body()), MAX_REPLY_BYTES)
                .await
                .map_err(|e| HijackError::Upstream(format!("{} reply: {}", stage, e)))?;
            Ok::<_, HijackError>((status, reply))
        };

        within(stage, self.handshake_timeout, exchange).await?
    }
}

impl std::fmt::Debug for HijackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HijackEngine")
            .field("transport", &self.transport)
            .field("active_sessions", &self.active_sessions())
            .field("handshake_timeout", &self.handshake_timeout)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_wire_format() {
        let cmd = vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()];
        let body = serde_json::to_value(CreateExecRequest {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            cmd: &cmd,
        })
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "AttachStdin": true,
                "AttachStdout": true,
                "AttachStderr": true,
                "Tty": true,
                "Cmd": ["sh", "-c", "echo hi"],
            })
        );
    }

    #[test]
    fn test_create_reply_parsing() {
        let reply: CreateExecResponse =
            serde_json::from_str(r#"{"Id":"f3a1","Warnings":null}"#).unwrap();
        assert_eq!(reply.id, "f3a1");
        assert!(serde_json::from_str::<CreateExecResponse>(r#"{"id":"x"}"#).is_err());
    }
}
