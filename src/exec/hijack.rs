//! Raw connection takeover and the duplex relay.
//!
//! # Responsibilities
//! - Write the exec start request with `Upgrade: tcp` on a raw socket
//! - Read the response head byte by byte, keeping anything after it buffered
//! - Own the hijacked socket exclusively and copy bytes in both directions
//!
//! # Design Decisions
//! - No HTTP client involvement after the request line: the socket is ours
//! - Client EOF half-closes the remote write side, then the remote gets a
//!   bounded drain window to flush its output
//! - Remote EOF ends the session immediately
//! - Dropping a `HijackedConnection` closes the socket on every exit path

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::exec::session::{ExecState, SessionState};
use crate::exec::HijackError;
use crate::net::{ClusterStream, SessionGuard};

/// Body of the start request: attached, with a TTY.
const START_BODY: &str = r#"{"Detach":false,"Tty":true}"#;

/// Upper bound on the size of the upgrade response head.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Status line and reason of the upgrade response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
}

impl ResponseHead {
    /// 101 is a proper upgrade; 200 comes from daemons that hijack without one.
    pub fn is_hijack(&self) -> bool {
        self.status == 101 || self.status == 200
    }
}

/// Write `POST /exec/{id}/start` asking the cluster to hijack the connection.
pub async fn write_start_request<W>(writer: &mut W, authority: &str, exec_id: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let request = format!(
        "POST /exec/{exec_id}/start HTTP/1.1\r\n\
         Host: {authority}\r\n\
         User-Agent: cluster-gateway/{version}\r\n\
         Content-Type: application/json\r\n\
         Connection: Upgrade\r\n\
         Upgrade: tcp\r\n\
         Content-Length: {length}\r\n\
         \r\n\
         {body}",
        exec_id = exec_id,
        authority = authority,
        version = env!("CARGO_PKG_VERSION"),
        length = START_BODY.len(),
        body = START_BODY,
    );
    writer.write_all(request.as_bytes()).await?;
    writer.flush().await
}

/// Parse `HTTP/1.x <code> <reason>`.
pub fn parse_status_line(line: &str) -> Result<ResponseHead, HijackError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(HijackError::Protocol(format!("bad status line: {:?}", line)));
    }

    let status = parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| HijackError::Protocol(format!("bad status code: {:?}", line)))?;

    Ok(ResponseHead {
        status,
        reason: parts.next().unwrap_or_default().to_string(),
    })
}

/// Consume the response head up to and including the blank line.
///
/// Bytes after the head stay in the reader's buffer and belong to the raw stream.
pub async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead, HijackError>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0usize;
    let mut head: Option<ResponseHead> = None;
    let mut line = Vec::with_capacity(128);

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| HijackError::Upstream(format!("reading upgrade response: {}", e)))?;
        if n == 0 {
            return Err(HijackError::Protocol(
                "connection closed during upgrade response".to_string(),
            ));
        }
        consumed += n;
        if consumed > MAX_HEAD_BYTES {
            return Err(HijackError::Protocol("upgrade response head too large".to_string()));
        }

        let text = std::str::from_utf8(&line)
            .map_err(|_| HijackError::Protocol("non UTF-8 response head".to_string()))?;

        match &head {
            None => head = Some(parse_status_line(text)?),
            Some(_) if text.trim_end_matches(['\r', '\n']).is_empty() => break,
            Some(_) => {}
        }
    }

    head.ok_or_else(|| HijackError::Protocol("empty upgrade response".to_string()))
}

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The remote closed its side.
    RemoteClosed,
    /// Client input ended and the remote finished flushing.
    ClientClosed,
    /// Client input ended and the remote kept the socket open past the drain window.
    DrainTimeout,
}

/// Byte counts of a finished relay. `None` marks a direction that was cut off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub to_client: Option<u64>,
    pub to_remote: Option<u64>,
    pub end: RelayEnd,
}

/// Exclusive owner of one hijacked cluster socket and its read buffer.
pub struct HijackedConnection {
    exec_id: String,
    stream: BufReader<ClusterStream>,
    guard: SessionGuard,
    drain: Duration,
}

impl std::fmt::Debug for HijackedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HijackedConnection")
            .field("exec_id", &self.exec_id)
            .field("session_id", &self.guard.id())
            .field("tls", &self.stream.get_ref().is_tls())
            .field("buffered", &self.stream.buffer().len())
            .finish()
    }
}

enum FirstDone {
    Remote(io::Result<u64>),
    Client(io::Result<u64>),
}

impl HijackedConnection {
    pub(crate) fn new(
        exec_id: String,
        stream: BufReader<ClusterStream>,
        guard: SessionGuard,
        drain: Duration,
    ) -> Self {
        Self {
            exec_id,
            stream,
            guard,
            drain,
        }
    }

    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    /// Copy remote → `output` and `input` → remote until the session ends.
    ///
    /// The socket is closed when this returns, whatever the outcome. A read
    /// or write failure in either direction is reported as
    /// [`HijackError::Teardown`].
    pub async fn relay<I, O>(
        self,
        mut input: I,
        mut output: O,
        state: &SessionState,
    ) -> Result<RelayStats, HijackError>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let HijackedConnection {
            exec_id,
            stream,
            guard,
            drain,
        } = self;
        state.advance(ExecState::Relaying);
        tracing::debug!(exec_id = %exec_id, session_id = %guard.id(), "Relay started");

        let (mut remote_rd, mut remote_wr) = tokio::io::split(stream);

        let to_client = async {
            let n = tokio::io::copy(&mut remote_rd, &mut output).await?;
            output.flush().await?;
            Ok::<u64, io::Error>(n)
        };
        let to_remote = async {
            let n = tokio::io::copy(&mut input, &mut remote_wr).await?;
            remote_wr.shutdown().await?;
            Ok::<u64, io::Error>(n)
        };
        tokio::pin!(to_client);
        tokio::pin!(to_remote);

        let first = tokio::select! {
            r = &mut to_client => FirstDone::Remote(r),
            r = &mut to_remote => FirstDone::Client(r),
        };

        let result = match first {
            FirstDone::Remote(Ok(n)) => Ok(RelayStats {
                to_client: Some(n),
                to_remote: None,
                end: RelayEnd::RemoteClosed,
            }),
            FirstDone::Client(Ok(sent)) => match tokio::time::timeout(drain, &mut to_client).await {
                Ok(Ok(received)) => Ok(RelayStats {
                    to_client: Some(received),
                    to_remote: Some(sent),
                    end: RelayEnd::ClientClosed,
                }),
                Ok(Err(e)) => Err(HijackError::Teardown(e)),
                Err(_) => {
                    tracing::debug!(exec_id = %exec_id, after = ?drain, "Remote did not finish after input closed");
                    Ok(RelayStats {
                        to_client: None,
                        to_remote: Some(sent),
                        end: RelayEnd::DrainTimeout,
                    })
                }
            },
            FirstDone::Remote(Err(e)) | FirstDone::Client(Err(e)) => Err(HijackError::Teardown(e)),
        };

        match &result {
            Ok(stats) => {
                state.advance(ExecState::Closed);
                tracing::debug!(
                    exec_id = %exec_id,
                    session_id = %guard.id(),
                    end = ?stats.end,
                    to_client = ?stats.to_client,
                    to_remote = ?stats.to_remote,
                    "Relay finished"
                );
            }
            Err(e) => {
                state.fail();
                tracing::warn!(exec_id = %exec_id, session_id = %guard.id(), error = %e, "Relay torn down");
            }
        }

        result
    }
}
