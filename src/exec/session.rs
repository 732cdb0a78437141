//! Exec session parameters and lifecycle state.
//!
//! ```text
//! Idle → Creating → Handshaking → Hijacked → Relaying → Closed
//!   └──────────┴───────────┴───────────┴──────────┴──→ Failed
//! ```

use serde::Deserialize;
use tokio::sync::watch;

use crate::exec::HijackError;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

impl TerminalSize {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// A zero dimension means "unknown"; such sizes are never sent upstream.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// One interactive command request against a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSession {
    container_id: String,
    cmd: Vec<String>,
    size: TerminalSize,
}

impl ExecSession {
    pub fn new(
        container_id: impl Into<String>,
        cmd: Vec<String>,
        size: TerminalSize,
    ) -> Result<Self, HijackError> {
        let container_id = container_id.into();
        if !is_path_safe(&container_id) {
            return Err(HijackError::InvalidSession(format!(
                "invalid container id: {:?}",
                container_id
            )));
        }
        if cmd.is_empty() || cmd.iter().all(|arg| arg.is_empty()) {
            return Err(HijackError::InvalidSession("empty command".to_string()));
        }

        Ok(Self {
            container_id,
            cmd,
            size,
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    pub fn size(&self) -> TerminalSize {
        self.size
    }
}

/// Identifiers interpolated into cluster API paths: `[A-Za-z0-9_.-]+`.
pub(crate) fn is_path_safe(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Exec lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Creating,
    Handshaking,
    Hijacked,
    Relaying,
    Closed,
    Failed,
}

impl ExecState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecState::Closed | ExecState::Failed)
    }

    fn can_advance_to(&self, next: ExecState) -> bool {
        use ExecState::*;
        match (self, next) {
            (Idle, Creating)
            | (Creating, Handshaking)
            | (Handshaking, Hijacked)
            | (Hijacked, Relaying)
            | (Hijacked, Closed)
            | (Relaying, Closed) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecState::Idle => "idle",
            ExecState::Creating => "creating",
            ExecState::Handshaking => "handshaking",
            ExecState::Hijacked => "hijacked",
            ExecState::Relaying => "relaying",
            ExecState::Closed => "closed",
            ExecState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one exec session.
#[derive(Debug)]
pub struct SessionState {
    tx: watch::Sender<ExecState>,
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ExecState::Idle);
        Self { tx }
    }

    pub fn current(&self) -> ExecState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecState> {
        self.tx.subscribe()
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn advance(&self, next: ExecState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.can_advance_to(next) {
                tracing::trace!(from = %state, to = %next, "Exec state transition");
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub fn fail(&self) -> bool {
        self.advance(ExecState::Failed)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
