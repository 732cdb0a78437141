//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound exec creation, the upgrade handshake and resize calls
//! - Cancel operations cleanly on timeout (the future is dropped)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors and name the stage
//! - An established relay has no timeout; TCP keep-alive catches dead peers

use std::future::Future;
use std::time::Duration;

/// A bounded stage did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{stage} timed out after {after:?}")]
pub struct TimedOut {
    pub stage: &'static str,
    pub after: Duration,
}

/// Run `fut` with a deadline of `after`.
pub async fn within<F>(stage: &'static str, after: Duration, fut: F) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| TimedOut { stage, after })
}
