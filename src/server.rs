// Server collaborator contract
// The coordinator only ever asks a server to drain; everything else is the server's business

use async_trait::async_trait;
use std::time::Duration;

/// Errors raised when a server cannot cleanly finish its in-flight work
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    /// Connections were still open when the deadline elapsed and were force-closed
    #[error("drain deadline of {deadline:?} exceeded, {open_connections} connection(s) force-closed")]
    DeadlineExceeded {
        deadline: Duration,
        open_connections: usize,
    },

    /// The server was already drained by an earlier call
    #[error("server already drained")]
    AlreadyDrained,

    /// The accept loop task died before it could finish draining
    #[error("accept loop task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A server that can stop accepting connections and wait for in-flight requests
///
/// Implementations must stop accepting immediately when `drain` is called and
/// only return once every request accepted before that point has finished, or
/// once `deadline` (if any) has elapsed. Any deadline policy lives here, not in
/// the caller.
#[async_trait]
pub trait Drain: Send + Sync {
    async fn drain(&self, deadline: Option<Duration>) -> Result<(), DrainError>;
}
