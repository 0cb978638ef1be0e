// graceful - signal-driven graceful shutdown for HTTP servers
//
// On SIGTERM/SIGINT the server stops accepting, in-flight requests finish,
// and the caller is told exactly once that it is safe to exit.

pub mod cli;
pub mod config;
pub mod network;
pub mod observability;
pub mod server;
pub mod shutdown;
pub mod signals;

pub use server::{Drain, DrainError};
pub use shutdown::{Completion, CompletionError, ShutdownCoordinator, ShutdownState};
pub use signals::{OsSignalSource, SignalKind, SignalSource};
