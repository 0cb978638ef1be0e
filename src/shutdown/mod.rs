// Graceful shutdown coordination
// Bridges termination signals to an orderly server drain and reports completion exactly once

use crate::server::Drain;
use crate::signals::{self, OsSignalSource, SignalSource};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Lifecycle of a coordinator. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Created, not guarding anything yet
    Idle,
    /// Waiting for the first termination signal
    Listening,
    /// Signal received, server drain in progress
    Draining,
    /// Drain returned; completion has been (or is being) emitted
    Completed,
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The coordinator task was dropped (runtime shut down) before drain returned
    #[error("shutdown coordinator was dropped before the drain finished")]
    Abandoned,
}

/// Waits for SIGINT/SIGTERM, drains the server, then signals completion
///
/// The signal source is injected rather than registered globally, so several
/// coordinators can live side by side in one process.
pub struct ShutdownCoordinator<S> {
    signals: S,
    state: watch::Sender<ShutdownState>,
}

impl<S: SignalSource> ShutdownCoordinator<S> {
    pub fn new(signals: S) -> Self {
        let (state, _) = watch::channel(ShutdownState::Idle);
        Self { signals, state }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Start guarding `server` and return immediately
    ///
    /// The server must already be accepting connections. Consumes the
    /// coordinator: once started it cannot be restarted. Must be called from
    /// within a Tokio runtime.
    pub fn start_guarding<D>(self, server: Arc<D>) -> Completion
    where
        D: Drain + ?Sized + 'static,
    {
        let Self { signals, state } = self;
        let (done_tx, done_rx) = oneshot::channel();

        state.send_replace(ShutdownState::Listening);
        let observer = state.subscribe();

        tokio::spawn(guard_server(signals, server, state, done_tx));
        debug!("Shutdown coordinator listening for SIGTERM/SIGINT");

        Completion {
            done: done_rx,
            state: observer,
        }
    }
}

/// Guard `server` with the given signal source
pub fn guard<S, D>(server: Arc<D>, signals: S) -> Completion
where
    S: SignalSource,
    D: Drain + ?Sized + 'static,
{
    ShutdownCoordinator::new(signals).start_guarding(server)
}

/// Guard `server` against the process's own SIGTERM and SIGINT
pub fn graceful<D>(server: Arc<D>) -> anyhow::Result<Completion>
where
    D: Drain + ?Sized + 'static,
{
    let signals = OsSignalSource::new()?;
    info!("Signal handlers installed (SIGTERM, SIGINT)");
    Ok(guard(server, signals))
}

async fn guard_server<S, D>(
    mut signals: S,
    server: Arc<D>,
    state: watch::Sender<ShutdownState>,
    done: oneshot::Sender<()>,
) where
    S: SignalSource,
    D: Drain + ?Sized,
{
    let Some(signal) = signals::next_termination(&mut signals).await else {
        // No termination request can ever arrive, so the process is not shutting down
        debug!("Signal source closed without a termination request");
        std::future::pending::<()>().await;
        return;
    };

    info!(signal = %signal, "Received termination signal - draining server");
    state.send_replace(ShutdownState::Draining);

    match AssertUnwindSafe(server.drain(None)).catch_unwind().await {
        Ok(Ok(())) => info!("Server drained - all in-flight requests finished"),
        Ok(Err(e)) => warn!(error = %e, "Server drain did not complete cleanly"),
        Err(panic) => warn!(panic = panic_message(&*panic), "Server drain panicked"),
    }

    state.send_replace(ShutdownState::Completed);
    let _ = done.send(());
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// One-shot notification that shutdown has finished
///
/// Resolves once, after the server's drain has returned, whatever its
/// outcome. Drain failures are logged, not reported here.
#[derive(Debug)]
pub struct Completion {
    done: oneshot::Receiver<()>,
    state: watch::Receiver<ShutdownState>,
}

impl Completion {
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Watch the coordinator's state transitions
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.state() == ShutdownState::Completed
    }
}

impl Future for Completion {
    type Output = Result<(), CompletionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.done)
            .poll(cx)
            .map(|res| res.map_err(|_| CompletionError::Abandoned))
    }
}
