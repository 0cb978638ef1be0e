// Signal sources for graceful shutdown
// Captures SIGTERM and SIGINT and hands them to whoever is coordinating shutdown

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::{Handle, Signals};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// A process signal as seen by the shutdown machinery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Anything else a source was asked to listen for
    Other(i32),
}

impl SignalKind {
    pub fn from_raw(signal: i32) -> Self {
        match signal {
            SIGINT => SignalKind::Interrupt,
            SIGTERM => SignalKind::Terminate,
            other => SignalKind::Other(other),
        }
    }

    /// Interrupt and terminate both request shutdown and are treated the same
    pub fn is_termination(self) -> bool {
        matches!(self, SignalKind::Interrupt | SignalKind::Terminate)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Interrupt => f.write_str("SIGINT"),
            SignalKind::Terminate => f.write_str("SIGTERM"),
            SignalKind::Other(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// A subscription to process signals
///
/// The subscription is live from the moment the source is constructed:
/// notifications that arrive before the first `recv` are buffered and
/// delivered in order, never dropped. `None` means the source is closed and
/// will never deliver again.
#[async_trait]
pub trait SignalSource: Send + 'static {
    async fn recv(&mut self) -> Option<SignalKind>;
}

/// Wait for the first termination notification, skipping everything else
pub async fn next_termination<S: SignalSource + ?Sized>(source: &mut S) -> Option<SignalKind> {
    while let Some(signal) = source.recv().await {
        if signal.is_termination() {
            return Some(signal);
        }
        debug!(signal = %signal, "Ignoring non-termination signal");
    }
    None
}

/// Operating system signals via signal-hook
///
/// Registration happens in the constructor, so a SIGTERM that lands between
/// construction and the first `recv` stays pending inside signal-hook.
pub struct OsSignalSource {
    signals: Signals,
    handle: Handle,
}

impl OsSignalSource {
    /// Listen for SIGTERM and SIGINT
    pub fn new() -> Result<Self> {
        Self::with_extra(&[])
    }

    /// Listen for SIGTERM and SIGINT plus additional signals that are reported
    /// as `SignalKind::Other` and never trigger shutdown
    pub fn with_extra(extra: &[i32]) -> Result<Self> {
        let mut wanted = vec![SIGTERM, SIGINT];
        wanted.extend_from_slice(extra);

        let signals = Signals::new(&wanted)
            .with_context(|| format!("Failed to register signal handlers for {:?}", wanted))?;
        let handle = signals.handle();

        debug!(signals = ?wanted, "OS signal handlers registered");
        Ok(Self { signals, handle })
    }

    /// Stop listening; pending and future `recv` calls return `None`
    pub fn close(&self) {
        self.handle.close();
    }
}

#[async_trait]
impl SignalSource for OsSignalSource {
    async fn recv(&mut self) -> Option<SignalKind> {
        self.signals.next().await.map(SignalKind::from_raw)
    }
}

/// Create an in-process signal source and the sender that feeds it
///
/// Useful for tests and for triggering shutdown programmatically. The queue is
/// unbounded, so sends never block and never get lost.
pub fn channel() -> (SignalSender, ChannelSignalSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalSender { tx }, ChannelSignalSource { rx })
}

#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<SignalKind>,
}

impl SignalSender {
    /// Deliver a signal. Returns false if the source has been dropped.
    pub fn send(&self, signal: SignalKind) -> bool {
        self.tx.send(signal).is_ok()
    }

    pub fn interrupt(&self) -> bool {
        self.send(SignalKind::Interrupt)
    }

    pub fn terminate(&self) -> bool {
        self.send(SignalKind::Terminate)
    }
}

#[derive(Debug)]
pub struct ChannelSignalSource {
    rx: mpsc::UnboundedReceiver<SignalKind>,
}

#[async_trait]
impl SignalSource for ChannelSignalSource {
    async fn recv(&mut self) -> Option<SignalKind> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_mapping() {
        assert_eq!(SignalKind::from_raw(SIGINT), SignalKind::Interrupt);
        assert_eq!(SignalKind::from_raw(SIGTERM), SignalKind::Terminate);
        assert_eq!(
            SignalKind::from_raw(signal_hook::consts::SIGHUP),
            SignalKind::Other(signal_hook::consts::SIGHUP)
        );

        assert!(SignalKind::Interrupt.is_termination());
        assert!(SignalKind::Terminate.is_termination());
        assert!(!SignalKind::Other(signal_hook::consts::SIGUSR1).is_termination());
    }

    #[test]
    fn test_signal_kind_display() {
        assert_eq!(SignalKind::Interrupt.to_string(), "SIGINT");
        assert_eq!(SignalKind::Terminate.to_string(), "SIGTERM");
        assert_eq!(SignalKind::Other(10).to_string(), "signal 10");
    }

    #[tokio::test]
    async fn test_channel_buffers_before_first_recv() {
        let (tx, mut source) = channel();

        // Nobody is waiting yet; both must still arrive, in order
        assert!(tx.interrupt());
        assert!(tx.terminate());

        assert_eq!(source.recv().await, Some(SignalKind::Interrupt));
        assert_eq!(source.recv().await, Some(SignalKind::Terminate));
    }

    #[tokio::test]
    async fn test_next_termination_skips_other_signals() {
        let (tx, mut source) = channel();
        tx.send(SignalKind::Other(1));
        tx.send(SignalKind::Other(10));
        tx.terminate();

        assert_eq!(next_termination(&mut source).await, Some(SignalKind::Terminate));
    }

    #[tokio::test]
    async fn test_next_termination_on_closed_source() {
        let (tx, mut source) = channel();
        tx.send(SignalKind::Other(12));
        drop(tx);

        assert_eq!(next_termination(&mut source).await, None);
    }

    #[test]
    fn test_send_after_source_dropped() {
        let (tx, source) = channel();
        drop(source);
        assert!(!tx.terminate());
    }
}
