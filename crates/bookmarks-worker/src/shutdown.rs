//! Process stop signals.

use std::future::Future;
use std::io;

/// The signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT, or Ctrl-C on non-Unix platforms.
    Interrupt,
    /// SIGTERM, as sent by process managers.
    Terminate,
}

/// Installs handlers for SIGINT and SIGTERM and returns a future that
/// resolves with the first of them to arrive.
///
/// The handlers are in place when this returns, so a signal sent before the
/// future is first polled is not lost.
///
/// # Errors
///
/// Returns the I/O error if a handler cannot be installed.
#[cfg(unix)]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ShutdownSignal>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => ShutdownSignal::Interrupt,
            _ = terminate.recv() => ShutdownSignal::Terminate,
        }
    })
}

/// Returns a future that resolves on Ctrl-C.
///
/// # Errors
///
/// Never fails on this platform; the signature matches the Unix version.
#[cfg(not(unix))]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ShutdownSignal>> {
    Ok(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        ShutdownSignal::Interrupt
    })
}
