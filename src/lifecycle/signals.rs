//! OS signal handling.
//!
//! SIGTERM and SIGINT request shutdown; SIGHUP requests a config reload.

/// What a received signal asks the process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Shutdown,
    Reload,
}

/// Wait for the next signal of interest.
#[cfg(unix)]
pub async fn next_signal() -> std::io::Result<SignalEvent> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let event = tokio::select! {
        _ = terminate.recv() => SignalEvent::Shutdown,
        _ = interrupt.recv() => SignalEvent::Shutdown,
        _ = hangup.recv() => SignalEvent::Reload,
    };
    tracing::debug!(?event, "Signal received");
    Ok(event)
}

#[cfg(not(unix))]
pub async fn next_signal() -> std::io::Result<SignalEvent> {
    tokio::signal::ctrl_c().await?;
    Ok(SignalEvent::Shutdown)
}
