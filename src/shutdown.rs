// src/shutdown.rs
//
// Completes when the process is asked to stop. Unix listens for
// SIGINT, SIGTERM and SIGQUIT; elsewhere only Ctrl-C.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Cancel `cancel` once `signals` completes. If `signals` cannot be
/// registered, wait on `fallback` instead; the pipeline keeps running
/// until one of them actually fires.
pub async fn cancel_on_signal<S, F>(signals: S, fallback: F, cancel: CancellationToken)
where
    S: Future<Output = std::io::Result<()>>,
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signals.await {
        warn!("Signal handler failed: {}. Falling back to Ctrl-C only", e);
        if let Err(e) = fallback.await {
            error!("Ctrl-C handler failed: {}. Stop the process externally", e);
            return;
        }
    }
    info!("Shutdown requested");
    cancel.cancel();
}
