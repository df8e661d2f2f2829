//! Interrupt handling.

use std::io;

use warp_core::CancellationSignal;

/// Close `cancel` on SIGINT or SIGTERM.
///
/// The listener keeps running after the first signal so that repeated
/// interrupts are absorbed instead of killing the process before cleanup.
pub fn listen(cancel: CancellationSignal) -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    received = sigint.recv() => received.map(|()| "SIGINT"),
                    received = sigterm.recv() => received.map(|()| "SIGTERM"),
                };
                let Some(name) = name else {
                    return;
                };
                if cancel.cancel() {
                    tracing::debug!("Received {name}, cancelling session");
                }
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if cancel.cancel() {
                    tracing::debug!("Received Ctrl-C, cancelling session");
                }
            }
        });
    }

    Ok(())
}
