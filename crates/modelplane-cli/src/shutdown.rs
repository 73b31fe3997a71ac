//! Graceful shutdown: a `tokio::sync::watch` done channel fed by a
//! SIGINT/SIGTERM listener. Idempotent: firing twice (a second Ctrl+C
//! during drain) just finds the watch already set.

use tokio::sync::watch;

#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Spawns the signal listener and returns a handle every long-running
    /// task clones and awaits on via [`Shutdown::signaled`].
    pub fn install() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received, draining");
            let _ = tx.send(true);
        });
        Self { rx }
    }

    /// Resolves once a shutdown signal has been observed; used as the
    /// cancellation future passed to `tonic`'s `serve_with_shutdown`.
    pub async fn signaled(mut self) {
        let _ = self.rx.wait_for(|done| *done).await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
