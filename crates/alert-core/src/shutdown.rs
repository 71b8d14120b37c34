//! Shutdown signalling.
//!
//! A single `broadcast::Sender<()>` is owned by the signal listener. The
//! first receiver must exist before the listener starts: broadcast values
//! only reach receivers that were subscribed when they were sent. Later
//! handles are derived with [`Shutdown::resubscribe`].

use tokio::sync::broadcast;
use tracing::{info, warn};

/// Listens for the process-wide shutdown notification.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            is_shutdown: false,
            notify,
        }
    }

    /// A handle that observes notifications sent from now on. Poll `self`
    /// after calling this so nothing sent before it is missed.
    pub fn resubscribe(&self) -> Self {
        Self {
            is_shutdown: self.is_shutdown,
            notify: self.notify.resubscribe(),
        }
    }

    /// Whether the shutdown notification has already been observed.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Non-blocking check. A dropped sender counts as shutdown.
    pub fn poll(&mut self) -> bool {
        if !self.is_shutdown {
            match self.notify.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => self.is_shutdown = true,
                Err(broadcast::error::TryRecvError::Closed) => self.is_shutdown = true,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }
        }
        self.is_shutdown
    }

    /// Wait for the shutdown notification. Cancel safe.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // Any outcome (value, lag, closed sender) means stop.
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

/// Wait for Ctrl-C (or SIGTERM on unix) and broadcast shutdown.
pub async fn listen_for_signals(shutdown_tx: broadcast::Sender<()>) {
    wait_for_signal().await;
    info!("Received shutdown signal");
    if shutdown_tx.send(()).is_err() {
        warn!("No component was listening for shutdown");
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl-C will stop the process");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
