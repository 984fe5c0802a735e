//! Node-wide stop signal.
//!
//! The flag lives in a `watch` channel, so a session spawned after the node
//! began stopping (an accept or dial racing `stop`) sees it immediately
//! instead of waiting for a notification it missed.

use tokio::signal;
use tokio::sync::watch;

pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

/// One task's view of the stop flag.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown has been triggered, or at once if it already was.
    pub async fn recv(&mut self) {
        // A dropped controller means the node is gone; treat it as a stop.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Set the stop flag. Later calls are no-ops.
    pub fn shutdown(&self) {
        self.tx.send_if_modified(|stopped| !std::mem::replace(stopped, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Block until SIGINT or SIGTERM, then set the stop flag.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting on SIGINT only");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let mut stopped = self.subscribe();
        tokio::select! {
            _ = ctrl_c => tracing::info!(signal = "SIGINT", "stopping beacon node"),
            _ = terminate => tracing::info!(signal = "SIGTERM", "stopping beacon node"),
            _ = stopped.recv() => return,
        }

        self.shutdown();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn late_subscriber_sees_an_earlier_shutdown() {
        let controller = ShutdownController::new();
        controller.shutdown();

        let mut signal = controller.subscribe();
        assert!(signal.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn every_session_is_released() {
        let controller = ShutdownController::new();
        let mut first = controller.subscribe();
        let mut second = first.clone();
        assert!(!controller.is_triggered());

        controller.shutdown();
        controller.shutdown();
        first.recv().await;
        second.recv().await;
        assert!(controller.is_triggered());
    }

    #[tokio::test]
    async fn dropping_the_controller_releases_waiters() {
        let controller = ShutdownController::new();
        let mut signal = controller.subscribe();
        drop(controller);
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .unwrap();
    }
}
