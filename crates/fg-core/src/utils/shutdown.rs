use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::OpContext;

/// Process-wide shutdown signal.
///
/// Every in-flight request context is derived from [`GracefulShutdown::context`],
/// so requesting shutdown cancels them all.
pub struct GracefulShutdown {
    token: CancellationToken,
    is_shutting_down: AtomicBool,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            is_shutting_down: AtomicBool::new(false),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Relaxed)
    }

    /// Token that is cancelled once shutdown is requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A fresh operation context that is cancelled with the process.
    pub fn context(&self) -> OpContext {
        OpContext::from_token(self.token.child_token())
    }

    pub fn request_shutdown(&self) {
        if !self.is_shutting_down.swap(true, Ordering::Relaxed) {
            info!("Shutdown requested, cancelling in-flight operations");
            self.token.cancel();
        }
    }

    /// Resolve once shutdown has been requested by anyone.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Wait for SIGINT / SIGTERM (Ctrl+C elsewhere), then request shutdown.
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) {
                (Ok(mut sigint), Ok(mut sigterm)) => {
                    tokio::select! {
                        _ = sigint.recv() => info!("Received SIGINT"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = self.token.cancelled() => return,
                    }
                }
                _ => {
                    warn!("Could not install signal handlers, falling back to Ctrl+C");
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                        _ = self.token.cancelled() => return,
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                _ = self.token.cancelled() => return,
            }
        }
        self.request_shutdown();
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}
