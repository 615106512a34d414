//! Invocation-scoped cancellation
//!
//! Cancelling stops local work between units (archive entries, command
//! dispatches). A command that is already running on the target machine is
//! left to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::ShipError;

/// Shared cancellation flag for one invocation
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`ShipError::Cancelled`] once cancellation was requested
    pub fn check(&self) -> Result<(), ShipError> {
        if self.is_cancelled() {
            Err(ShipError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancel this invocation when the process receives SIGINT or SIGTERM
    pub fn cancel_on_shutdown_signal(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            await_shutdown_signal().await;
            warn!("Cancelling: no further commands will be dispatched");
            this.cancel();
        });
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received");
        }
    }
}
