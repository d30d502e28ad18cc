//! Process signal handling for hosts that let the engine own signals.
//!
//! `SIGHUP` queues a configuration reload; `SIGTERM`, `SIGINT` and `SIGQUIT`
//! shut the service down with the configured timeout.

use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use crate::bootstrap::ServiceHandle;
use crate::error::ShutdownError;
use crate::orchestrator::ShutdownReport;

const SIGNALS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signals");

/// Errors raised while serving process signals.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Installing the handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The shutdown that followed a termination signal was incomplete.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl ServiceHandle {
    /// Blocks serving process signals until a termination signal arrives,
    /// then shuts the service down.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Install`] when the handlers cannot be
    /// registered and [`SignalError::Shutdown`] when the final shutdown is
    /// incomplete.
    pub fn wait_for_signals(&self) -> Result<ShutdownReport, SignalError> {
        let mut signals = Signals::new([SIGHUP, SIGTERM, SIGINT, SIGQUIT])
            .map_err(|source| SignalError::Install { source })?;
        let timeout = self.settings().shutdown_timeout;
        for signal in signals.forever() {
            if signal == SIGHUP {
                info!(target: SIGNALS_TARGET, signal, "reload signal received");
                if let Err(error) = self.request_reload() {
                    warn!(target: SIGNALS_TARGET, error = %error, "reload not queued");
                }
                continue;
            }
            info!(
                target: SIGNALS_TARGET,
                signal,
                timeout_ms = timeout.as_millis(),
                "shutdown signal received"
            );
            break;
        }
        signals.handle().close();
        Ok(self.shutdown(timeout)?)
    }
}
