//! Reverse-order shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{LifecycleError, Operation, ShutdownError};
use crate::instance::{ProviderInstance, lock};
use crate::lifecycle::LifecycleState;
use crate::worker::{WorkerError, spawn_op};

use super::{LIFECYCLE_TARGET, Orchestrator};

/// Outcome of a shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Providers whose `shutdown` was invoked, in invocation order.
    pub stopped: Vec<String>,
    /// Providers that failed or were abandoned, with the reason.
    pub errors: BTreeMap<String, LifecycleError>,
}

impl ShutdownReport {
    /// Returns `true` when every provider shut down cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

const STOPPABLE: [LifecycleState; 3] = [
    LifecycleState::Ready,
    LifecycleState::Degraded,
    LifecycleState::ReloadPending,
];

impl Orchestrator {
    /// Shuts down every running provider in reverse startup order.
    ///
    /// Errors and timeouts are collected, never fatal: every provider ends
    /// `Stopped` (or stays `Failed`) whatever its `shutdown` did. Once
    /// `timeout` has elapsed the remaining providers are abandoned with
    /// [`LifecycleError::ShutdownTimeout`].
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::AlreadyStopped`] on a second call.
    pub(crate) fn stop(&self, timeout: Duration) -> Result<ShutdownReport, ShutdownError> {
        if !self.begin_stopping() {
            return Err(ShutdownError::AlreadyStopped);
        }
        let deadline = Instant::now() + timeout;
        info!(
            target: LIFECYCLE_TARGET,
            service_type = self.service_type(),
            timeout_ms = timeout.as_millis(),
            "shutting down"
        );

        let mut report = ShutdownReport::default();
        for name in self.ready_order().iter().rev() {
            let Some(instance) = self.instance(name) else {
                continue;
            };
            if self
                .transition_if(instance, &STOPPABLE, LifecycleState::ShuttingDown, None)
                .is_none()
            {
                continue;
            }
            let outcome = self.shut_down_one(instance, deadline);
            if let Err(error) = &outcome {
                warn!(
                    target: LIFECYCLE_TARGET,
                    provider = name.as_str(),
                    error = %error,
                    "provider did not shut down cleanly"
                );
            }
            drop(self.transition(
                instance,
                LifecycleState::Stopped,
                outcome.as_ref().err(),
            ));
            report.stopped.push(name.clone());
            if let Err(error) = outcome {
                report.errors.insert(name.clone(), error);
            }
        }

        self.retire_untouched();
        Ok(report)
    }

    /// Shuts down after a failed or cancelled startup.
    pub(crate) fn unwind(&self) -> ShutdownReport {
        self.stop(self.settings().shutdown_timeout)
            .unwrap_or_default()
    }

    fn shut_down_one(
        &self,
        instance: &ProviderInstance,
        deadline: Instant,
    ) -> Result<(), LifecycleError> {
        let provider = instance.name().to_owned();
        if Instant::now() >= deadline {
            return Err(LifecycleError::ShutdownTimeout { provider });
        }
        let slot = instance.slot();
        let pending = spawn_op(format!("trellis-shutdown-{provider}"), deadline, move || {
            let mut guard = lock(&slot);
            let outcome = guard.as_mut().map_or(Ok(()), |capability| capability.shutdown());
            *guard = None;
            outcome
        })
        .map_err(|source| LifecycleError::WorkerSpawn {
            provider: provider.clone(),
            source: Arc::new(source),
        })?;

        match pending.wait() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(LifecycleError::ShutdownFailure {
                provider,
                source: Arc::new(source),
            }),
            Err(WorkerError::TimedOut) => Err(LifecycleError::ShutdownTimeout { provider }),
            Err(WorkerError::Panicked) => Err(LifecycleError::WorkerPanicked {
                provider,
                operation: Operation::Shutdown,
            }),
        }
    }
}
