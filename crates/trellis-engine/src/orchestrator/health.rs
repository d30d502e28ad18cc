//! Health probing and consecutive-failure accounting.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};

use trellis_providers::HealthStatus;

use crate::error::LifecycleError;
use crate::events::DegradationAlert;
use crate::instance::lock;
use crate::lifecycle::LifecycleState;
use crate::worker::{PendingOp, WorkerError, spawn_op};

use super::{LIFECYCLE_TARGET, Orchestrator};

/// Result of one health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The provider reported itself healthy.
    Healthy,
    /// The probe failed, timed out or panicked, or an earlier probe is
    /// still running past its timeout.
    Unhealthy(String),
    /// No probe ran: the provider is not running, or a reload, shutdown or
    /// probe within its timeout holds the instance.
    Skipped,
}

enum Attempt {
    Checked(Option<HealthStatus>),
    Busy,
}

/// Marks a health check as running until dropped, even when it panics.
struct RunningCheck<'clock> {
    clock: &'clock Mutex<Option<Instant>>,
}

impl<'clock> RunningCheck<'clock> {
    fn start(clock: &'clock Mutex<Option<Instant>>) -> Self {
        *lock(clock) = Some(Instant::now());
        Self { clock }
    }
}

impl Drop for RunningCheck<'_> {
    fn drop(&mut self) {
        *lock(self.clock) = None;
    }
}

/// Classifies a probe that found the instance locked.
///
/// An earlier health check still running past its timeout is a failure of
/// this tick too; any other holder (reload, shutdown, a probe within its
/// budget) means the tick is skipped.
fn busy_outcome(clock: &Mutex<Option<Instant>>, timeout: Duration) -> ProbeOutcome {
    match *lock(clock) {
        Some(started) if started.elapsed() >= timeout => ProbeOutcome::Unhealthy(format!(
            "previous health check still running after {} ms",
            started.elapsed().as_millis()
        )),
        _ => ProbeOutcome::Skipped,
    }
}

impl Orchestrator {
    /// Probes one provider and applies the outcome to its state.
    ///
    /// Returns `None` for names that are not part of the service.
    pub(crate) fn probe(&self, name: &str) -> Option<ProbeOutcome> {
        let instance = self.instance(name)?;
        if self.is_stopping()
            || !matches!(
                instance.state(),
                LifecycleState::Ready | LifecycleState::Degraded
            )
        {
            return Some(ProbeOutcome::Skipped);
        }

        let timeout = self.settings().health_timeout;
        let slot = instance.slot();
        let clock = instance.check_clock();
        let worker_clock = Arc::clone(&clock);
        let spawned = spawn_op(
            format!("trellis-health-{name}"),
            Instant::now() + timeout,
            move || {
                let mut guard = match slot.try_lock() {
                    Ok(held) => held,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => return Attempt::Busy,
                };
                let _running = RunningCheck::start(&worker_clock);
                Attempt::Checked(guard.as_mut().map(|capability| capability.health_check()))
            },
        );
        let outcome = match spawned.map(PendingOp::wait) {
            Ok(Ok(Attempt::Busy)) => busy_outcome(&clock, timeout),
            Ok(Ok(Attempt::Checked(None))) => ProbeOutcome::Skipped,
            Ok(Ok(Attempt::Checked(Some(HealthStatus::Healthy)))) => ProbeOutcome::Healthy,
            Ok(Ok(Attempt::Checked(Some(HealthStatus::Unhealthy(reason))))) => {
                ProbeOutcome::Unhealthy(reason)
            }
            Ok(Err(WorkerError::TimedOut)) => ProbeOutcome::Unhealthy(format!(
                "health check exceeded {} ms",
                timeout.as_millis()
            )),
            Ok(Err(WorkerError::Panicked)) => {
                ProbeOutcome::Unhealthy("health check panicked".to_owned())
            }
            Err(error) => ProbeOutcome::Unhealthy(format!("health worker not spawned: {error}")),
        };
        Some(self.record_probe(name, outcome))
    }

    fn record_probe(&self, name: &str, outcome: ProbeOutcome) -> ProbeOutcome {
        let Some(instance) = self.instance(name) else {
            return ProbeOutcome::Skipped;
        };
        let settings = self.settings();
        let mut status = instance.status();
        if !matches!(
            status.state,
            LifecycleState::Ready | LifecycleState::Degraded
        ) {
            debug!(
                target: LIFECYCLE_TARGET,
                provider = name,
                state = %status.state,
                "discarding probe result after a concurrent transition"
            );
            return ProbeOutcome::Skipped;
        }

        let mut alert = None;
        match &outcome {
            ProbeOutcome::Skipped => {}
            ProbeOutcome::Healthy => {
                status.reset_health();
                if status.state == LifecycleState::Degraded {
                    drop(self.apply(instance, &mut status, LifecycleState::Ready, None));
                }
            }
            ProbeOutcome::Unhealthy(reason) => {
                status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                status.last_error = Some(reason.clone());
                if status.state == LifecycleState::Ready
                    && status.consecutive_failures >= settings.degrade_after
                {
                    let error = LifecycleError::Unhealthy {
                        provider: name.to_owned(),
                        reason: reason.clone(),
                    };
                    drop(self.apply(
                        instance,
                        &mut status,
                        LifecycleState::Degraded,
                        Some(&error),
                    ));
                }
                if status.consecutive_failures >= settings.escalate_after && !status.escalated {
                    status.escalated = true;
                    alert = Some(DegradationAlert {
                        provider: name.to_owned(),
                        consecutive_failures: status.consecutive_failures,
                        last_error: reason.clone(),
                        timestamp: SystemTime::now(),
                    });
                }
            }
        }
        drop(status);

        if let Some(raised) = alert {
            warn!(
                target: LIFECYCLE_TARGET,
                provider = name,
                consecutive_failures = raised.consecutive_failures,
                "provider persistently degraded"
            );
            self.sink().persistent_degradation(&raised);
        }
        outcome
    }
}
