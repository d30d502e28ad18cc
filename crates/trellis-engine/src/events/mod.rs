//! Lifecycle and health events published to an observability collaborator.
//!
//! The engine reports through an [`EventSink`]. [`TracingEventSink`] writes
//! structured `tracing` records, [`ChannelEventSink`] forwards owned
//! [`LifecycleEvent`] values to an [`EventStream`] for hosts that want to
//! consume them programmatically.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, SystemTime};

use serde::{Serialize, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

use crate::error::{BootstrapError, ReloadError};
use crate::lifecycle::LifecycleState;
use crate::orchestrator::StartupReport;
use crate::supervisor::ReloadReport;

const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// Renders a timestamp as UTC RFC 3339.
///
/// Falls back to the Unix epoch offset when the value cannot be formatted.
#[must_use]
pub fn format_timestamp(timestamp: SystemTime) -> String {
    OffsetDateTime::from(timestamp)
        .format(&Rfc3339)
        .unwrap_or_else(|_| format!("{timestamp:?}"))
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &SystemTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*timestamp))
}

/// One provider state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    /// Provider name.
    pub provider: String,
    /// State before the change.
    pub from: LifecycleState,
    /// State after the change.
    pub to: LifecycleState,
    /// When the change was applied.
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: SystemTime,
    /// Error that caused the change, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Advisory alert raised when a provider keeps failing its health probe.
///
/// The provider stays `Degraded`; the host decides what to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradationAlert {
    /// Provider name.
    pub provider: String,
    /// Consecutive failed probes at the time of the alert.
    pub consecutive_failures: u32,
    /// Reason reported by the most recent probe.
    pub last_error: String,
    /// When the alert was raised.
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: SystemTime,
}

/// Receiver of lifecycle and health events.
///
/// Implementations must be cheap: transition events are published while the
/// provider's state lock is held.
pub trait EventSink: Send + Sync {
    /// Bootstrap of a service has begun.
    fn bootstrap_starting(&self, service_type: &str);

    /// Bootstrap finished and the service is running.
    fn bootstrap_succeeded(&self, service_type: &str, report: &StartupReport);

    /// Bootstrap failed; no service was returned.
    fn bootstrap_failed(&self, service_type: &str, error: &BootstrapError);

    /// A provider changed state.
    fn transition(&self, event: &TransitionEvent);

    /// A provider crossed the escalation threshold.
    fn persistent_degradation(&self, alert: &DegradationAlert);

    /// A reload pass finished.
    fn reload_completed(&self, report: &ReloadReport);

    /// A reload pass was rejected before touching any provider.
    fn reload_failed(&self, error: &ReloadError);
}

impl<T> EventSink for Arc<T>
where
    T: EventSink + ?Sized,
{
    fn bootstrap_starting(&self, service_type: &str) {
        self.as_ref().bootstrap_starting(service_type);
    }

    fn bootstrap_succeeded(&self, service_type: &str, report: &StartupReport) {
        self.as_ref().bootstrap_succeeded(service_type, report);
    }

    fn bootstrap_failed(&self, service_type: &str, error: &BootstrapError) {
        self.as_ref().bootstrap_failed(service_type, error);
    }

    fn transition(&self, event: &TransitionEvent) {
        self.as_ref().transition(event);
    }

    fn persistent_degradation(&self, alert: &DegradationAlert) {
        self.as_ref().persistent_degradation(alert);
    }

    fn reload_completed(&self, report: &ReloadReport) {
        self.as_ref().reload_completed(report);
    }

    fn reload_failed(&self, error: &ReloadError) {
        self.as_ref().reload_failed(error);
    }
}

/// Sink writing structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn bootstrap_starting(&self, service_type: &str) {
        info!(target: EVENTS_TARGET, service_type, "bootstrap starting");
    }

    fn bootstrap_succeeded(&self, service_type: &str, report: &StartupReport) {
        info!(
            target: EVENTS_TARGET,
            service_type,
            ready = report.ready.len(),
            failed = report.failed.len(),
            "bootstrap succeeded"
        );
    }

    fn bootstrap_failed(&self, service_type: &str, error: &BootstrapError) {
        error!(
            target: EVENTS_TARGET,
            service_type,
            error = %error,
            "bootstrap failed"
        );
    }

    fn transition(&self, event: &TransitionEvent) {
        let timestamp = format_timestamp(event.timestamp);
        match &event.error {
            Some(reason) => warn!(
                target: EVENTS_TARGET,
                provider = event.provider.as_str(),
                from = %event.from,
                to = %event.to,
                timestamp = timestamp.as_str(),
                error = reason.as_str(),
                "provider transition"
            ),
            None => info!(
                target: EVENTS_TARGET,
                provider = event.provider.as_str(),
                from = %event.from,
                to = %event.to,
                timestamp = timestamp.as_str(),
                "provider transition"
            ),
        }
    }

    fn persistent_degradation(&self, alert: &DegradationAlert) {
        warn!(
            target: EVENTS_TARGET,
            provider = alert.provider.as_str(),
            consecutive_failures = alert.consecutive_failures,
            error = alert.last_error.as_str(),
            timestamp = format_timestamp(alert.timestamp).as_str(),
            "persistent degradation"
        );
    }

    fn reload_completed(&self, report: &ReloadReport) {
        info!(
            target: EVENTS_TARGET,
            changed = ?report.changed,
            reloaded = ?report.reloaded,
            failed = report.failed.len(),
            "reload completed"
        );
    }

    fn reload_failed(&self, error: &ReloadError) {
        warn!(target: EVENTS_TARGET, error = %error, "reload rejected");
    }
}

/// Owned form of every event an [`EventSink`] receives.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// See [`EventSink::bootstrap_starting`].
    BootstrapStarting {
        /// Service being bootstrapped.
        service_type: String,
    },
    /// See [`EventSink::bootstrap_succeeded`].
    BootstrapSucceeded {
        /// Service that started.
        service_type: String,
        /// Startup outcome.
        report: StartupReport,
    },
    /// See [`EventSink::bootstrap_failed`].
    BootstrapFailed {
        /// Service that failed.
        service_type: String,
        /// Reported error.
        error: BootstrapError,
    },
    /// See [`EventSink::transition`].
    Transition(TransitionEvent),
    /// See [`EventSink::persistent_degradation`].
    PersistentDegradation(DegradationAlert),
    /// See [`EventSink::reload_completed`].
    ReloadCompleted(ReloadReport),
    /// See [`EventSink::reload_failed`].
    ReloadFailed(ReloadError),
}

/// Sink forwarding events to an [`EventStream`].
///
/// Events published after the stream is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: Sender<LifecycleEvent>,
}

impl ChannelEventSink {
    /// Creates a connected sink and stream.
    #[must_use]
    pub fn new() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, EventStream { receiver })
    }

    fn publish(&self, event: LifecycleEvent) {
        // A closed stream means nobody is listening any more.
        drop(self.sender.send(event));
    }
}

impl EventSink for ChannelEventSink {
    fn bootstrap_starting(&self, service_type: &str) {
        self.publish(LifecycleEvent::BootstrapStarting {
            service_type: service_type.to_owned(),
        });
    }

    fn bootstrap_succeeded(&self, service_type: &str, report: &StartupReport) {
        self.publish(LifecycleEvent::BootstrapSucceeded {
            service_type: service_type.to_owned(),
            report: report.clone(),
        });
    }

    fn bootstrap_failed(&self, service_type: &str, error: &BootstrapError) {
        self.publish(LifecycleEvent::BootstrapFailed {
            service_type: service_type.to_owned(),
            error: error.clone(),
        });
    }

    fn transition(&self, event: &TransitionEvent) {
        self.publish(LifecycleEvent::Transition(event.clone()));
    }

    fn persistent_degradation(&self, alert: &DegradationAlert) {
        self.publish(LifecycleEvent::PersistentDegradation(alert.clone()));
    }

    fn reload_completed(&self, report: &ReloadReport) {
        self.publish(LifecycleEvent::ReloadCompleted(report.clone()));
    }

    fn reload_failed(&self, error: &ReloadError) {
        self.publish(LifecycleEvent::ReloadFailed(error.clone()));
    }
}

/// Receiving end of a [`ChannelEventSink`].
#[derive(Debug)]
pub struct EventStream {
    receiver: Receiver<LifecycleEvent>,
}

impl EventStream {
    /// Waits up to `timeout` for the next event.
    ///
    /// Returns `None` on timeout or once every sink has been dropped.
    #[must_use]
    pub fn next_timeout(&self, timeout: Duration) -> Option<LifecycleEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns every event already queued without blocking.
    #[must_use]
    pub fn drain(&self) -> Vec<LifecycleEvent> {
        self.receiver.try_iter().collect()
    }
}
