//! Error types surfaced by the lifecycle engine.

use std::fmt;
use std::io;
use std::sync::Arc;

use strum::{Display, EnumString};
use thiserror::Error;

use trellis_config::ConfigError;
use trellis_graph::GraphError;
use trellis_providers::{CapabilityError, RegistryError};

use crate::lifecycle::LifecycleState;
use crate::orchestrator::ShutdownReport;
use crate::telemetry::TelemetryError;

/// Capability operation driven by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    /// `Capability::init`.
    Init,
    /// `Capability::health_check`.
    HealthCheck,
    /// `Capability::reload`.
    Reload,
    /// `Capability::shutdown`.
    Shutdown,
}

/// Failure of one provider during a lifecycle phase.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// The provider's `init` returned an error.
    #[error("provider '{provider}' failed to initialise: {source}")]
    InitFailure {
        /// Provider name.
        provider: String,
        /// Error reported by the capability.
        #[source]
        source: Arc<CapabilityError>,
    },
    /// An operation did not finish within its budget.
    #[error("provider '{provider}' did not finish {operation} within {timeout_ms} ms")]
    OperationTimeout {
        /// Provider name.
        provider: String,
        /// Operation that timed out.
        operation: Operation,
        /// Budget in milliseconds.
        timeout_ms: u128,
    },
    /// Shutdown did not finish before the overall deadline.
    #[error("provider '{provider}' was abandoned when the shutdown deadline elapsed")]
    ShutdownTimeout {
        /// Provider name.
        provider: String,
    },
    /// The provider's `shutdown` returned an error.
    #[error("provider '{provider}' failed to shut down: {source}")]
    ShutdownFailure {
        /// Provider name.
        provider: String,
        /// Error reported by the capability.
        #[source]
        source: Arc<CapabilityError>,
    },
    /// The provider's `reload` returned an error.
    #[error("provider '{provider}' rejected the new configuration: {source}")]
    ReloadFailure {
        /// Provider name.
        provider: String,
        /// Error reported by the capability.
        #[source]
        source: Arc<CapabilityError>,
    },
    /// A health probe reported the provider as impaired.
    #[error("provider '{provider}' failed its health check: {reason}")]
    Unhealthy {
        /// Provider name.
        provider: String,
        /// Reason reported by the probe.
        reason: String,
    },
    /// A dependency failed, so the provider was never initialised.
    #[error("provider '{provider}' was not started because dependency '{dependency}' failed")]
    DependencyFailed {
        /// Provider name.
        provider: String,
        /// Dependency that is not ready.
        dependency: String,
    },
    /// A state change not allowed by the state machine was requested.
    #[error("provider '{provider}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Provider name.
        provider: String,
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
    /// The capability panicked while running an operation.
    #[error("provider '{provider}' panicked during {operation}")]
    WorkerPanicked {
        /// Provider name.
        provider: String,
        /// Operation that panicked.
        operation: Operation,
    },
    /// No worker thread could be spawned for the operation.
    #[error("failed to spawn a worker for provider '{provider}': {source}")]
    WorkerSpawn {
        /// Provider name.
        provider: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl LifecycleError {
    /// Name of the provider the error is recorded against.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::InitFailure { provider, .. }
            | Self::OperationTimeout { provider, .. }
            | Self::ShutdownTimeout { provider }
            | Self::ShutdownFailure { provider, .. }
            | Self::ReloadFailure { provider, .. }
            | Self::Unhealthy { provider, .. }
            | Self::DependencyFailed { provider, .. }
            | Self::InvalidTransition { provider, .. }
            | Self::WorkerPanicked { provider, .. }
            | Self::WorkerSpawn { provider, .. } => provider,
        }
    }
}

/// Provider that failed fatally during startup.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    /// Provider name.
    pub provider: String,
    /// What went wrong.
    pub error: LifecycleError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.provider, self.error)
    }
}

/// Errors returned by [`crate::Bootstrap::start`].
///
/// Configuration and graph errors are raised before any provider starts;
/// [`BootstrapError::Startup`] is raised after every started provider has
/// been unwound.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// The service specification does not match the catalogue.
    #[error("invalid service specification: {0}")]
    Registry(#[from] RegistryError),
    /// The selected providers do not form a valid graph.
    #[error("invalid provider graph: {0}")]
    Graph(#[from] GraphError),
    /// Configuration could not be resolved.
    #[error("configuration rejected: {0}")]
    Configuration(#[from] ConfigError),
    /// Telemetry could not be installed.
    #[error(transparent)]
    Telemetry(#[from] Arc<TelemetryError>),
    /// Background supervision threads could not be started.
    #[error("failed to start supervision threads: {source}")]
    Supervisor {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// One or more core providers failed to start.
    #[error("startup aborted: {}", render_failures(.failures))]
    Startup {
        /// Every fatal provider failure, in the order observed.
        failures: Vec<ProviderFailure>,
    },
    /// A shutdown was requested while startup was in progress.
    #[error("startup cancelled after {} provider(s) were unwound", .stopped.len())]
    Cancelled {
        /// Providers unwound because of the cancellation.
        stopped: Vec<String>,
    },
}

impl BootstrapError {
    /// Names of the providers that failed fatally.
    #[must_use]
    pub fn failed_providers(&self) -> Vec<&str> {
        match self {
            Self::Startup { failures } => failures
                .iter()
                .map(|failure| failure.provider.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn render_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by [`crate::ServiceHandle::shutdown`].
#[derive(Debug, Clone, Error)]
pub enum ShutdownError {
    /// The service was already shut down.
    #[error("service already stopped")]
    AlreadyStopped,
    /// Some providers failed or timed out; every provider is still stopped.
    #[error("shutdown completed with {} error(s)", .report.errors.len())]
    Incomplete {
        /// Full report, including the recorded errors.
        report: ShutdownReport,
    },
}

/// Errors returned by a reload pass.
#[derive(Debug, Clone, Error)]
pub enum ReloadError {
    /// Re-resolution failed; the previous snapshot stays in force.
    #[error("configuration reload rejected: {0}")]
    Configuration(#[from] ConfigError),
    /// The service is shutting down.
    #[error("service is shutting down")]
    ShuttingDown,
    /// The reload queue is no longer serviced.
    #[error("reload queue closed")]
    QueueClosed,
}
