//! Lifecycle engine for capability-based services.
//!
//! [`Bootstrap`] takes a provider catalogue, a set of configuration sources
//! and a [`ServiceSpecification`](trellis_providers::ServiceSpecification),
//! and returns a running [`ServiceHandle`]:
//!
//! 1. the catalogue selects the providers the specification needs;
//! 2. the selection is ordered into dependency levels;
//! 3. configuration is resolved and validated against every schema;
//! 4. providers are initialised level by level, concurrently within a level;
//! 5. a supervisor probes health and watches the sources for changes.
//!
//! Every provider moves through the [`LifecycleState`] machine, and each
//! change is published to an [`EventSink`]. Shutdown runs in exact reverse
//! startup order.

mod bootstrap;
mod error;
pub mod events;
mod instance;
pub mod lifecycle;
mod orchestrator;
#[cfg(unix)]
mod signals;
mod supervisor;
pub mod telemetry;
mod worker;

pub use bootstrap::{Bootstrap, ServiceHandle, ServiceState, ShutdownTrigger, bootstrap};
pub use error::{
    BootstrapError, LifecycleError, Operation, ProviderFailure, ReloadError, ShutdownError,
};
pub use events::{
    ChannelEventSink, DegradationAlert, EventSink, EventStream, LifecycleEvent, TracingEventSink,
    TransitionEvent,
};
pub use lifecycle::{LifecycleState, validate_transition};
pub use orchestrator::{ProbeOutcome, ShutdownReport, StartupReport};
#[cfg(unix)]
pub use signals::SignalError;
pub use supervisor::ReloadReport;
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
