//! Host-facing entry point and service handle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use strum::Display;
use tracing::{info, warn};

use trellis_config::{
    ConfigResolverBuilder, ConfigSource, ConfigStore, EngineSettings, ProviderConfig,
    ResolvedConfig,
};
use trellis_graph::DependencyGraph;
use trellis_providers::{CapabilityRegistry, ServiceSpecification};

use crate::error::{BootstrapError, ReloadError, ShutdownError};
use crate::events::{EventSink, TracingEventSink};
use crate::instance::lock;
use crate::lifecycle::LifecycleState;
use crate::orchestrator::{
    LIFECYCLE_TARGET, Orchestrator, ProbeOutcome, ShutdownReport, StartupReport,
};
use crate::supervisor::{ReloadReport, Reloader, Supervisor};
use crate::telemetry::{self, TelemetryHandle};

/// Cancellation flag shared between a bootstrap and other threads.
///
/// Triggering it while [`Bootstrap::start`] runs cancels startup at the next
/// level boundary.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    flag: Arc<AtomicBool>,
}

impl ShutdownTrigger {
    /// Requests cancellation.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Aggregate state reported by [`ServiceHandle::readiness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    /// Every core provider is `Ready`.
    Ready,
    /// Every core provider runs, but at least one is degraded or reloading.
    Degraded,
    /// A core provider is `Failed`.
    Failed,
    /// The service has been shut down.
    Stopped,
}

/// Builder for one service instance.
///
/// # Example
///
/// ```
/// use trellis_config::{ProviderConfig, MapSource};
/// use trellis_engine::Bootstrap;
/// use trellis_providers::{
///     Capability, CapabilityError, CapabilityRegistry, ProviderDescriptor, ProviderKind,
///     ServiceSpecification,
/// };
///
/// #[derive(Default)]
/// struct Clock;
///
/// impl Capability for Clock {
///     fn init(&mut self, _: &ProviderConfig) -> Result<(), CapabilityError> { Ok(()) }
///     fn reload(&mut self, _: &ProviderConfig) -> Result<(), CapabilityError> { Ok(()) }
/// }
///
/// let mut registry = CapabilityRegistry::new();
/// registry
///     .register(ProviderDescriptor::new("clock", ProviderKind::Core), Clock::default)
///     .expect("valid descriptor");
///
/// let handle = Bootstrap::new(registry)
///     .source(MapSource::defaults())
///     .without_telemetry()
///     .start(&ServiceSpecification::builder("worker").build())
///     .expect("service starts");
/// assert!(handle.is_ready());
/// handle.shutdown(std::time::Duration::from_secs(1)).expect("clean shutdown");
/// ```
pub struct Bootstrap {
    registry: CapabilityRegistry,
    resolver: ConfigResolverBuilder,
    sink: Arc<dyn EventSink>,
    telemetry: bool,
    trigger: ShutdownTrigger,
}

impl Bootstrap {
    /// Starts a builder over a provider catalogue.
    #[must_use]
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            registry,
            resolver: ConfigResolverBuilder::default(),
            sink: Arc::new(TracingEventSink),
            telemetry: true,
            trigger: ShutdownTrigger::default(),
        }
    }

    /// Adds a configuration source.
    #[must_use]
    pub fn source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.resolver = self.resolver.source(source);
        self
    }

    /// Adds a configuration source the host keeps a handle to.
    #[must_use]
    pub fn shared_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.resolver = self.resolver.shared_source(source);
        self
    }

    /// Replaces every source registered so far.
    #[must_use]
    pub fn resolver(mut self, resolver: ConfigResolverBuilder) -> Self {
        self.resolver = resolver;
        self
    }

    /// Routes lifecycle events to `sink` instead of `tracing`.
    #[must_use]
    pub fn event_sink(self, sink: impl EventSink + 'static) -> Self {
        self.shared_event_sink(Arc::new(sink))
    }

    /// Routes lifecycle events to a shared sink.
    #[must_use]
    pub fn shared_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Leaves the global `tracing` subscriber to the host.
    #[must_use]
    pub const fn without_telemetry(mut self) -> Self {
        self.telemetry = false;
        self
    }

    /// Returns a trigger that cancels the startup in progress.
    #[must_use]
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Resolves, validates and starts the service described by `spec`.
    ///
    /// Nothing is initialised unless the specification, the dependency
    /// graph and the configuration are all valid.
    ///
    /// # Errors
    ///
    /// Returns a [`BootstrapError`]; when it is raised after providers
    /// started, they have already been shut down again.
    pub fn start(self, spec: &ServiceSpecification) -> Result<ServiceHandle, BootstrapError> {
        let sink = Arc::clone(&self.sink);
        sink.bootstrap_starting(spec.service_type());
        let started = self.start_inner(spec);
        match &started {
            Ok(handle) => sink.bootstrap_succeeded(spec.service_type(), handle.startup_report()),
            Err(error) => sink.bootstrap_failed(spec.service_type(), error),
        }
        started
    }

    fn start_inner(self, spec: &ServiceSpecification) -> Result<ServiceHandle, BootstrapError> {
        let selection = self.registry.select(spec)?;
        let graph = DependencyGraph::build(selection.descriptors())?;
        let resolver = self.resolver.source(spec.overrides_source()).build()?;
        let schemas = selection.schemas_with([EngineSettings::schema()]);
        let resolved = resolver.resolve(&schemas)?;
        let settings = EngineSettings::from_config(&resolved)?;
        let telemetry = if self.telemetry {
            Some(telemetry::initialise(&settings).map_err(Arc::new)?)
        } else {
            None
        };

        info!(
            target: LIFECYCLE_TARGET,
            service_type = spec.service_type(),
            providers = selection.len(),
            levels = graph.level_count(),
            "starting service"
        );
        let orchestrator = Arc::new(Orchestrator::new(
            spec.service_type(),
            &selection,
            graph,
            ConfigStore::new(resolved),
            settings,
            self.sink,
        ));
        let report = orchestrator.start(&self.trigger)?;

        let reloader = Arc::new(Reloader::new(Arc::clone(&orchestrator), resolver, schemas));
        let supervisor = Supervisor::start(&orchestrator, &reloader).map_err(|source| {
            drop(orchestrator.unwind());
            BootstrapError::Supervisor {
                source: Arc::new(source),
            }
        })?;

        Ok(ServiceHandle {
            orchestrator,
            reloader,
            supervisor: Mutex::new(Some(supervisor)),
            startup: report,
            telemetry,
        })
    }
}

/// Starts a service from a catalogue, a set of sources and a specification.
///
/// Equivalent to `Bootstrap::new(registry).resolver(resolver).start(spec)`.
///
/// # Errors
///
/// See [`Bootstrap::start`].
pub fn bootstrap(
    registry: CapabilityRegistry,
    resolver: ConfigResolverBuilder,
    spec: &ServiceSpecification,
) -> Result<ServiceHandle, BootstrapError> {
    Bootstrap::new(registry).resolver(resolver).start(spec)
}

/// Running service.
///
/// Dropping a handle that was not shut down explicitly shuts the service
/// down with the configured default timeout.
pub struct ServiceHandle {
    orchestrator: Arc<Orchestrator>,
    reloader: Arc<Reloader>,
    supervisor: Mutex<Option<Supervisor>>,
    startup: StartupReport,
    telemetry: Option<TelemetryHandle>,
}

impl ServiceHandle {
    /// Service type from the specification.
    #[must_use]
    pub fn service_type(&self) -> &str {
        self.orchestrator.service_type()
    }

    /// Aggregate state over the core providers.
    #[must_use]
    pub fn readiness(&self) -> ServiceState {
        if self.orchestrator.is_stopping() {
            return ServiceState::Stopped;
        }
        let core: Vec<LifecycleState> = self
            .orchestrator
            .instances()
            .filter(|instance| instance.is_core())
            .map(|instance| instance.state())
            .collect();
        if core.contains(&LifecycleState::Failed) {
            ServiceState::Failed
        } else if core.iter().all(|state| *state == LifecycleState::Ready) {
            ServiceState::Ready
        } else if core.iter().any(|state| state.is_terminal()) {
            ServiceState::Stopped
        } else {
            ServiceState::Degraded
        }
    }

    /// Returns `true` only when every core provider is `Ready`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness() == ServiceState::Ready
    }

    /// Returns `false` only when a core provider is `Failed`.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self
            .orchestrator
            .instances()
            .any(|instance| instance.is_core() && instance.state() == LifecycleState::Failed)
    }

    /// Current state of one provider.
    #[must_use]
    pub fn state_of(&self, provider: &str) -> Option<LifecycleState> {
        self.orchestrator.state_of(provider)
    }

    /// Current state of every provider, by name.
    #[must_use]
    pub fn states(&self) -> BTreeMap<String, LifecycleState> {
        self.orchestrator
            .instances()
            .map(|instance| (instance.name().to_owned(), instance.state()))
            .collect()
    }

    /// Most recent error recorded against a provider.
    #[must_use]
    pub fn last_error(&self, provider: &str) -> Option<String> {
        self.orchestrator
            .instance(provider)
            .and_then(|instance| instance.status().last_error.clone())
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<ResolvedConfig> {
        self.orchestrator.store().current()
    }

    /// Current configuration slice of one provider.
    #[must_use]
    pub fn provider_config(&self, provider: &str) -> Arc<ProviderConfig> {
        self.config().provider_shared(provider)
    }

    /// Engine settings in force since startup.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        self.orchestrator.settings()
    }

    /// What happened during startup.
    #[must_use]
    pub const fn startup_report(&self) -> &StartupReport {
        &self.startup
    }

    /// Telemetry installed by this bootstrap, if any.
    #[must_use]
    pub const fn telemetry(&self) -> Option<TelemetryHandle> {
        self.telemetry
    }

    /// Queues a reload pass on the supervisor's reload worker.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::ShuttingDown`] once shutdown has begun.
    pub fn request_reload(&self) -> Result<(), ReloadError> {
        match lock(&self.supervisor).as_ref() {
            Some(supervisor) => supervisor.request_reload(),
            None => Err(ReloadError::ShuttingDown),
        }
    }

    /// Runs a reload pass on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::Configuration`] when the sources no longer
    /// resolve; nothing changes in that case.
    pub fn reload_now(&self) -> Result<ReloadReport, ReloadError> {
        self.reloader.run()
    }

    /// Probes one provider immediately, outside its schedule.
    #[must_use]
    pub fn probe_now(&self, provider: &str) -> Option<ProbeOutcome> {
        self.orchestrator.probe(provider)
    }

    /// Stops supervision and shuts every provider down in reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::AlreadyStopped`] on a second call and
    /// [`ShutdownError::Incomplete`] when any provider failed or timed out.
    pub fn shutdown(&self, timeout: Duration) -> Result<ShutdownReport, ShutdownError> {
        let mut supervisor = lock(&self.supervisor).take();
        if let Some(running) = supervisor.as_mut() {
            running.stop();
        }
        let outcome = self.orchestrator.stop(timeout);
        if let Some(mut running) = supervisor {
            running.join();
        }
        let report = outcome?;
        if report.is_clean() {
            Ok(report)
        } else {
            Err(ShutdownError::Incomplete { report })
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if self.orchestrator.is_stopping() {
            return;
        }
        let timeout = self.orchestrator.settings().shutdown_timeout;
        if let Err(error) = self.shutdown(timeout) {
            warn!(
                target: LIFECYCLE_TARGET,
                error = %error,
                "implicit shutdown on drop was incomplete"
            );
        }
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ServiceHandle")
            .field("service_type", &self.service_type())
            .field("readiness", &self.readiness())
            .finish_non_exhaustive()
    }
}
