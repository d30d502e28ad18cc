//! Drives provider instances through their lifecycle.
//!
//! The orchestrator owns every [`ProviderInstance`] of one service and is the
//! only component that changes their state. Startup, shutdown, reload and
//! health probing live in submodules; each of them funnels state changes
//! through [`Orchestrator::apply`], which validates the edge, records it and
//! publishes a [`TransitionEvent`] while the instance lock is held.

mod health;
mod reload;
mod shutdown;
mod startup;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::{debug, error};

use trellis_config::{ConfigStore, EngineSettings};
use trellis_graph::DependencyGraph;
use trellis_providers::Selection;

use crate::error::LifecycleError;
use crate::events::{EventSink, TransitionEvent};
use crate::instance::{InstanceStatus, ProviderInstance, lock};
use crate::lifecycle::{LifecycleState, validate_transition};

pub use health::ProbeOutcome;
pub use shutdown::ShutdownReport;
pub use startup::StartupReport;

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Lifecycle driver scoped to one service instance.
pub(crate) struct Orchestrator {
    service_type: String,
    instances: BTreeMap<String, Arc<ProviderInstance>>,
    graph: DependencyGraph,
    store: ConfigStore,
    settings: EngineSettings,
    sink: Arc<dyn EventSink>,
    ready_order: Mutex<Vec<String>>,
    stopping: AtomicBool,
}

impl Orchestrator {
    pub(crate) fn new(
        service_type: &str,
        selection: &Selection,
        graph: DependencyGraph,
        store: ConfigStore,
        settings: EngineSettings,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let instances = selection
            .iter()
            .map(|provider| {
                (
                    provider.name().to_owned(),
                    Arc::new(ProviderInstance::new(provider.clone())),
                )
            })
            .collect();
        Self {
            service_type: service_type.to_owned(),
            instances,
            graph,
            store,
            settings,
            sink,
            ready_order: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
        }
    }

    pub(crate) const fn service_type(&self) -> &str {
        self.service_type.as_str()
    }

    pub(crate) const fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub(crate) const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    pub(crate) const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn instance(&self, name: &str) -> Option<&Arc<ProviderInstance>> {
        self.instances.get(name)
    }

    pub(crate) fn instances(&self) -> impl Iterator<Item = &Arc<ProviderInstance>> {
        self.instances.values()
    }

    /// Providers in the order they reached `Ready` during startup.
    pub(crate) fn ready_order(&self) -> Vec<String> {
        lock(&self.ready_order).clone()
    }

    pub(crate) fn state_of(&self, name: &str) -> Option<LifecycleState> {
        self.instance(name).map(|instance| instance.state())
    }

    /// Applies a transition under an already held status lock.
    pub(crate) fn apply(
        &self,
        instance: &ProviderInstance,
        status: &mut InstanceStatus,
        to: LifecycleState,
        cause: Option<&LifecycleError>,
    ) -> Result<LifecycleState, LifecycleError> {
        let from = status.state;
        if let Err(refused) = validate_transition(instance.name(), from, to) {
            error!(
                target: LIFECYCLE_TARGET,
                provider = instance.name(),
                from = %from,
                to = %to,
                "refusing invalid transition"
            );
            return Err(refused);
        }
        status.state = to;
        let reason = cause.map(ToString::to_string);
        if reason.is_some() {
            status.last_error.clone_from(&reason);
        }
        debug!(
            target: LIFECYCLE_TARGET,
            provider = instance.name(),
            from = %from,
            to = %to,
            error = reason.as_deref(),
            "transition"
        );
        self.sink.transition(&TransitionEvent {
            provider: instance.name().to_owned(),
            from,
            to,
            timestamp: SystemTime::now(),
            error: reason,
        });
        Ok(from)
    }

    /// Locks the instance and applies one transition.
    pub(crate) fn transition(
        &self,
        instance: &ProviderInstance,
        to: LifecycleState,
        cause: Option<&LifecycleError>,
    ) -> Result<LifecycleState, LifecycleError> {
        let mut status = instance.status();
        self.apply(instance, &mut status, to, cause)
    }

    /// Applies a transition only when the instance is in one of `allowed`.
    ///
    /// Returns the previous state, or `None` when the instance was elsewhere.
    pub(crate) fn transition_if(
        &self,
        instance: &ProviderInstance,
        allowed: &[LifecycleState],
        to: LifecycleState,
        cause: Option<&LifecycleError>,
    ) -> Option<LifecycleState> {
        let mut status = instance.status();
        if !allowed.contains(&status.state) {
            return None;
        }
        self.apply(instance, &mut status, to, cause).ok()
    }

    /// Moves every remaining non-terminal instance to `Stopped` without
    /// invoking it, dependents first.
    pub(crate) fn retire_untouched(&self) {
        let order = self.graph.topological_order();
        for name in order.into_iter().rev() {
            let Some(instance) = self.instance(name) else {
                continue;
            };
            let mut status = instance.status();
            if status.state.is_terminal() {
                continue;
            }
            if self
                .apply(instance, &mut status, LifecycleState::ShuttingDown, None)
                .is_ok()
            {
                drop(self.apply(instance, &mut status, LifecycleState::Stopped, None));
            }
        }
    }

    /// Marks the service as stopping; returns `false` if it already was.
    fn begin_stopping(&self) -> bool {
        !self.stopping.swap(true, Ordering::AcqRel)
    }

    fn record_ready(&self, name: &str) {
        lock(&self.ready_order).push(name.to_owned());
    }
}
