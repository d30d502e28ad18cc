//! Applying a new configuration snapshot to running providers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use trellis_config::ResolvedConfig;
use trellis_providers::CapabilityError;

use crate::error::{LifecycleError, Operation};
use crate::instance::{ProviderInstance, lock};
use crate::lifecycle::LifecycleState;
use crate::worker::{WorkerError, spawn_op};

use super::Orchestrator;

const RELOADABLE: [LifecycleState; 2] = [LifecycleState::Ready, LifecycleState::Degraded];

/// Providers a reload pass touched.
#[derive(Debug, Default)]
pub(crate) struct ReloadOutcome {
    pub(crate) reloaded: Vec<String>,
    pub(crate) failed: BTreeMap<String, LifecycleError>,
}

impl Orchestrator {
    /// Expands a changed set with every provider that declared a
    /// configuration dependency on a member, transitively.
    ///
    /// Names that are not part of this service are dropped.
    pub(crate) fn reload_targets(&self, changed: &BTreeSet<String>) -> BTreeSet<String> {
        let mut targets: BTreeSet<String> = changed
            .iter()
            .filter(|name| self.instance(name).is_some())
            .cloned()
            .collect();
        loop {
            let additions: Vec<String> = self
                .instances()
                .filter(|instance| !targets.contains(instance.name()))
                .filter(|instance| {
                    instance
                        .descriptor()
                        .config_dependencies()
                        .iter()
                        .any(|source| targets.contains(source))
                })
                .map(|instance| instance.name().to_owned())
                .collect();
            if additions.is_empty() {
                return targets;
            }
            targets.extend(additions);
        }
    }

    /// Reloads `targets` against `snapshot`, dependencies first.
    ///
    /// Only `Ready` and `Degraded` providers are reloaded; every other
    /// provider is left exactly as it was.
    pub(crate) fn reload_providers(
        &self,
        targets: &BTreeSet<String>,
        snapshot: &ResolvedConfig,
    ) -> ReloadOutcome {
        let mut outcome = ReloadOutcome::default();
        for name in self.graph().topological_order() {
            if self.is_stopping() {
                break;
            }
            if !targets.contains(name) {
                continue;
            }
            let Some(instance) = self.instance(name) else {
                continue;
            };
            if self
                .transition_if(instance, &RELOADABLE, LifecycleState::ReloadPending, None)
                .is_none()
            {
                continue;
            }
            match self.reload_one(instance, snapshot) {
                Ok(()) => {
                    let mut status = instance.status();
                    if status.state == LifecycleState::ReloadPending
                        && self
                            .apply(instance, &mut status, LifecycleState::Ready, None)
                            .is_ok()
                    {
                        status.reset_health();
                        status.last_error = None;
                        outcome.reloaded.push(name.to_owned());
                    }
                }
                Err(error) => {
                    drop(self.transition_if(
                        instance,
                        &[LifecycleState::ReloadPending],
                        LifecycleState::Failed,
                        Some(&error),
                    ));
                    outcome.failed.insert(name.to_owned(), error);
                }
            }
        }
        outcome
    }

    fn reload_one(
        &self,
        instance: &ProviderInstance,
        snapshot: &ResolvedConfig,
    ) -> Result<(), LifecycleError> {
        let provider = instance.name().to_owned();
        let timeout = self.settings().reload_timeout;
        let config = snapshot.provider_shared(&provider);
        let slot = instance.slot();
        let pending = spawn_op(
            format!("trellis-reload-{provider}"),
            Instant::now() + timeout,
            move || match lock(&slot).as_mut() {
                Some(capability) => capability.reload(&config),
                None => Err(CapabilityError::new("provider has no running instance")),
            },
        )
        .map_err(|source| LifecycleError::WorkerSpawn {
            provider: provider.clone(),
            source: Arc::new(source),
        })?;

        match pending.wait() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(LifecycleError::ReloadFailure {
                provider,
                source: Arc::new(source),
            }),
            Err(WorkerError::TimedOut) => Err(LifecycleError::OperationTimeout {
                provider,
                operation: Operation::Reload,
                timeout_ms: timeout.as_millis(),
            }),
            Err(WorkerError::Panicked) => Err(LifecycleError::WorkerPanicked {
                provider,
                operation: Operation::Reload,
            }),
        }
    }
}
