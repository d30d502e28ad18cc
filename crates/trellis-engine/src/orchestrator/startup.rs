//! Level-by-level startup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use trellis_config::ProviderConfig;
use trellis_providers::CapabilityError;

use crate::bootstrap::ShutdownTrigger;
use crate::error::{BootstrapError, LifecycleError, Operation, ProviderFailure};
use crate::instance::{ProviderInstance, lock};
use crate::lifecycle::LifecycleState;
use crate::worker::{PendingOp, WorkerError, spawn_op};

use super::{LIFECYCLE_TARGET, Orchestrator};

/// Outcome of a successful startup.
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    /// Providers in the order they became `Ready`.
    pub ready: Vec<String>,
    /// Optional providers that failed, with the reason.
    pub failed: BTreeMap<String, LifecycleError>,
}

enum Launch {
    Started(PendingOp<Result<(), CapabilityError>>),
    Refused(LifecycleError),
}

impl Orchestrator {
    /// Initialises every provider, one dependency level at a time.
    ///
    /// Providers inside a level start concurrently and share one deadline;
    /// the next level is admitted only once every provider of the current
    /// one is `Ready` or `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Startup`] when a core provider fails and
    /// [`BootstrapError::Cancelled`] when `trigger` fires between levels. In
    /// both cases every provider that reached `Ready` has been shut down.
    pub(crate) fn start(&self, trigger: &ShutdownTrigger) -> Result<StartupReport, BootstrapError> {
        let levels: Vec<Vec<String>> = self
            .graph()
            .levels()
            .into_iter()
            .map(|level| level.into_iter().map(str::to_owned).collect())
            .collect();

        let mut failed = BTreeMap::new();
        for (depth, level) in levels.iter().enumerate() {
            if trigger.is_triggered() {
                info!(
                    target: LIFECYCLE_TARGET,
                    level = depth,
                    "startup cancelled by shutdown request"
                );
                let report = self.unwind();
                return Err(BootstrapError::Cancelled {
                    stopped: report.stopped,
                });
            }

            let fatal = self.start_level(depth, level, &mut failed);
            if !fatal.is_empty() {
                warn!(
                    target: LIFECYCLE_TARGET,
                    level = depth,
                    failures = fatal.len(),
                    "core provider failed; unwinding startup"
                );
                self.unwind();
                return Err(BootstrapError::Startup { failures: fatal });
            }
        }

        Ok(StartupReport {
            ready: self.ready_order(),
            failed,
        })
    }

    /// Starts one level and returns the core failures it produced.
    fn start_level(
        &self,
        depth: usize,
        level: &[String],
        failed: &mut BTreeMap<String, LifecycleError>,
    ) -> Vec<ProviderFailure> {
        let deadline = Instant::now() + self.settings().init_timeout;
        let snapshot = self.store().current();
        let mut launches = Vec::with_capacity(level.len());
        for name in level {
            let Some(instance) = self.instance(name) else {
                continue;
            };
            let launch = self.launch(instance, snapshot.provider_shared(name), deadline);
            launches.push((Arc::clone(instance), launch));
        }
        info!(
            target: LIFECYCLE_TARGET,
            level = depth,
            providers = launches.len(),
            "level started"
        );

        let mut fatal = Vec::new();
        for (instance, launch) in launches {
            let outcome = match launch {
                Launch::Started(pending) => self.settle(&instance, pending),
                Launch::Refused(error) => Err(error),
            };
            let Err(error) = outcome else {
                continue;
            };
            if instance.is_core() {
                fatal.push(ProviderFailure {
                    provider: instance.name().to_owned(),
                    error,
                });
            } else {
                failed.insert(instance.name().to_owned(), error);
            }
        }
        fatal
    }

    /// Binds configuration and spawns `init`, or refuses when a dependency
    /// is not `Ready`.
    fn launch(
        &self,
        instance: &ProviderInstance,
        config: Arc<ProviderConfig>,
        deadline: Instant,
    ) -> Launch {
        if let Err(error) = self.transition(instance, LifecycleState::Configuring, None) {
            return Launch::Refused(error);
        }

        let blocked = instance
            .descriptor()
            .dependencies()
            .iter()
            .find(|dependency| self.state_of(dependency) != Some(LifecycleState::Ready));
        if let Some(dependency) = blocked {
            let error = LifecycleError::DependencyFailed {
                provider: instance.name().to_owned(),
                dependency: dependency.clone(),
            };
            drop(self.transition(instance, LifecycleState::Failed, Some(&error)));
            return Launch::Refused(error);
        }

        if let Err(error) = self.transition(instance, LifecycleState::Initializing, None) {
            return Launch::Refused(error);
        }

        let provider = instance.provider().clone();
        let slot = instance.slot();
        let spawned = spawn_op(
            format!("trellis-init-{}", instance.name()),
            deadline,
            move || {
                let mut capability = provider.instantiate()?;
                capability.init(&config)?;
                *lock(&slot) = Some(capability);
                Ok(())
            },
        );
        match spawned {
            Ok(pending) => Launch::Started(pending),
            Err(source) => {
                let error = LifecycleError::WorkerSpawn {
                    provider: instance.name().to_owned(),
                    source: Arc::new(source),
                };
                drop(self.transition(instance, LifecycleState::Failed, Some(&error)));
                Launch::Refused(error)
            }
        }
    }

    /// Waits for one `init` and records its outcome.
    fn settle(
        &self,
        instance: &ProviderInstance,
        pending: PendingOp<Result<(), CapabilityError>>,
    ) -> Result<(), LifecycleError> {
        let provider = instance.name().to_owned();
        let error = match pending.wait() {
            Ok(Ok(())) => {
                self.transition(instance, LifecycleState::Ready, None)?;
                self.record_ready(&provider);
                return Ok(());
            }
            Ok(Err(source)) => LifecycleError::InitFailure {
                provider,
                source: Arc::new(source),
            },
            Err(WorkerError::TimedOut) => LifecycleError::OperationTimeout {
                provider,
                operation: Operation::Init,
                timeout_ms: self.settings().init_timeout.as_millis(),
            },
            Err(WorkerError::Panicked) => LifecycleError::WorkerPanicked {
                provider,
                operation: Operation::Init,
            },
        };
        drop(self.transition(instance, LifecycleState::Failed, Some(&error)));
        Err(error)
    }
}
