//! One configuration reload pass: resolve, diff, swap, reload.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use trellis_config::{ConfigResolver, ENGINE_SECTION, SchemaSet};

use crate::error::{LifecycleError, ReloadError};
use crate::instance::lock;
use crate::orchestrator::Orchestrator;

use super::SUPERVISOR_TARGET;

/// Outcome of one reload pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadReport {
    /// Providers whose configuration slice changed.
    pub changed: BTreeSet<String>,
    /// Providers reloaded successfully, dependencies first.
    pub reloaded: Vec<String>,
    /// Providers whose reload failed; they are now `Failed`.
    #[serde(serialize_with = "serialize_errors")]
    pub failed: BTreeMap<String, LifecycleError>,
}

fn serialize_errors<S: serde::Serializer>(
    errors: &BTreeMap<String, LifecycleError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(errors.iter().map(|(name, error)| (name, error.to_string())))
}

impl ReloadReport {
    /// Returns `true` when the pass changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.reloaded.is_empty() && self.failed.is_empty()
    }
}

pub(crate) struct Reloader {
    orchestrator: Arc<Orchestrator>,
    resolver: ConfigResolver,
    schemas: SchemaSet,
    pass: Mutex<()>,
}

impl Reloader {
    pub(crate) fn new(
        orchestrator: Arc<Orchestrator>,
        resolver: ConfigResolver,
        schemas: SchemaSet,
    ) -> Self {
        Self {
            orchestrator,
            resolver,
            schemas,
            pass: Mutex::new(()),
        }
    }

    pub(crate) const fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Runs one pass. Passes never overlap.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::Configuration`] when the sources no longer
    /// resolve; the previous snapshot stays in force and no provider is
    /// touched.
    pub(crate) fn run(&self) -> Result<ReloadReport, ReloadError> {
        let _pass = lock(&self.pass);
        let outcome = self.run_locked();
        let sink = self.orchestrator.sink();
        match &outcome {
            Ok(report) => sink.reload_completed(report),
            Err(error) => sink.reload_failed(error),
        }
        outcome
    }

    fn run_locked(&self) -> Result<ReloadReport, ReloadError> {
        if self.orchestrator.is_stopping() {
            return Err(ReloadError::ShuttingDown);
        }
        let next = self.resolver.resolve(&self.schemas).map_err(|error| {
            warn!(
                target: SUPERVISOR_TARGET,
                error = %error,
                "keeping previous configuration"
            );
            ReloadError::Configuration(error)
        })?;

        let store = self.orchestrator.store();
        let mut changed = store.current().diff(&next);
        if changed.remove(ENGINE_SECTION) {
            info!(
                target: SUPERVISOR_TARGET,
                "engine settings changed; they apply after a restart"
            );
        }
        drop(store.replace(next));
        if changed.is_empty() {
            return Ok(ReloadReport::default());
        }

        let snapshot = store.current();
        let targets = self.orchestrator.reload_targets(&changed);
        info!(
            target: SUPERVISOR_TARGET,
            changed = ?changed,
            targets = ?targets,
            "reloading providers"
        );
        let outcome = self.orchestrator.reload_providers(&targets, &snapshot);
        Ok(ReloadReport {
            changed,
            reloaded: outcome.reloaded,
            failed: outcome.failed,
        })
    }
}
