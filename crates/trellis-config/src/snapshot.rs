//! Immutable resolved configuration and its atomically swapped holder.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::value::OptionValue;

/// One provider's slice of the resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProviderConfig {
    values: BTreeMap<String, OptionValue>,
}

impl ProviderConfig {
    pub(crate) fn from_values(values: BTreeMap<String, OptionValue>) -> Self {
        Self { values }
    }

    /// Looks up an option value.
    #[must_use]
    pub fn get(&self, option: &str) -> Option<&OptionValue> {
        self.values.get(option)
    }

    /// Looks up a boolean option.
    #[must_use]
    pub fn get_bool(&self, option: &str) -> Option<bool> {
        self.get(option).and_then(OptionValue::as_bool)
    }

    /// Looks up an integer option.
    #[must_use]
    pub fn get_integer(&self, option: &str) -> Option<i64> {
        self.get(option).and_then(OptionValue::as_integer)
    }

    /// Looks up a float option.
    #[must_use]
    pub fn get_float(&self, option: &str) -> Option<f64> {
        self.get(option).and_then(OptionValue::as_float)
    }

    /// Looks up a text option.
    #[must_use]
    pub fn get_text(&self, option: &str) -> Option<&str> {
        self.get(option).and_then(OptionValue::as_text)
    }

    /// Iterates over option values in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of options holding a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no option holds a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Immutable snapshot mapping provider name to its configuration slice.
///
/// Snapshots are ordered so their serialised form is stable: resolving the
/// same inputs twice yields byte-identical output from
/// [`ResolvedConfig::to_canonical_json`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedConfig {
    providers: BTreeMap<String, Arc<ProviderConfig>>,
}

impl ResolvedConfig {
    pub(crate) fn from_providers(providers: BTreeMap<String, ProviderConfig>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|(name, config)| (name, Arc::new(config)))
                .collect(),
        }
    }

    /// Returns one provider's slice.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name).map(Arc::as_ref)
    }

    /// Returns one provider's slice as a shared handle.
    ///
    /// Providers absent from the snapshot receive an empty slice.
    #[must_use]
    pub fn provider_shared(&self, name: &str) -> Arc<ProviderConfig> {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    /// Iterates over provider names in order.
    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Returns the providers whose slice differs between the two snapshots.
    ///
    /// Comparison is by value per option, so re-reading an unchanged source
    /// never reports a change. Providers present in only one snapshot count
    /// as changed.
    #[must_use]
    pub fn diff(&self, newer: &Self) -> BTreeSet<String> {
        let names: BTreeSet<&String> = self
            .providers
            .keys()
            .chain(newer.providers.keys())
            .collect();
        names
            .into_iter()
            .filter(|name| self.providers.get(*name) != newer.providers.get(*name))
            .cloned()
            .collect()
    }

    /// Serialises the snapshot deterministically.
    ///
    /// # Errors
    ///
    /// Returns an error if a float value cannot be represented in JSON.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Holder publishing the current snapshot to concurrent readers.
///
/// Writers replace the whole snapshot in one atomic store, so a reader sees
/// either the previous or the next snapshot, never a mixture.
#[derive(Debug)]
pub struct ConfigStore {
    current: ArcSwap<ResolvedConfig>,
}

impl ConfigStore {
    /// Publishes an initial snapshot.
    #[must_use]
    pub fn new(initial: ResolvedConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<ResolvedConfig> {
        self.current.load_full()
    }

    /// Publishes a new snapshot and returns the one it replaced.
    pub fn replace(&self, next: ResolvedConfig) -> Arc<ResolvedConfig> {
        self.current.swap(Arc::new(next))
    }
}
