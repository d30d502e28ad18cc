//! Remote configuration store adapter.
//!
//! The store itself is an external collaborator; this module only adapts its
//! key/value snapshot into the resolver's source contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SourceError;
use crate::value::RawValue;

use super::{ConfigSource, SourceEntries, WatchToken, priority, split_dotted_key};

/// Snapshot returned by a remote store: dotted keys mapped to text values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    /// Store revision at the time of the read.
    pub revision: String,
    /// Entries keyed by `provider.option`.
    pub values: BTreeMap<String, String>,
}

/// Client for a remote key/value configuration store.
pub trait RemoteStore: Send + Sync {
    /// Endpoint or store identifier used in diagnostics.
    fn location(&self) -> &str;

    /// Fetches the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the store cannot be reached.
    fn fetch(&self) -> Result<RemoteSnapshot, SourceError>;

    /// Returns the current revision without fetching values.
    ///
    /// The default implementation fetches the full snapshot.
    fn revision(&self) -> Option<String> {
        self.fetch().ok().map(|snapshot| snapshot.revision)
    }
}

/// Source backed by a [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteSource {
    name: String,
    store: Arc<dyn RemoteStore>,
    priority: u32,
    required: bool,
}

impl RemoteSource {
    /// Adapts a store as an optional source.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            name: format!("remote:{}", store.location()),
            store,
            priority: priority::REMOTE,
            required: false,
        }
    }

    /// Marks the store as mandatory; an unreachable store aborts resolution.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Changes the precedence rank.
    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteSource")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

impl ConfigSource for RemoteSource {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn load(&self) -> Result<SourceEntries, SourceError> {
        let snapshot = self.store.fetch()?;
        let mut entries = SourceEntries::new();
        for (key, value) in snapshot.values {
            let parsed = split_dotted_key(&key).ok_or_else(|| {
                SourceError::malformed(
                    self.store.location(),
                    format!("key '{key}' must address provider.option"),
                )
            })?;
            entries.insert(parsed, RawValue::Text(value));
        }
        Ok(entries)
    }

    fn watch_token(&self) -> Option<WatchToken> {
        self.store.revision().map(WatchToken::new)
    }
}
