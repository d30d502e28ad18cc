//! In-memory source used for shipped defaults and specification overrides.

use crate::error::SourceError;
use crate::value::{OptionValue, RawValue};

use super::{ConfigKey, ConfigSource, SourceEntries, priority};

/// Source backed by a fixed set of typed entries.
///
/// # Example
///
/// ```
/// use trellis_config::{ConfigSource, MapSource};
///
/// let source = MapSource::defaults().with("cache", "ttl_secs", 30_i64);
/// assert_eq!(source.load().expect("in-memory load").len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MapSource {
    name: String,
    priority: u32,
    entries: SourceEntries,
}

impl MapSource {
    /// Creates an empty source with an explicit name and rank.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            entries: SourceEntries::new(),
        }
    }

    /// Creates an empty source ranked as shipped defaults.
    #[must_use]
    pub fn defaults() -> Self {
        Self::new("defaults", priority::DEFAULTS)
    }

    /// Adds or replaces a typed entry.
    #[must_use]
    pub fn with(
        mut self,
        provider: impl Into<String>,
        option: impl Into<String>,
        value: impl Into<OptionValue>,
    ) -> Self {
        self.insert(provider, option, value);
        self
    }

    /// Adds or replaces a typed entry in place.
    pub fn insert(
        &mut self,
        provider: impl Into<String>,
        option: impl Into<String>,
        value: impl Into<OptionValue>,
    ) {
        self.entries.insert(
            ConfigKey::new(provider, option),
            RawValue::Typed(value.into()),
        );
    }

    /// Adds or replaces an untyped entry parsed against the schema later.
    #[must_use]
    pub fn with_text(
        mut self,
        provider: impl Into<String>,
        option: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            ConfigKey::new(provider, option),
            RawValue::Text(value.into()),
        );
        self
    }

    /// Changes the precedence rank.
    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns `true` when no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ConfigSource for MapSource {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn load(&self) -> Result<SourceEntries, SourceError> {
        Ok(self.entries.clone())
    }
}
