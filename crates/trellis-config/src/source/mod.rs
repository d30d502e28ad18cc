//! Configuration sources and their precedence ranks.
//!
//! Every source yields key/value pairs tagged with a provider name and an
//! option name. The resolver consults sources from the lowest to the highest
//! [`ConfigSource::priority`] and keeps the last value seen per key, so a
//! higher-ranked source overrides individual keys without masking the rest
//! of a lower-ranked source.

mod args;
mod env;
mod file;
mod map;
mod remote;

use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8Path;

pub use args::ArgsSource;
pub use env::{DEFAULT_ENV_PREFIX, EnvSource};
pub use file::FileSource;
pub use map::MapSource;
pub use remote::{RemoteSnapshot, RemoteSource, RemoteStore};

use crate::error::SourceError;
use crate::value::RawValue;

/// Default precedence ranks, lowest first.
pub mod priority {
    /// Static defaults shipped with the service.
    pub const DEFAULTS: u32 = 0;
    /// Configuration files.
    pub const FILE: u32 = 10;
    /// Process environment.
    pub const ENVIRONMENT: u32 = 20;
    /// Remote configuration store.
    pub const REMOTE: u32 = 30;
    /// Command-line overrides.
    pub const COMMAND_LINE: u32 = 40;
    /// Overrides carried by the service specification itself.
    pub const SPECIFICATION: u32 = 45;
}

/// Fully qualified configuration key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigKey {
    provider: String,
    option: String,
}

impl ConfigKey {
    /// Builds a key from its two segments.
    #[must_use]
    pub fn new(provider: impl Into<String>, option: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            option: option.into(),
        }
    }

    /// Provider segment.
    #[must_use]
    pub const fn provider(&self) -> &str {
        self.provider.as_str()
    }

    /// Option segment.
    #[must_use]
    pub const fn option(&self) -> &str {
        self.option.as_str()
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}", self.provider, self.option)
    }
}

/// Key/value pairs read from one source.
pub type SourceEntries = BTreeMap<ConfigKey, RawValue>;

/// Opaque marker compared between polls to detect that a source changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchToken(String);

impl WatchToken {
    /// Wraps a revision marker.
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// Returns the revision marker.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// One origin of configuration values.
pub trait ConfigSource: Send + Sync {
    /// Human-readable name used in errors and logs.
    fn name(&self) -> &str;

    /// Precedence rank; higher ranks win per key.
    fn priority(&self) -> u32;

    /// Whether a read failure aborts resolution.
    fn is_required(&self) -> bool {
        false
    }

    /// Reads every entry the source currently holds.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the source cannot be read or parsed.
    fn load(&self) -> Result<SourceEntries, SourceError>;

    /// Returns a marker that changes whenever the source content changes.
    ///
    /// Sources that cannot detect changes return `None` and are never
    /// reported by the watcher.
    fn watch_token(&self) -> Option<WatchToken> {
        None
    }

    /// Local file backing the source, watched for changes by the
    /// filesystem notifier instead of being polled.
    fn watch_path(&self) -> Option<&Utf8Path> {
        None
    }
}

/// Splits `provider.option` into a [`ConfigKey`].
pub(crate) fn split_dotted_key(text: &str) -> Option<ConfigKey> {
    let (provider, option) = text.split_once('.')?;
    let (provider_name, option_name) = (provider.trim(), option.trim());
    if provider_name.is_empty() || option_name.is_empty() {
        return None;
    }
    Some(ConfigKey::new(provider_name, option_name))
}
