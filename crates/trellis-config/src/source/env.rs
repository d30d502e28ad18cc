//! Environment variable source.
//!
//! Variables follow `<PREFIX>_<PROVIDER>__<OPTION>`: the double underscore
//! separates provider from option, both segments are lower-cased, and single
//! underscores inside the provider segment become dashes so that
//! `TRELLIS_MESSAGE_BUS__BROKER_URL` addresses `message-bus.broker_url`.

use std::ffi::OsString;

use crate::error::SourceError;
use crate::value::RawValue;

use super::{ConfigKey, ConfigSource, SourceEntries, WatchToken, priority};

/// Default variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "TRELLIS";

/// Source reading prefixed variables from the process environment.
#[derive(Debug, Clone)]
pub struct EnvSource {
    name: String,
    prefix: String,
    priority: u32,
    snapshot: Option<Vec<(OsString, OsString)>>,
}

impl EnvSource {
    /// Reads variables carrying the default prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Reads variables carrying the given prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let upper = prefix.into().to_ascii_uppercase();
        Self {
            name: format!("env:{upper}"),
            prefix: upper,
            priority: priority::ENVIRONMENT,
            snapshot: None,
        }
    }

    /// Reads from a fixed variable list instead of the live environment.
    #[must_use]
    pub fn from_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.snapshot = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Changes the precedence rank.
    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    fn variables(&self) -> Vec<(OsString, OsString)> {
        match &self.snapshot {
            Some(vars) => vars.clone(),
            None => std::env::vars_os().collect(),
        }
    }

    fn parse_name(&self, name: &str) -> Option<ConfigKey> {
        let rest = name.strip_prefix(self.prefix.as_str())?.strip_prefix('_')?;
        let (provider, option) = rest.split_once("__")?;
        if provider.is_empty() || option.is_empty() {
            return None;
        }
        Some(ConfigKey::new(
            provider.to_ascii_lowercase().replace('_', "-"),
            option.to_ascii_lowercase(),
        ))
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for EnvSource {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn load(&self) -> Result<SourceEntries, SourceError> {
        let mut entries = SourceEntries::new();
        for (raw_name, raw_value) in self.variables() {
            let Some(name) = raw_name.to_str() else {
                continue;
            };
            let Some(key) = self.parse_name(name) else {
                continue;
            };
            let value = raw_value.into_string().map_err(|_| {
                SourceError::malformed(self.name.as_str(), format!("{name} is not valid UTF-8"))
            })?;
            entries.insert(key, RawValue::Text(value));
        }
        Ok(entries)
    }

    fn watch_token(&self) -> Option<WatchToken> {
        let mut relevant: Vec<String> = self
            .variables()
            .into_iter()
            .filter_map(|(raw_name, value)| {
                let name = raw_name.into_string().ok()?;
                self.parse_name(&name)?;
                Some(format!("{name}={}", value.to_string_lossy()))
            })
            .collect();
        relevant.sort();
        Some(WatchToken::new(relevant.join("\u{1f}")))
    }
}
