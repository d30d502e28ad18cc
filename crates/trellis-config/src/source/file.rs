//! TOML file source.
//!
//! Each top-level table names a provider and each key inside it an option:
//!
//! ```toml
//! [database]
//! url = "postgres://localhost/app"
//! pool_size = 8
//! ```

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::SourceError;
use crate::value::{OptionValue, RawValue};

use super::{ConfigKey, ConfigSource, SourceEntries, priority};

/// Source reading a TOML document from disk on every load.
///
/// The file is not polled: it reports its path through
/// [`ConfigSource::watch_path`] so a running service can watch it with the
/// platform file notifier.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: Utf8PathBuf,
    priority: u32,
    required: bool,
}

impl FileSource {
    /// Creates an optional file source; a missing file yields no entries.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        let location: Utf8PathBuf = path.into();
        Self {
            name: format!("file:{location}"),
            path: location,
            priority: priority::FILE,
            required: false,
        }
    }

    /// Marks the file as mandatory.
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

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        self.path.as_path()
    }

    fn parse(&self, content: &str) -> Result<SourceEntries, SourceError> {
        let document: toml::Table = toml::from_str(content)
            .map_err(|error| SourceError::malformed(self.path.as_str(), error.message()))?;

        let mut entries = SourceEntries::new();
        for (provider, section) in document {
            let toml::Value::Table(options) = section else {
                return Err(SourceError::malformed(
                    self.path.as_str(),
                    format!("top-level key '{provider}' must be a table of options"),
                ));
            };
            for (option, value) in options {
                let converted = convert_value(&value).ok_or_else(|| {
                    SourceError::malformed(
                        self.path.as_str(),
                        format!("{provider}.{option} has an unsupported value type"),
                    )
                })?;
                entries.insert(
                    ConfigKey::new(provider.as_str(), option),
                    RawValue::Typed(converted),
                );
            }
        }
        Ok(entries)
    }
}

fn convert_value(value: &toml::Value) -> Option<OptionValue> {
    match value {
        toml::Value::Boolean(flag) => Some(OptionValue::Bool(*flag)),
        toml::Value::Integer(number) => Some(OptionValue::Integer(*number)),
        toml::Value::Float(number) => Some(OptionValue::Float(*number)),
        toml::Value::String(text) => Some(OptionValue::Text(text.clone())),
        toml::Value::Datetime(datetime) => Some(OptionValue::Text(datetime.to_string())),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

impl ConfigSource for FileSource {
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
        match fs::read_to_string(&self.path) {
            Ok(content) => self.parse(&content),
            Err(error) if error.kind() == io::ErrorKind::NotFound && !self.required => {
                Ok(SourceEntries::new())
            }
            Err(error) => Err(SourceError::io(self.path.as_str(), error)),
        }
    }

    fn watch_path(&self) -> Option<&Utf8Path> {
        Some(self.path.as_path())
    }
}
