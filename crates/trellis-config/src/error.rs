//! Errors raised while declaring schemas and resolving configuration.

use std::sync::Arc;

use thiserror::Error;

/// Errors reported by a single configuration source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The source could not be read at all.
    #[error("failed to read {location}: {source}")]
    Io {
        /// File path or endpoint that was read.
        location: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The source was read but its content is malformed.
    #[error("malformed content in {location}: {message}")]
    Malformed {
        /// File path or endpoint that was read.
        location: String,
        /// Description of the parse failure.
        message: String,
    },
    /// A remote store reported a failure.
    #[error("remote store {location} unavailable: {message}")]
    Remote {
        /// Endpoint or store identifier.
        location: String,
        /// Description reported by the store.
        message: String,
    },
}

impl SourceError {
    /// Wraps an I/O error.
    #[must_use]
    pub fn io(location: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            location: location.into(),
            source: Arc::new(source),
        }
    }

    /// Builds a malformed-content error.
    #[must_use]
    pub fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Reports whether the source was readable but its content did not parse.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }

    /// Builds a remote-store error.
    #[must_use]
    pub fn remote(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the configuration resolver.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A value does not match the type declared by the owning schema.
    #[error(
        "{provider}.{option}: {found} does not conform to {expected} (from source '{source_name}')"
    )]
    SchemaViolation {
        /// Owning provider.
        provider: String,
        /// Option name.
        option: String,
        /// Declared type or constraint.
        expected: String,
        /// Rendering of the offending value.
        found: String,
        /// Source that supplied the value.
        source_name: String,
    },
    /// A key addresses no known provider/option pair.
    #[error("unknown configuration key {provider}.{option} (from source '{source_name}')")]
    UnknownKey {
        /// Provider segment of the key.
        provider: String,
        /// Option segment of the key.
        option: String,
        /// Source that supplied the key.
        source_name: String,
    },
    /// A required option resolved to no value.
    #[error("required option {provider}.{option} has no value")]
    MissingRequiredOption {
        /// Owning provider.
        provider: String,
        /// Option name.
        option: String,
    },
    /// A required source could not be read, or any source held malformed content.
    #[error("configuration source '{source_name}' is unavailable: {source}")]
    SourceUnavailable {
        /// Name of the source.
        source_name: String,
        /// Underlying source failure.
        #[source]
        source: SourceError,
    },
    /// Two sources were registered with the same priority.
    #[error("sources '{first}' and '{second}' share priority {priority}")]
    PriorityConflict {
        /// Source registered first.
        first: String,
        /// Source registered second.
        second: String,
        /// Shared priority rank.
        priority: u32,
    },
    /// A schema declaration is invalid.
    #[error("invalid schema for '{owner}': {message}")]
    InvalidSchema {
        /// Owning provider.
        owner: String,
        /// Description of the problem.
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid_schema(owner: &str, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            owner: owner.to_owned(),
            message: message.into(),
        }
    }

    /// Builds a schema violation for a value that failed a semantic check.
    #[must_use]
    pub fn violation(
        provider: impl Into<String>,
        option: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            provider: provider.into(),
            option: option.into(),
            expected: expected.into(),
            found: found.into(),
            source_name: source_name.into(),
        }
    }
}
