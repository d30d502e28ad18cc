//! Static description of a capability provider.
//!
//! A [`ProviderDescriptor`] tells the engine everything it needs before the
//! provider is instantiated: its name and variant, whether it is core or
//! optional, whom it depends on, which options it accepts, and how often it
//! should be probed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_config::{ConfigSchema, ENGINE_SECTION};

use crate::error::RegistryError;

/// Variant name used when a descriptor does not choose one.
pub const DEFAULT_VARIANT: &str = "default";

/// Whether a provider is always present or selected per service.
///
/// # Example
///
/// ```
/// use trellis_providers::ProviderKind;
///
/// assert_eq!(ProviderKind::Core.as_str(), "core");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Included in every service; its failure is fatal.
    Core,
    /// Included only when the service specification selects it.
    Optional,
}

impl ProviderKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Optional => "optional",
        }
    }

    /// Returns `true` for [`ProviderKind::Core`].
    #[must_use]
    pub const fn is_core(self) -> bool {
        matches!(self, Self::Core)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of one provider variant.
///
/// # Example
///
/// ```
/// use trellis_config::{ConfigSchema, OptionSpec, OptionType};
/// use trellis_providers::{ProviderDescriptor, ProviderKind};
///
/// let schema = ConfigSchema::new("database")
///     .option(OptionSpec::required("url", OptionType::Text))
///     .expect("valid schema");
/// let descriptor = ProviderDescriptor::new("database", ProviderKind::Optional)
///     .with_variant("postgres")
///     .depends_on("logging")
///     .with_schema(schema);
///
/// assert_eq!(descriptor.variant(), "postgres");
/// assert_eq!(descriptor.dependencies(), ["logging".to_owned()]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    name: String,
    variant: String,
    kind: ProviderKind,
    dependencies: Vec<String>,
    config_dependencies: Vec<String>,
    schema: ConfigSchema,
    health_interval: Option<Duration>,
    default_variant: bool,
}

impl ProviderDescriptor {
    /// Creates a descriptor with no dependencies and an empty schema.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        let owned = name.into();
        Self {
            schema: ConfigSchema::new(owned.as_str()),
            name: owned,
            variant: DEFAULT_VARIANT.to_owned(),
            kind,
            dependencies: Vec::new(),
            config_dependencies: Vec::new(),
            health_interval: None,
            default_variant: false,
        }
    }

    /// Names the implementation variant, e.g. `postgres` for `database`.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    /// Declares a hard dependency; repeated names are ignored.
    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        push_unique(&mut self.dependencies, dependency.into());
        self
    }

    /// Declares that this provider must be reloaded whenever `provider`'s
    /// configuration changes. This does not affect start order.
    #[must_use]
    pub fn depends_on_config_of(mut self, provider: impl Into<String>) -> Self {
        push_unique(&mut self.config_dependencies, provider.into());
        self
    }

    /// Sets the option schema; its owner is renamed to the provider name.
    #[must_use]
    pub fn with_schema(mut self, schema: ConfigSchema) -> Self {
        self.schema = schema.with_owner(self.name.as_str());
        self
    }

    /// Overrides the engine-wide health probe interval for this provider.
    #[must_use]
    pub const fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = Some(interval);
        self
    }

    /// Flags this variant as the one chosen when a specification does not
    /// name a variant.
    #[must_use]
    pub const fn as_default_variant(mut self) -> Self {
        self.default_variant = true;
        self
    }

    /// Capability name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Implementation variant.
    #[must_use]
    pub const fn variant(&self) -> &str {
        self.variant.as_str()
    }

    /// Core or optional.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Hard dependencies in declaration order.
    #[must_use]
    pub const fn dependencies(&self) -> &[String] {
        self.dependencies.as_slice()
    }

    /// Providers whose configuration changes also reload this one.
    #[must_use]
    pub const fn config_dependencies(&self) -> &[String] {
        self.config_dependencies.as_slice()
    }

    /// Accepted options.
    #[must_use]
    pub const fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    /// Per-provider probe interval, when overridden.
    #[must_use]
    pub const fn health_interval(&self) -> Option<Duration> {
        self.health_interval
    }

    /// Whether this variant was flagged as the default.
    #[must_use]
    pub const fn is_default_variant(&self) -> bool {
        self.default_variant
    }

    /// Validates the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDescriptor`] when the name or variant
    /// is empty or contains a reserved character, when the name is the
    /// engine's own configuration section or could not be addressed by an
    /// environment variable, when the provider depends on itself, or when a
    /// probe interval of zero is requested.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |message: String| RegistryError::InvalidDescriptor {
            name: self.name.clone(),
            message,
        };
        check_identifier(&self.name).map_err(|reason| invalid(format!("name {reason}")))?;
        check_provider_name(&self.name).map_err(|reason| invalid(format!("name {reason}")))?;
        check_identifier(&self.variant).map_err(|reason| invalid(format!("variant {reason}")))?;
        if let Some(dependency) = self
            .dependencies
            .iter()
            .chain(&self.config_dependencies)
            .find(|dependency| **dependency == self.name)
        {
            return Err(invalid(format!("provider cannot depend on itself ('{dependency}')")));
        }
        if self.health_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(invalid("health interval must be positive".to_owned()));
        }
        Ok(())
    }
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}

fn check_identifier(value: &str) -> Result<(), &'static str> {
    if value.trim().is_empty() {
        return Err("must not be empty");
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '=' | '.' | ','))
    {
        return Err("must not contain whitespace, '=', '.' or ','");
    }
    Ok(())
}

/// Provider names double as configuration sections and environment
/// variable segments, where `_` stands for `-` and case is folded.
fn check_provider_name(name: &str) -> Result<(), &'static str> {
    if name == ENGINE_SECTION {
        return Err("is reserved for engine settings");
    }
    if name.chars().any(|c| c == '_' || c.is_ascii_uppercase()) {
        return Err("must be lower-case and use '-' instead of '_'");
    }
    Ok(())
}
