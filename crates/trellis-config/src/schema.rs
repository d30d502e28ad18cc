//! Per-provider configuration schemas.
//!
//! A [`ConfigSchema`] lists the options one provider recognises together
//! with their types and defaults. The resolver validates every incoming
//! key against the schemas collected in a [`SchemaSet`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::ConfigError;
use crate::value::{OptionType, OptionValue};

/// Declaration of a single option.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionSpec {
    name: String,
    option_type: OptionType,
    default: Option<OptionValue>,
    required: bool,
}

impl OptionSpec {
    /// Declares an optional option without a default.
    #[must_use]
    pub fn new(name: impl Into<String>, option_type: OptionType) -> Self {
        Self {
            name: name.into(),
            option_type,
            default: None,
            required: false,
        }
    }

    /// Declares an option that must resolve to a value.
    #[must_use]
    pub fn required(name: impl Into<String>, option_type: OptionType) -> Self {
        Self {
            required: true,
            ..Self::new(name, option_type)
        }
    }

    /// Attaches a default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<OptionValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Option name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Declared type.
    #[must_use]
    pub const fn option_type(&self) -> OptionType {
        self.option_type
    }

    /// Declared default, if any.
    #[must_use]
    pub const fn default_value(&self) -> Option<&OptionValue> {
        self.default.as_ref()
    }

    /// Whether a value must be present after resolution.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }
}

/// Options recognised by one provider.
///
/// # Example
///
/// ```
/// use trellis_config::{ConfigSchema, OptionSpec, OptionType};
///
/// let schema = ConfigSchema::new("cache")
///     .option(OptionSpec::new("ttl_secs", OptionType::Integer).with_default(60_i64))
///     .expect("valid option");
/// assert!(schema.get("ttl_secs").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSchema {
    owner: String,
    options: BTreeMap<String, OptionSpec>,
}

impl ConfigSchema {
    /// Creates an empty schema for the named provider.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            options: BTreeMap::new(),
        }
    }

    /// Adds an option declaration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSchema`] when the option name is empty or
    /// duplicated, or when its default does not match the declared type.
    pub fn option(mut self, spec: OptionSpec) -> Result<Self, ConfigError> {
        if spec.name.trim().is_empty() {
            return Err(ConfigError::invalid_schema(
                &self.owner,
                "option name must not be empty",
            ));
        }
        if self.options.contains_key(spec.name()) {
            return Err(ConfigError::invalid_schema(
                &self.owner,
                format!("option '{}' is declared twice", spec.name()),
            ));
        }
        let spec = match conform_default(spec.default.as_ref(), spec.option_type) {
            Ok(default) => OptionSpec { default, ..spec },
            Err(found) => {
                return Err(ConfigError::invalid_schema(
                    &self.owner,
                    format!(
                        "default for '{}' is {found}, expected {}",
                        spec.name, spec.option_type
                    ),
                ));
            }
        };
        self.options.insert(spec.name.clone(), spec);
        Ok(self)
    }

    /// Adds a declaration known to be well formed.
    pub(crate) fn push_trusted(mut self, spec: OptionSpec) -> Self {
        self.options.insert(spec.name.clone(), spec);
        self
    }

    /// Renames the owner, keeping every option.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Name of the provider owning this schema.
    #[must_use]
    pub const fn owner(&self) -> &str {
        self.owner.as_str()
    }

    /// Looks up an option declaration.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.options.get(name)
    }

    /// Iterates over option declarations in name order.
    pub fn options(&self) -> impl Iterator<Item = &OptionSpec> {
        self.options.values()
    }

    /// Returns `true` when the schema declares no options.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

fn conform_default(
    default: Option<&OptionValue>,
    expected: OptionType,
) -> Result<Option<OptionValue>, OptionType> {
    match default {
        None => Ok(None),
        Some(value) => value
            .clone()
            .conform_to(expected)
            .map(Some)
            .ok_or(value.option_type()),
    }
}

/// Schemas taking part in one resolution pass.
///
/// Owners registered as *dormant* are known to the catalogue but not active
/// for this service; keys addressed to them are ignored rather than rejected.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    schemas: BTreeMap<String, ConfigSchema>,
    dormant: BTreeSet<String>,
}

impl SchemaSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active schema, replacing any schema with the same owner.
    pub fn insert(&mut self, schema: ConfigSchema) {
        self.dormant.remove(schema.owner());
        self.schemas.insert(schema.owner.clone(), schema);
    }

    /// Builder-style variant of [`SchemaSet::insert`].
    #[must_use]
    pub fn with(mut self, schema: ConfigSchema) -> Self {
        self.insert(schema);
        self
    }

    /// Marks an owner as known but inactive.
    pub fn mark_dormant(&mut self, owner: impl Into<String>) {
        let name = owner.into();
        if !self.schemas.contains_key(&name) {
            self.dormant.insert(name);
        }
    }

    /// Looks up the active schema for an owner.
    #[must_use]
    pub fn get(&self, owner: &str) -> Option<&ConfigSchema> {
        self.schemas.get(owner)
    }

    /// Returns `true` when the owner is known but inactive.
    #[must_use]
    pub fn is_dormant(&self, owner: &str) -> bool {
        self.dormant.contains(owner)
    }

    /// Iterates over active schemas in owner order.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigSchema> {
        self.schemas.values()
    }
}
