//! Declarative input naming the providers one service instance needs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use trellis_config::{MapSource, OptionValue, priority};

/// Name of the in-memory source carrying specification overrides.
pub const OVERRIDES_SOURCE: &str = "specification";

/// Errors produced when parsing a [`FeatureSelector`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorParseError {
    /// The capability name was empty.
    #[error("selector '{0}' does not name a capability")]
    MissingName(String),
    /// An `=` was present but no variant followed it.
    #[error("selector '{0}' has an empty variant after '='")]
    MissingVariant(String),
}

/// One requested capability, optionally pinned to a variant.
///
/// Parsed from `name` or `name=variant`, e.g. `auth=jwt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSelector {
    /// Capability name.
    pub name: String,
    /// Requested variant; `None` selects the capability's default.
    pub variant: Option<String>,
}

impl FeatureSelector {
    /// Creates a selector.
    #[must_use]
    pub fn new(name: impl Into<String>, variant: Option<String>) -> Self {
        Self {
            name: name.into(),
            variant,
        }
    }
}

impl fmt::Display for FeatureSelector {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(formatter, "{}={variant}", self.name),
            None => formatter.write_str(&self.name),
        }
    }
}

impl FromStr for FeatureSelector {
    type Err = SelectorParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, variant) = match input.split_once('=') {
            Some((name, variant)) => {
                let trimmed = variant.trim();
                if trimmed.is_empty() {
                    return Err(SelectorParseError::MissingVariant(input.to_owned()));
                }
                (name.trim(), Some(trimmed.to_owned()))
            }
            None => (input.trim(), None),
        };
        if name.is_empty() {
            return Err(SelectorParseError::MissingName(input.to_owned()));
        }
        Ok(Self::new(name, variant))
    }
}

/// Which capabilities a service uses and how their configuration is
/// overridden.
///
/// A specification is immutable once built; starting a service with a
/// different selection requires a new specification.
///
/// # Example
///
/// ```
/// use trellis_providers::ServiceSpecification;
///
/// let spec = ServiceSpecification::builder("orders-api")
///     .select("auth=jwt".parse().expect("valid selector"))
///     .feature("cache")
///     .override_option("cache", "ttl", 30_i64)
///     .build();
///
/// assert_eq!(spec.requested_variant("auth"), Some("jwt"));
/// assert!(spec.requests("cache"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSpecification {
    service_type: String,
    features: BTreeMap<String, Option<String>>,
    overrides: BTreeMap<String, BTreeMap<String, OptionValue>>,
}

impl ServiceSpecification {
    /// Starts building a specification for the given service type.
    #[must_use]
    pub fn builder(service_type: impl Into<String>) -> ServiceSpecificationBuilder {
        ServiceSpecificationBuilder {
            spec: Self {
                service_type: service_type.into(),
                ..Self::default()
            },
        }
    }

    /// Parses selectors such as `auth=jwt` or `cache` into a specification.
    ///
    /// # Errors
    ///
    /// Returns a [`SelectorParseError`] for the first malformed selector.
    pub fn from_selectors<I, S>(
        service_type: impl Into<String>,
        selectors: I,
    ) -> Result<Self, SelectorParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = Self::builder(service_type);
        for selector in selectors {
            builder = builder.select(selector.as_ref().parse()?);
        }
        Ok(builder.build())
    }

    /// Kind of service being composed, used in logs.
    #[must_use]
    pub const fn service_type(&self) -> &str {
        self.service_type.as_str()
    }

    /// Requested capabilities with their optional variant, in name order.
    pub fn features(&self) -> impl Iterator<Item = FeatureSelector> + '_ {
        self.features
            .iter()
            .map(|(name, variant)| FeatureSelector::new(name.as_str(), variant.clone()))
    }

    /// Returns `true` when the capability was requested.
    #[must_use]
    pub fn requests(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// Variant explicitly requested for a capability.
    #[must_use]
    pub fn requested_variant(&self, name: &str) -> Option<&str> {
        self.features.get(name).and_then(Option::as_deref)
    }

    /// Configuration overrides carried by the specification.
    #[must_use]
    pub const fn overrides(&self) -> &BTreeMap<String, BTreeMap<String, OptionValue>> {
        &self.overrides
    }

    /// Exposes the overrides as a configuration source ranked above every
    /// built-in source.
    #[must_use]
    pub fn overrides_source(&self) -> MapSource {
        let mut source = MapSource::new(OVERRIDES_SOURCE, priority::SPECIFICATION);
        for (provider, options) in &self.overrides {
            for (option, value) in options {
                source.insert(provider.as_str(), option.as_str(), value.clone());
            }
        }
        source
    }
}

/// Builder for [`ServiceSpecification`].
#[derive(Debug, Clone)]
pub struct ServiceSpecificationBuilder {
    spec: ServiceSpecification,
}

impl ServiceSpecificationBuilder {
    /// Requests a capability with its default variant.
    #[must_use]
    pub fn feature(self, name: impl Into<String>) -> Self {
        self.select(FeatureSelector::new(name, None))
    }

    /// Requests a capability pinned to a variant.
    #[must_use]
    pub fn feature_variant(self, name: impl Into<String>, variant: impl Into<String>) -> Self {
        self.select(FeatureSelector::new(name, Some(variant.into())))
    }

    /// Requests a parsed selector; a later selector for the same name wins.
    #[must_use]
    pub fn select(mut self, selector: FeatureSelector) -> Self {
        self.spec.features.insert(selector.name, selector.variant);
        self
    }

    /// Overrides one provider option.
    #[must_use]
    pub fn override_option(
        mut self,
        provider: impl Into<String>,
        option: impl Into<String>,
        value: impl Into<OptionValue>,
    ) -> Self {
        self.spec
            .overrides
            .entry(provider.into())
            .or_default()
            .insert(option.into(), value.into());
        self
    }

    /// Finishes the specification.
    #[must_use]
    pub fn build(self) -> ServiceSpecification {
        self.spec
    }
}
