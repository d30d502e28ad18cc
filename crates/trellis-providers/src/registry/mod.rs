//! Catalogue of provider variants and per-service selection.
//!
//! The [`CapabilityRegistry`] is populated once at process start. Each
//! service instance then calls [`CapabilityRegistry::select`] with its
//! [`ServiceSpecification`] to obtain the [`Selection`] of providers it will
//! run: every core provider, every requested optional provider, and every
//! provider those depend on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;
use trellis_config::{ConfigSchema, SchemaSet};

use crate::capability::{Capability, CapabilityError, ProviderFactory};
use crate::descriptor::{ProviderDescriptor, ProviderKind};
use crate::error::RegistryError;
use crate::specification::ServiceSpecification;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// A registered descriptor paired with the factory that instantiates it.
#[derive(Clone)]
pub struct RegisteredProvider {
    descriptor: Arc<ProviderDescriptor>,
    factory: Arc<dyn ProviderFactory>,
}

impl RegisteredProvider {
    /// Static description of the provider.
    #[must_use]
    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Builds a fresh instance.
    ///
    /// # Errors
    ///
    /// Propagates the factory's [`CapabilityError`].
    pub fn instantiate(&self) -> Result<Box<dyn Capability>, CapabilityError> {
        self.factory.create(&self.descriptor)
    }
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RegisteredProvider")
            .field("name", &self.descriptor.name())
            .field("variant", &self.descriptor.variant())
            .field("kind", &self.descriptor.kind())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct CatalogueEntry {
    kind: ProviderKind,
    variants: Vec<RegisteredProvider>,
    default_index: Option<usize>,
}

impl CatalogueEntry {
    fn default_variant(&self) -> Option<&RegisteredProvider> {
        self.variants.get(self.default_index.unwrap_or(0))
    }

    fn variant(&self, variant: &str) -> Option<&RegisteredProvider> {
        self.variants
            .iter()
            .find(|registered| registered.descriptor.variant() == variant)
    }
}

/// Static catalogue of every known provider variant.
///
/// # Example
///
/// ```
/// use trellis_config::ProviderConfig;
/// use trellis_providers::{
///     Capability, CapabilityError, CapabilityRegistry, ProviderDescriptor, ProviderKind,
///     ServiceSpecification,
/// };
///
/// #[derive(Default)]
/// struct Noop;
///
/// impl Capability for Noop {
///     fn init(&mut self, _: &ProviderConfig) -> Result<(), CapabilityError> { Ok(()) }
///     fn reload(&mut self, _: &ProviderConfig) -> Result<(), CapabilityError> { Ok(()) }
/// }
///
/// let mut registry = CapabilityRegistry::new();
/// registry
///     .register(ProviderDescriptor::new("logging", ProviderKind::Core), Noop::default)
///     .expect("registration succeeds");
/// registry
///     .register(
///         ProviderDescriptor::new("cache", ProviderKind::Optional).depends_on("logging"),
///         Noop::default,
///     )
///     .expect("registration succeeds");
///
/// let spec = ServiceSpecification::builder("api").feature("cache").build();
/// let selection = registry.select(&spec).expect("known capabilities");
/// assert_eq!(selection.names().collect::<Vec<_>>(), ["cache", "logging"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, CatalogueEntry>,
}

impl CapabilityRegistry {
    /// Creates an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one provider variant.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDescriptor`] when validation fails,
    /// [`RegistryError::DuplicateProvider`] for a repeated `(name, variant)`,
    /// [`RegistryError::KindConflict`] when variants disagree on their kind,
    /// [`RegistryError::DuplicateDefault`] for a second default variant, and
    /// [`RegistryError::CoreDependsOnOptional`] when a core provider would
    /// depend on an optional one.
    pub fn register(
        &mut self,
        descriptor: ProviderDescriptor,
        factory: impl ProviderFactory + 'static,
    ) -> Result<(), RegistryError> {
        self.register_shared(descriptor, Arc::new(factory))
    }

    /// Registers a provider variant whose factory is shared elsewhere.
    ///
    /// # Errors
    ///
    /// See [`CapabilityRegistry::register`].
    pub fn register_shared(
        &mut self,
        descriptor: ProviderDescriptor,
        factory: Arc<dyn ProviderFactory>,
    ) -> Result<(), RegistryError> {
        descriptor.validate()?;
        self.check_kind_ordering(&descriptor)?;

        if let Some(entry) = self.entries.get(descriptor.name()) {
            if entry.kind != descriptor.kind() {
                return Err(RegistryError::KindConflict {
                    name: descriptor.name().to_owned(),
                    existing: entry.kind.to_string(),
                    requested: descriptor.kind().to_string(),
                });
            }
            if entry.variant(descriptor.variant()).is_some() {
                return Err(RegistryError::DuplicateProvider {
                    name: descriptor.name().to_owned(),
                    variant: descriptor.variant().to_owned(),
                });
            }
            if descriptor.is_default_variant() {
                if let Some(existing) = entry
                    .default_index
                    .and_then(|index| entry.variants.get(index))
                {
                    return Err(RegistryError::DuplicateDefault {
                        name: descriptor.name().to_owned(),
                        existing: existing.descriptor.variant().to_owned(),
                    });
                }
            }
        }

        debug!(
            target: REGISTRY_TARGET,
            provider = descriptor.name(),
            variant = descriptor.variant(),
            kind = %descriptor.kind(),
            "registered provider"
        );
        let is_default = descriptor.is_default_variant();
        let entry = self
            .entries
            .entry(descriptor.name().to_owned())
            .or_insert_with(|| CatalogueEntry {
                kind: descriptor.kind(),
                variants: Vec::new(),
                default_index: None,
            });
        if is_default {
            entry.default_index = Some(entry.variants.len());
        }
        entry.variants.push(RegisteredProvider {
            descriptor: Arc::new(descriptor),
            factory,
        });
        Ok(())
    }

    fn check_kind_ordering(&self, descriptor: &ProviderDescriptor) -> Result<(), RegistryError> {
        if descriptor.kind().is_core() {
            if let Some(optional) = descriptor.dependencies().iter().find(|dependency| {
                self.entries
                    .get(dependency.as_str())
                    .is_some_and(|entry| !entry.kind.is_core())
            }) {
                return Err(RegistryError::CoreDependsOnOptional {
                    core: descriptor.name().to_owned(),
                    optional: optional.clone(),
                });
            }
            return Ok(());
        }
        let dependent_core = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.kind.is_core())
            .flat_map(|(_, entry)| &entry.variants)
            .find(|registered| {
                registered
                    .descriptor
                    .dependencies()
                    .iter()
                    .any(|dependency| dependency == descriptor.name())
            });
        match dependent_core {
            Some(core) => Err(RegistryError::CoreDependsOnOptional {
                core: core.name().to_owned(),
                optional: descriptor.name().to_owned(),
            }),
            None => Ok(()),
        }
    }

    /// Looks up the default variant of a capability.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.entries.get(name).and_then(CatalogueEntry::default_variant)
    }

    /// Looks up a specific variant of a capability.
    #[must_use]
    pub fn get_variant(&self, name: &str, variant: &str) -> Option<&RegisteredProvider> {
        self.entries.get(name).and_then(|entry| entry.variant(variant))
    }

    /// Capability names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns the number of registered capability names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Projects the catalogue onto a service specification.
    ///
    /// The result holds every core provider, every requested provider, and
    /// the transitive closure of their dependencies. Dependencies absent from
    /// the catalogue are left for the graph builder to report. The call is
    /// pure: the same catalogue and specification always give the same
    /// selection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCapability`] or
    /// [`RegistryError::UnknownVariant`] when the specification names
    /// something the catalogue does not offer.
    pub fn select(&self, spec: &ServiceSpecification) -> Result<Selection, RegistryError> {
        let mut chosen: BTreeMap<&str, &RegisteredProvider> = BTreeMap::new();
        let mut pending: Vec<&str> = Vec::new();

        for feature in spec.features() {
            let entry = self.entries.get(feature.name.as_str()).ok_or_else(|| {
                RegistryError::UnknownCapability {
                    name: feature.name.clone(),
                }
            })?;
            if let Some(variant) = feature.variant.as_deref() {
                if entry.variant(variant).is_none() {
                    return Err(RegistryError::UnknownVariant {
                        name: feature.name.clone(),
                        variant: variant.to_owned(),
                    });
                }
            }
        }

        for (name, entry) in &self.entries {
            if entry.kind.is_core() || spec.requests(name) {
                pending.push(name.as_str());
            }
        }

        while let Some(name) = pending.pop() {
            if chosen.contains_key(name) {
                continue;
            }
            let Some(entry) = self.entries.get(name) else {
                continue;
            };
            let registered = spec
                .requested_variant(name)
                .and_then(|variant| entry.variant(variant))
                .or_else(|| entry.default_variant());
            let Some(registered) = registered else {
                continue;
            };
            chosen.insert(name, registered);
            pending.extend(
                registered
                    .descriptor
                    .dependencies()
                    .iter()
                    .map(String::as_str),
            );
        }

        let dormant = self
            .entries
            .keys()
            .filter(|name| !chosen.contains_key(name.as_str()))
            .cloned()
            .collect();
        Ok(Selection {
            providers: chosen.into_values().cloned().collect(),
            dormant,
        })
    }
}

/// Providers chosen for one service instance, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    providers: Vec<RegisteredProvider>,
    dormant: BTreeSet<String>,
}

impl Selection {
    /// Iterates over the selected providers in name order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.providers.iter()
    }

    /// Iterates over the selected provider names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(RegisteredProvider::name)
    }

    /// Iterates over the selected descriptors.
    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter().map(RegisteredProvider::descriptor)
    }

    /// Looks up a selected provider.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|provider| provider.name() == name)
    }

    /// Catalogue names that were not selected.
    pub fn dormant(&self) -> impl Iterator<Item = &str> {
        self.dormant.iter().map(String::as_str)
    }

    /// Schemas of the selected providers, with unselected catalogue names
    /// marked dormant so their keys are tolerated by the resolver.
    #[must_use]
    pub fn schemas(&self) -> SchemaSet {
        let mut schemas = SchemaSet::new();
        for descriptor in self.descriptors() {
            schemas.insert(descriptor.schema().clone());
        }
        for name in &self.dormant {
            schemas.mark_dormant(name.as_str());
        }
        schemas
    }

    /// Schemas of the selected providers plus extra schemas, such as the
    /// engine's own section.
    #[must_use]
    pub fn schemas_with(&self, extra: impl IntoIterator<Item = ConfigSchema>) -> SchemaSet {
        let mut schemas = self.schemas();
        for schema in extra {
            schemas.insert(schema);
        }
        schemas
    }

    /// Returns the number of selected providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` when nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
