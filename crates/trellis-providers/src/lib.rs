//! Capability providers and the catalogue that selects them.
//!
//! Every pluggable unit of a trellis service (configuration, logging,
//! database, cache, messaging, ...) is described by a static
//! [`ProviderDescriptor`] and implemented behind the uniform [`Capability`]
//! contract. Descriptors and their [`ProviderFactory`] are registered once in
//! a [`CapabilityRegistry`]; each service instance then projects the
//! catalogue onto its [`ServiceSpecification`] with
//! [`CapabilityRegistry::select`].
//!
//! The crate knows nothing about how providers are started; ordering and
//! supervision live in `trellis-graph` and `trellis-engine`.

pub mod capability;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod specification;

pub use self::capability::{Capability, CapabilityError, HealthStatus, ProviderFactory};
pub use self::descriptor::{DEFAULT_VARIANT, ProviderDescriptor, ProviderKind};
pub use self::error::RegistryError;
pub use self::registry::{CapabilityRegistry, RegisteredProvider, Selection};
pub use self::specification::{
    FeatureSelector, OVERRIDES_SOURCE, SelectorParseError, ServiceSpecification,
    ServiceSpecificationBuilder,
};
