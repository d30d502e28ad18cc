//! Errors raised while registering providers and selecting them for a
//! service.

use thiserror::Error;

/// Errors arising from catalogue registration and selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A descriptor failed validation.
    #[error("invalid provider descriptor '{name}': {message}")]
    InvalidDescriptor {
        /// Provider name as declared.
        name: String,
        /// Description of the validation failure.
        message: String,
    },

    /// The same `(name, variant)` pair was registered twice.
    #[error("provider '{name}' variant '{variant}' is already registered")]
    DuplicateProvider {
        /// Capability name.
        name: String,
        /// Variant name.
        variant: String,
    },

    /// Two variants of one capability disagree on its kind.
    #[error("provider '{name}' is registered as {existing} and cannot also be {requested}")]
    KindConflict {
        /// Capability name.
        name: String,
        /// Kind recorded by the first registration.
        existing: String,
        /// Kind of the rejected registration.
        requested: String,
    },

    /// More than one variant of a capability claims to be the default.
    #[error("provider '{name}' already has default variant '{existing}'")]
    DuplicateDefault {
        /// Capability name.
        name: String,
        /// Variant already flagged as the default.
        existing: String,
    },

    /// A core provider would depend on an optional one.
    #[error("core provider '{core}' cannot depend on optional provider '{optional}'")]
    CoreDependsOnOptional {
        /// Core provider declaring the dependency.
        core: String,
        /// Optional provider it depends on.
        optional: String,
    },

    /// The specification names a capability absent from the catalogue.
    #[error("unknown capability '{name}'")]
    UnknownCapability {
        /// Name that was requested.
        name: String,
    },

    /// The specification names a variant the capability does not offer.
    #[error("capability '{name}' has no variant '{variant}'")]
    UnknownVariant {
        /// Capability name.
        name: String,
        /// Variant that was requested.
        variant: String,
    },
}

#[cfg(test)]
mod tests;
