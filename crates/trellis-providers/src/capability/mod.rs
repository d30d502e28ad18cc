//! The uniform lifecycle contract every provider implementation satisfies.
//!
//! The engine treats providers as opaque units: it only ever calls the four
//! operations of [`Capability`], each of which may block. The engine bounds
//! every call with a timeout and serialises calls on one instance, so
//! implementations never see two operations overlap.

use std::fmt;

use trellis_config::ProviderConfig;

use crate::descriptor::ProviderDescriptor;

/// Failure reported by a provider operation.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CapabilityError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CapabilityError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human-readable message describing the failure.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Outcome of one health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The provider is working normally.
    Healthy,
    /// The provider is running but impaired.
    Unhealthy(String),
}

impl HealthStatus {
    /// Builds an unhealthy status with a reason.
    #[must_use]
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::Unhealthy(reason.into())
    }

    /// Returns `true` for [`HealthStatus::Healthy`].
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => formatter.write_str("healthy"),
            Self::Unhealthy(reason) => write!(formatter, "unhealthy: {reason}"),
        }
    }
}

/// Lifecycle operations of a provider instance.
///
/// # Example
///
/// ```
/// use trellis_config::ProviderConfig;
/// use trellis_providers::{Capability, CapabilityError, HealthStatus};
///
/// #[derive(Default)]
/// struct Cache {
///     ttl: i64,
/// }
///
/// impl Capability for Cache {
///     fn init(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError> {
///         self.ttl = config.get_integer("ttl").unwrap_or(60);
///         Ok(())
///     }
///
///     fn reload(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError> {
///         self.init(config)
///     }
/// }
/// ```
pub trait Capability: Send + 'static {
    /// Brings the provider up with its resolved configuration slice.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] when the provider cannot start.
    fn init(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError>;

    /// Probes the running provider.
    ///
    /// The default implementation always reports [`HealthStatus::Healthy`].
    fn health_check(&mut self) -> HealthStatus {
        HealthStatus::Healthy
    }

    /// Applies a changed configuration slice to the running provider.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] when the new configuration cannot be
    /// applied; the provider is then considered failed.
    fn reload(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError>;

    /// Releases the provider's resources.
    ///
    /// The default implementation does nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] when teardown fails. Shutdown errors are
    /// recorded but never stop the remaining providers from shutting down.
    fn shutdown(&mut self) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// Creates a fresh provider instance for each service.
///
/// Any `Fn() -> C` closure where `C: Capability` is a factory.
pub trait ProviderFactory: Send + Sync {
    /// Instantiates the provider described by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns a [`CapabilityError`] when the instance cannot be built; the
    /// engine treats this as an initialisation failure.
    fn create(&self, descriptor: &ProviderDescriptor)
    -> Result<Box<dyn Capability>, CapabilityError>;
}

impl<F, C> ProviderFactory for F
where
    F: Fn() -> C + Send + Sync,
    C: Capability,
{
    fn create(
        &self,
        _descriptor: &ProviderDescriptor,
    ) -> Result<Box<dyn Capability>, CapabilityError> {
        Ok(Box::new(self()))
    }
}
