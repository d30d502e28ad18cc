//! Merges prioritised sources into a [`ResolvedConfig`] snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::schema::SchemaSet;
use crate::snapshot::{ProviderConfig, ResolvedConfig};
use crate::source::{ConfigKey, ConfigSource, WatchToken};
use crate::value::RawValue;

const RESOLVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::resolver");

/// Builder collecting sources before their ranks are validated.
#[derive(Default)]
pub struct ConfigResolverBuilder {
    sources: Vec<Arc<dyn ConfigSource>>,
}

impl ConfigResolverBuilder {
    /// Adds a source.
    #[must_use]
    pub fn source(self, source: impl ConfigSource + 'static) -> Self {
        self.shared_source(Arc::new(source))
    }

    /// Adds a source that is also held elsewhere.
    #[must_use]
    pub fn shared_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Orders the sources by rank.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PriorityConflict`] when two sources share a rank.
    pub fn build(mut self) -> Result<ConfigResolver, ConfigError> {
        self.sources.sort_by_key(|source| source.priority());
        for pair in self.sources.windows(2) {
            if let [first, second] = pair {
                if first.priority() == second.priority() {
                    return Err(ConfigError::PriorityConflict {
                        first: first.name().to_owned(),
                        second: second.name().to_owned(),
                        priority: first.priority(),
                    });
                }
            }
        }
        Ok(ConfigResolver {
            sources: self.sources,
        })
    }
}

/// Resolver over a fixed, totally ordered list of sources.
///
/// # Example
///
/// ```
/// use trellis_config::{
///     ConfigResolver, ConfigSchema, MapSource, OptionSpec, OptionType, SchemaSet,
/// };
///
/// let schema = ConfigSchema::new("cache")
///     .option(OptionSpec::new("ttl", OptionType::Integer))
///     .expect("valid schema");
/// let resolver = ConfigResolver::builder()
///     .source(MapSource::defaults().with("cache", "ttl", 1_i64))
///     .source(MapSource::new("file", 10).with("cache", "ttl", 2_i64))
///     .build()
///     .expect("distinct ranks");
/// let resolved = resolver
///     .resolve(&SchemaSet::new().with(schema))
///     .expect("resolves");
/// assert_eq!(resolved.provider("cache").and_then(|c| c.get_integer("ttl")), Some(2));
/// ```
#[derive(Clone)]
pub struct ConfigResolver {
    sources: Vec<Arc<dyn ConfigSource>>,
}

struct Layered {
    value: RawValue,
    source: String,
}

impl ConfigResolver {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ConfigResolverBuilder {
        ConfigResolverBuilder::default()
    }

    /// Returns a builder seeded with this resolver's sources.
    #[must_use]
    pub fn to_builder(&self) -> ConfigResolverBuilder {
        ConfigResolverBuilder {
            sources: self.sources.clone(),
        }
    }

    /// Source names from lowest to highest rank.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|source| source.name())
    }

    /// Collects the current watch token of every source.
    #[must_use]
    pub fn watch_tokens(&self) -> Vec<(String, Option<WatchToken>)> {
        self.sources
            .iter()
            .map(|source| (source.name().to_owned(), source.watch_token()))
            .collect()
    }

    /// Returns `true` when at least one source has to be polled for changes.
    #[must_use]
    pub fn has_polled_sources(&self) -> bool {
        self.sources
            .iter()
            .any(|source| source.watch_token().is_some())
    }

    /// Local files backing sources, in precedence order.
    #[must_use]
    pub fn watched_files(&self) -> Vec<Utf8PathBuf> {
        self.sources
            .iter()
            .filter_map(|source| source.watch_path().map(Utf8Path::to_path_buf))
            .collect()
    }

    /// Produces a snapshot for the given schemas.
    ///
    /// Per key, the value from the highest-ranked source wins; absent keys
    /// fall back to the schema default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownKey`], [`ConfigError::SchemaViolation`],
    /// [`ConfigError::MissingRequiredOption`], or
    /// [`ConfigError::SourceUnavailable`] as described on each variant.
    pub fn resolve(&self, schemas: &SchemaSet) -> Result<ResolvedConfig, ConfigError> {
        let layered = self.layer(schemas)?;
        let mut providers = BTreeMap::new();
        for schema in schemas.iter() {
            let mut values = BTreeMap::new();
            for spec in schema.options() {
                let key = ConfigKey::new(schema.owner(), spec.name());
                let value = match layered.get(&key) {
                    Some(entry) => entry.value.clone().coerce(spec.option_type()).ok_or_else(
                        || {
                            ConfigError::violation(
                                schema.owner(),
                                spec.name(),
                                spec.option_type().to_string(),
                                entry.value.describe(),
                                entry.source.as_str(),
                            )
                        },
                    )?,
                    None => match spec.default_value() {
                        Some(default) => default.clone(),
                        None if spec.is_required() => {
                            return Err(ConfigError::MissingRequiredOption {
                                provider: schema.owner().to_owned(),
                                option: spec.name().to_owned(),
                            });
                        }
                        None => continue,
                    },
                };
                values.insert(spec.name().to_owned(), value);
            }
            providers.insert(schema.owner().to_owned(), ProviderConfig::from_values(values));
        }
        Ok(ResolvedConfig::from_providers(providers))
    }

    fn layer(&self, schemas: &SchemaSet) -> Result<BTreeMap<ConfigKey, Layered>, ConfigError> {
        let mut layered = BTreeMap::new();
        for source in &self.sources {
            let entries = match source.load() {
                Ok(entries) => entries,
                Err(error) if source.is_required() || error.is_malformed() => {
                    return Err(ConfigError::SourceUnavailable {
                        source_name: source.name().to_owned(),
                        source: error,
                    });
                }
                Err(error) => {
                    warn!(
                        target: RESOLVER_TARGET,
                        source = source.name(),
                        error = %error,
                        "skipping unreadable optional configuration source"
                    );
                    continue;
                }
            };
            for (key, value) in entries {
                if !accepts_key(schemas, &key, source.name())? {
                    continue;
                }
                layered.insert(
                    key,
                    Layered {
                        value,
                        source: source.name().to_owned(),
                    },
                );
            }
        }
        Ok(layered)
    }
}

fn accepts_key(schemas: &SchemaSet, key: &ConfigKey, source: &str) -> Result<bool, ConfigError> {
    let unknown = || ConfigError::UnknownKey {
        provider: key.provider().to_owned(),
        option: key.option().to_owned(),
        source_name: source.to_owned(),
    };
    match schemas.get(key.provider()) {
        Some(schema) if schema.get(key.option()).is_some() => Ok(true),
        Some(_) => Err(unknown()),
        None if schemas.is_dormant(key.provider()) => {
            debug!(
                target: RESOLVER_TARGET,
                key = %key,
                source,
                "ignoring key for inactive provider"
            );
            Ok(false)
        }
        None => Err(unknown()),
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_list()
            .entries(self.sources.iter().map(|source| (source.name(), source.priority())))
            .finish()
    }
}
