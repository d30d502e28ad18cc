//! Layered configuration for the trellis bootstrap engine.
//!
//! Providers declare a [`ConfigSchema`] for the options they accept. A
//! [`ConfigResolver`] merges any number of prioritised [`ConfigSource`]s
//! against those schemas and yields an immutable [`ResolvedConfig`]
//! snapshot. Precedence is decided per key: the highest-ranked source that
//! sets a key wins, and keys it does not set fall through to lower ranks and
//! finally to schema defaults.
//!
//! The default ranks, lowest first, are shipped defaults, files, the process
//! environment, a remote store, and command-line overrides. Overrides carried
//! by a service specification sit above all of them.
//!
//! ```
//! use trellis_config::{
//!     ConfigResolver, ConfigSchema, EnvSource, MapSource, OptionSpec, OptionType, SchemaSet,
//! };
//!
//! let schemas = SchemaSet::new().with(
//!     ConfigSchema::new("database")
//!         .option(OptionSpec::new("pool_size", OptionType::Integer).with_default(4_i64))
//!         .expect("valid schema"),
//! );
//! let resolver = ConfigResolver::builder()
//!     .source(MapSource::defaults())
//!     .source(EnvSource::new().from_vars([("TRELLIS_DATABASE__POOL_SIZE", "16")]))
//!     .build()
//!     .expect("distinct ranks");
//! let resolved = resolver.resolve(&schemas).expect("resolves");
//! assert_eq!(
//!     resolved.provider("database").and_then(|db| db.get_integer("pool_size")),
//!     Some(16)
//! );
//! ```

mod error;
mod logging;
mod resolver;
mod schema;
mod settings;
mod snapshot;
pub mod source;
mod value;

pub use error::{ConfigError, SourceError};
pub use logging::{LogFormat, LogFormatParseError};
pub use resolver::{ConfigResolver, ConfigResolverBuilder};
pub use schema::{ConfigSchema, OptionSpec, SchemaSet};
pub use settings::{DEFAULT_LOG_FILTER, ENGINE_SECTION, EngineSettings};
pub use snapshot::{ConfigStore, ProviderConfig, ResolvedConfig};
pub use source::{
    ArgsSource, ConfigKey, ConfigSource, DEFAULT_ENV_PREFIX, EnvSource, FileSource, MapSource,
    RemoteSnapshot, RemoteSource, RemoteStore, SourceEntries, WatchToken, priority,
};
pub use value::{OptionType, OptionValue, RawValue};
