//! Settings that tune the engine itself.
//!
//! They are resolved through the same sources as provider options, under the
//! reserved `engine` section, so `TRELLIS_ENGINE__INIT_TIMEOUT_MS=5000` or
//! `--set engine.log_format=compact` work without extra plumbing.

use std::time::Duration;

use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::schema::{ConfigSchema, OptionSpec};
use crate::snapshot::{ProviderConfig, ResolvedConfig};
use crate::value::OptionType;

/// Reserved section name holding engine settings.
pub const ENGINE_SECTION: &str = "engine";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

const DEFAULT_INIT_TIMEOUT_MS: i64 = 30_000;
const DEFAULT_HEALTH_TIMEOUT_MS: i64 = 5_000;
const DEFAULT_RELOAD_TIMEOUT_MS: i64 = 30_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: i64 = 10_000;
const DEFAULT_HEALTH_INTERVAL_MS: i64 = 10_000;
const DEFAULT_WATCH_INTERVAL_MS: i64 = 2_000;
const DEFAULT_DEGRADE_AFTER: i64 = 1;
const DEFAULT_ESCALATE_AFTER: i64 = 3;

/// Engine-wide timing, threshold, and logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// `tracing` filter directive, used as-is; `RUST_LOG` is not consulted.
    pub log_filter: String,
    /// Output format of the log subscriber.
    pub log_format: LogFormat,
    /// Bound on each provider initialisation.
    pub init_timeout: Duration,
    /// Bound on each health probe.
    pub health_timeout: Duration,
    /// Bound on each provider reload.
    pub reload_timeout: Duration,
    /// Overall bound on an orderly shutdown.
    pub shutdown_timeout: Duration,
    /// Default period between health probes.
    pub health_interval: Duration,
    /// Period between change polls of sources that cannot be watched.
    pub watch_interval: Duration,
    /// Whether file sources are watched through the platform notifier.
    pub watch_files: bool,
    /// Consecutive failed probes before a provider is marked degraded.
    pub degrade_after: u32,
    /// Consecutive failed probes before persistent degradation is reported.
    pub escalate_after: u32,
}

impl EngineSettings {
    /// Schema declaring every engine option with its default.
    #[must_use]
    pub fn schema() -> ConfigSchema {
        let options = [
            OptionSpec::new("log_filter", OptionType::Text).with_default(DEFAULT_LOG_FILTER),
            OptionSpec::new("log_format", OptionType::Text)
                .with_default(LogFormat::default().to_string()),
            OptionSpec::new("init_timeout_ms", OptionType::Integer)
                .with_default(DEFAULT_INIT_TIMEOUT_MS),
            OptionSpec::new("health_timeout_ms", OptionType::Integer)
                .with_default(DEFAULT_HEALTH_TIMEOUT_MS),
            OptionSpec::new("reload_timeout_ms", OptionType::Integer)
                .with_default(DEFAULT_RELOAD_TIMEOUT_MS),
            OptionSpec::new("shutdown_timeout_ms", OptionType::Integer)
                .with_default(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            OptionSpec::new("health_interval_ms", OptionType::Integer)
                .with_default(DEFAULT_HEALTH_INTERVAL_MS),
            OptionSpec::new("watch_interval_ms", OptionType::Integer)
                .with_default(DEFAULT_WATCH_INTERVAL_MS),
            OptionSpec::new("watch_files", OptionType::Bool).with_default(true),
            OptionSpec::new("degrade_after", OptionType::Integer)
                .with_default(DEFAULT_DEGRADE_AFTER),
            OptionSpec::new("escalate_after", OptionType::Integer)
                .with_default(DEFAULT_ESCALATE_AFTER),
        ];
        // Names are distinct and defaults match their declared types.
        options
            .into_iter()
            .fold(ConfigSchema::new(ENGINE_SECTION), ConfigSchema::push_trusted)
    }

    /// Reads and validates the engine section of a snapshot.
    ///
    /// Options missing from the snapshot fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SchemaViolation`] when a value is outside its
    /// accepted range or names an unknown log format.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ConfigError> {
        let section = config.provider_shared(ENGINE_SECTION);
        let reader = SectionReader {
            section: section.as_ref(),
        };
        let defaults = Self::default();

        let log_format_text = reader.text("log_format");
        let log_format = match log_format_text {
            Some(text) => text
                .parse::<LogFormat>()
                .map_err(|_| reader.violation("log_format", "json or compact", text))?,
            None => defaults.log_format,
        };

        let degrade_after = reader.count("degrade_after")?.unwrap_or(defaults.degrade_after);
        let escalate_after = reader
            .count("escalate_after")?
            .unwrap_or(defaults.escalate_after);
        if escalate_after < degrade_after {
            return Err(reader.violation(
                "escalate_after",
                format!("at least degrade_after ({degrade_after})"),
                &escalate_after.to_string(),
            ));
        }

        Ok(Self {
            log_filter: reader
                .text("log_filter")
                .map_or(defaults.log_filter, str::to_owned),
            log_format,
            init_timeout: reader
                .millis("init_timeout_ms")?
                .unwrap_or(defaults.init_timeout),
            health_timeout: reader
                .millis("health_timeout_ms")?
                .unwrap_or(defaults.health_timeout),
            reload_timeout: reader
                .millis("reload_timeout_ms")?
                .unwrap_or(defaults.reload_timeout),
            shutdown_timeout: reader
                .millis("shutdown_timeout_ms")?
                .unwrap_or(defaults.shutdown_timeout),
            health_interval: reader
                .millis("health_interval_ms")?
                .unwrap_or(defaults.health_interval),
            watch_interval: reader
                .millis("watch_interval_ms")?
                .unwrap_or(defaults.watch_interval),
            watch_files: section
                .get_bool("watch_files")
                .unwrap_or(defaults.watch_files),
            degrade_after,
            escalate_after,
        })
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::default(),
            init_timeout: millis_from(DEFAULT_INIT_TIMEOUT_MS),
            health_timeout: millis_from(DEFAULT_HEALTH_TIMEOUT_MS),
            reload_timeout: millis_from(DEFAULT_RELOAD_TIMEOUT_MS),
            shutdown_timeout: millis_from(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            health_interval: millis_from(DEFAULT_HEALTH_INTERVAL_MS),
            watch_interval: millis_from(DEFAULT_WATCH_INTERVAL_MS),
            watch_files: true,
            degrade_after: 1,
            escalate_after: 3,
        }
    }
}

fn millis_from(value: i64) -> Duration {
    Duration::from_millis(u64::try_from(value).unwrap_or_default())
}

struct SectionReader<'a> {
    section: &'a ProviderConfig,
}

impl SectionReader<'_> {
    fn text(&self, option: &str) -> Option<&str> {
        self.section.get_text(option)
    }

    fn positive(&self, option: &str) -> Result<Option<u64>, ConfigError> {
        let Some(value) = self.section.get_integer(option) else {
            return Ok(None);
        };
        match u64::try_from(value) {
            Ok(positive) if positive > 0 => Ok(Some(positive)),
            _ => Err(self.violation(option, "a positive integer", &value.to_string())),
        }
    }

    fn millis(&self, option: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.positive(option)?.map(Duration::from_millis))
    }

    fn count(&self, option: &str) -> Result<Option<u32>, ConfigError> {
        let Some(value) = self.positive(option)? else {
            return Ok(None);
        };
        u32::try_from(value)
            .map(Some)
            .map_err(|_| self.violation(option, "a 32-bit count", &value.to_string()))
    }

    fn violation(&self, option: &str, expected: impl Into<String>, found: &str) -> ConfigError {
        ConfigError::violation(ENGINE_SECTION, option, expected, found, "resolved configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ConfigResolver;
    use crate::schema::SchemaSet;
    use crate::source::{MapSource, priority};
    use rstest::rstest;

    fn resolve(overrides: MapSource) -> Result<EngineSettings, ConfigError> {
        let resolver = ConfigResolver::builder()
            .source(overrides.with_priority(priority::COMMAND_LINE))
            .build()?;
        let resolved = resolver.resolve(&SchemaSet::new().with(EngineSettings::schema()))?;
        EngineSettings::from_config(&resolved)
    }

    #[test]
    fn schema_defaults_match_default_settings() {
        let settings = resolve(MapSource::new("none", 0)).expect("defaults resolve");
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn reads_overrides_from_sources() {
        let settings = resolve(
            MapSource::new("cli", 0)
                .with_text("engine", "init_timeout_ms", "250")
                .with_text("engine", "log_format", "compact")
                .with("engine", "escalate_after", 5_i64)
                .with_text("engine", "watch_files", "false"),
        )
        .expect("overrides resolve");
        assert_eq!(settings.init_timeout, Duration::from_millis(250));
        assert!(!settings.watch_files);
        assert_eq!(settings.log_format, LogFormat::Compact);
        assert_eq!(settings.escalate_after, 5);
    }

    #[test]
    fn missing_section_uses_defaults() {
        let settings =
            EngineSettings::from_config(&ResolvedConfig::default()).expect("empty snapshot");
        assert_eq!(settings, EngineSettings::default());
    }

    #[rstest]
    #[case::zero_timeout("init_timeout_ms", 0_i64)]
    #[case::negative_interval("health_interval_ms", -5_i64)]
    #[case::zero_threshold("escalate_after", 0_i64)]
    fn rejects_out_of_range_values(#[case] option: &str, #[case] value: i64) {
        let error = resolve(MapSource::new("cli", 0).with("engine", option, value))
            .expect_err("value rejected");
        assert!(matches!(error, ConfigError::SchemaViolation { .. }));
    }

    #[test]
    fn escalation_threshold_must_not_precede_degradation() {
        let error = resolve(
            MapSource::new("cli", 0)
                .with("engine", "degrade_after", 4_i64)
                .with("engine", "escalate_after", 2_i64),
        )
        .expect_err("thresholds out of order");
        assert!(error.to_string().contains("escalate_after"));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let error = resolve(MapSource::new("cli", 0).with("engine", "log_format", "pretty"))
            .expect_err("unknown format");
        assert!(matches!(
            error,
            ConfigError::SchemaViolation { ref option, .. } if option == "log_format"
        ));
    }
}
