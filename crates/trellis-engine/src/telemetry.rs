//! Process-wide `tracing` subscriber installation.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use trellis_config::{EngineSettings, LogFormat};

static TELEMETRY_GUARD: OnceCell<LogFormat> = OnceCell::new();

/// Handle returned once telemetry is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Format chosen by the call that installed the subscriber.
    #[must_use]
    pub const fn format(self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Offending expression.
        filter: String,
        /// Parser message.
        message: String,
    },
    /// Another subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the global subscriber on first use.
///
/// Later calls return a handle describing the subscriber installed first and
/// leave the global state alone, so several services bootstrapped in one
/// process share one subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or a foreign
/// subscriber already owns the global default.
pub fn initialise(settings: &EngineSettings) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(settings).map(|()| settings.log_format))
        .map(|format| TelemetryHandle { format: *format })
}

/// Builds the filter from `engine.log_filter` alone; `RUST_LOG` is not
/// consulted, the `TRELLIS_ENGINE__LOG_FILTER` variable overrides it instead.
fn log_filter(settings: &EngineSettings) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(settings.log_filter.as_str()).map_err(|error| TelemetryError::Filter {
        filter: settings.log_filter.clone(),
        message: error.to_string(),
    })
}

fn install_subscriber(settings: &EngineSettings) -> Result<(), TelemetryError> {
    let filter = log_filter(settings)?;

    let builder = |env_filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match settings.log_format {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
