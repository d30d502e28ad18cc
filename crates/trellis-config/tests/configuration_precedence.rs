//! Layering of real files, process environment, and command-line overrides.

use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use camino::Utf8PathBuf;
use once_cell::sync::Lazy;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use trellis_config::{
    ArgsSource, ConfigError, ConfigResolver, ConfigSchema, EnvSource, FileSource, MapSource,
    OptionSpec, OptionType, ResolvedConfig, SchemaSet, SourceError,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &str) -> Self {
        let guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` in edition 2024; the mutex keeps
        // tests in this binary from racing each other.
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

struct Layout {
    _dir: TempDir,
    file: Utf8PathBuf,
}

#[fixture]
fn layout() -> Layout {
    let dir = TempDir::new().expect("create temp dir");
    let file = Utf8PathBuf::from_path_buf(dir.path().join("service.toml")).expect("utf-8 path");
    fs::write(&file, "[http]\nport = 8080\nhost = \"0.0.0.0\"\n").expect("write config file");
    Layout { _dir: dir, file }
}

fn schemas() -> SchemaSet {
    let http = ConfigSchema::new("http")
        .option(OptionSpec::new("port", OptionType::Integer).with_default(80_i64))
        .and_then(|schema| schema.option(OptionSpec::new("host", OptionType::Text)))
        .and_then(|schema| {
            schema.option(OptionSpec::new("tls", OptionType::Bool).with_default(false))
        })
        .expect("http schema");
    SchemaSet::new().with(http)
}

fn resolve(layout: &Layout, args: &[&str]) -> Result<ResolvedConfig, ConfigError> {
    ConfigResolver::builder()
        .source(MapSource::defaults().with("http", "port", 1_i64))
        .source(FileSource::new(layout.file.clone()))
        .source(EnvSource::with_prefix("TRELLIS_TEST"))
        .source(ArgsSource::from_args(args.iter().copied()))
        .build()?
        .resolve(&schemas())
}

fn port(resolved: &ResolvedConfig) -> Option<i64> {
    resolved.provider("http").and_then(|http| http.get_integer("port"))
}

#[rstest]
fn file_overrides_defaults(layout: Layout) {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    let resolved = resolve(&layout, &[]).expect("resolves");
    assert_eq!(port(&resolved), Some(8080));
    assert_eq!(
        resolved.provider("http").and_then(|http| http.get_bool("tls")),
        Some(false)
    );
}

#[rstest]
fn environment_overrides_file(layout: Layout) {
    let _env = EnvOverride::set_var("TRELLIS_TEST_HTTP__PORT", "9090");
    let resolved = resolve(&layout, &[]).expect("resolves");
    assert_eq!(port(&resolved), Some(9090));
    assert_eq!(
        resolved.provider("http").and_then(|http| http.get_text("host")),
        Some("0.0.0.0")
    );
}

#[rstest]
fn command_line_overrides_environment(layout: Layout) {
    let _env = EnvOverride::set_var("TRELLIS_TEST_HTTP__PORT", "9090");
    let resolved = resolve(&layout, &["service", "--set", "http.port=7070"]).expect("resolves");
    assert_eq!(port(&resolved), Some(7070));
}

#[rstest]
fn environment_text_is_checked_against_the_schema(layout: Layout) {
    let _env = EnvOverride::set_var("TRELLIS_TEST_HTTP__TLS", "sometimes");
    let error = resolve(&layout, &[]).expect_err("not a boolean");
    assert!(matches!(
        error,
        ConfigError::SchemaViolation { ref option, ref source_name, .. }
            if option == "tls" && source_name == "env:TRELLIS_TEST"
    ));
}

#[rstest]
fn malformed_file_names_its_source(layout: Layout) {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    fs::write(&layout.file, "[http\nport = 1").expect("rewrite config file");
    let optional = resolve(&layout, &[]).expect_err("optional file is malformed");
    assert!(matches!(
        optional,
        ConfigError::SourceUnavailable {
            source: SourceError::Malformed { .. },
            ..
        }
    ));

    let error = ConfigResolver::builder()
        .source(FileSource::new(layout.file.clone()).required())
        .build()
        .and_then(|resolver| resolver.resolve(&schemas()))
        .expect_err("required file is malformed");
    assert!(error.to_string().contains(layout.file.as_str()));
}
