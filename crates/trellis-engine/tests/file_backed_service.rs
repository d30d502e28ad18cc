//! End-to-end lifecycle of a service configured from a TOML file.

use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use trellis_config::{
    ConfigError, ConfigSchema, FileSource, MapSource, OptionSpec, OptionType, ProviderConfig,
    SourceError,
};
use trellis_engine::{
    Bootstrap, ChannelEventSink, LifecycleEvent, LifecycleState, ReloadError, ServiceState,
};
use trellis_providers::{
    Capability, CapabilityError, CapabilityRegistry, ProviderDescriptor, ProviderKind,
    ServiceSpecification,
};

/// Capability remembering the pool size it was configured with.
struct Pool {
    size: Arc<Mutex<i64>>,
}

impl Capability for Pool {
    fn init(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError> {
        self.reload(config)
    }

    fn reload(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError> {
        let size = config
            .get_integer("pool_size")
            .ok_or_else(|| CapabilityError::new("pool_size missing"))?;
        *self.size.lock().expect("pool size lock") = size;
        Ok(())
    }
}

fn config_text(pool_size: i64) -> String {
    format!("[database]\npool_size = {pool_size}\n\n[engine]\nlog_format = \"compact\"\n")
}

fn write_config(dir: &TempDir, pool_size: i64) -> Utf8PathBuf {
    let path = dir.path().join("service.toml");
    fs::write(&path, config_text(pool_size)).expect("write config");
    Utf8PathBuf::from_path_buf(path).expect("utf-8 temp path")
}

/// Replaces the file through a rename, the way editors and deploy tools do.
fn replace_config(path: &Utf8Path, pool_size: i64) {
    let staged = path.with_extension("toml.next");
    fs::write(&staged, config_text(pool_size)).expect("write staged config");
    fs::rename(&staged, path).expect("swap config into place");
}

/// Settings for tests that drive reloads explicitly.
fn manual_reloads() -> MapSource {
    MapSource::defaults()
        .with("engine", "health_interval_ms", 3_600_000_i64)
        .with("engine", "watch_files", false)
}

fn pool_size(size: &Arc<Mutex<i64>>) -> i64 {
    *size.lock().expect("pool size lock")
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn registry(size: &Arc<Mutex<i64>>) -> CapabilityRegistry {
    let schema = ConfigSchema::new("database")
        .option(OptionSpec::new("pool_size", OptionType::Integer).with_default(2_i64))
        .expect("valid schema");
    let shared = Arc::clone(size);
    let mut registry = CapabilityRegistry::new();
    registry
        .register(
            ProviderDescriptor::new("database", ProviderKind::Core).with_schema(schema),
            move || Pool {
                size: Arc::clone(&shared),
            },
        )
        .expect("registers");
    registry
}

#[test]
fn file_changes_reach_the_running_provider() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_config(&dir, 4);
    let size = Arc::new(Mutex::new(0));
    let (sink, events) = ChannelEventSink::new();

    let handle = Bootstrap::new(registry(&size))
        .source(manual_reloads())
        .source(FileSource::new(path.clone()).required())
        .event_sink(sink)
        .without_telemetry()
        .start(&ServiceSpecification::builder("billing").build())
        .expect("service starts");

    assert_eq!(handle.readiness(), ServiceState::Ready);
    assert_eq!(pool_size(&size), 4);
    assert_eq!(handle.settings().log_format.to_string(), "compact");

    write_config(&dir, 16);
    let report = handle.reload_now().expect("reload applies");
    assert_eq!(report.reloaded, vec!["database".to_owned()]);
    assert_eq!(pool_size(&size), 16);

    let shutdown = handle
        .shutdown(Duration::from_secs(1))
        .expect("clean shutdown");
    assert_eq!(shutdown.stopped, vec!["database".to_owned()]);

    let transitions: Vec<(LifecycleState, LifecycleState)> = events
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            LifecycleEvent::Transition(transition) => Some((transition.from, transition.to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (LifecycleState::Registered, LifecycleState::Configuring),
            (LifecycleState::Configuring, LifecycleState::Initializing),
            (LifecycleState::Initializing, LifecycleState::Ready),
            (LifecycleState::Ready, LifecycleState::ReloadPending),
            (LifecycleState::ReloadPending, LifecycleState::Ready),
            (LifecycleState::Ready, LifecycleState::ShuttingDown),
            (LifecycleState::ShuttingDown, LifecycleState::Stopped),
        ]
    );
}

#[test]
fn replaced_file_is_reloaded_without_a_request() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_config(&dir, 4);
    let size = Arc::new(Mutex::new(0));

    let handle = Bootstrap::new(registry(&size))
        .source(MapSource::defaults().with("engine", "health_interval_ms", 3_600_000_i64))
        .source(FileSource::new(path.clone()))
        .without_telemetry()
        .start(&ServiceSpecification::builder("billing").build())
        .expect("service starts");
    assert_eq!(pool_size(&size), 4);

    replace_config(&path, 32);

    assert!(wait_for(Duration::from_secs(5), || pool_size(&size) == 32));
    assert_eq!(
        handle.provider_config("database").get_integer("pool_size"),
        Some(32)
    );
    assert_eq!(handle.readiness(), ServiceState::Ready);
    handle
        .shutdown(Duration::from_secs(1))
        .expect("clean shutdown");
}

#[test]
fn malformed_edit_keeps_the_running_configuration() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_config(&dir, 8);
    let size = Arc::new(Mutex::new(0));

    let handle = Bootstrap::new(registry(&size))
        .source(manual_reloads())
        .source(FileSource::new(path.clone()))
        .without_telemetry()
        .start(&ServiceSpecification::builder("billing").build())
        .expect("service starts");

    fs::write(&path, "[database\npool_size = 1").expect("write broken config");
    let error = handle.reload_now().expect_err("broken file is rejected");

    assert!(matches!(
        error,
        ReloadError::Configuration(ConfigError::SourceUnavailable {
            source: SourceError::Malformed { .. },
            ..
        })
    ));
    assert_eq!(pool_size(&size), 8);
    assert_eq!(
        handle.provider_config("database").get_integer("pool_size"),
        Some(8)
    );
    assert_eq!(handle.readiness(), ServiceState::Ready);
}

#[test]
fn missing_required_file_prevents_startup() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.toml")).expect("utf-8 path");
    let size = Arc::new(Mutex::new(0));

    let error = Bootstrap::new(registry(&size))
        .source(FileSource::new(path).required())
        .without_telemetry()
        .start(&ServiceSpecification::builder("billing").build())
        .expect_err("required file must exist");

    assert!(error.to_string().contains("absent.toml"));
    assert_eq!(pool_size(&size), 0);
}
