//! Hot reload: change detection, targeting and failure handling.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};

use trellis_config::{ConfigSchema, MapSource, OptionSpec, OptionType};
use trellis_providers::{ProviderDescriptor, ProviderKind, ServiceSpecification};

use super::support::{
    Catalogue, Observer, RecordingEventSink, SharedSource, Step, wait_until,
};
use crate::{LifecycleError, LifecycleState, Operation, ReloadError, ServiceHandle};

fn integer_schema(owner: &str, option: &str) -> ConfigSchema {
    ConfigSchema::new(owner)
        .option(OptionSpec::new(option, OptionType::Integer).with_default(1_i64))
        .expect("valid schema")
}

#[fixture]
fn sink() -> Arc<RecordingEventSink> {
    Arc::new(RecordingEventSink::default())
}

/// `database <- {cache, reports}`; `reports` follows the database
/// configuration, `cache` only needs the database running.
fn service(
    sink: &Arc<RecordingEventSink>,
    source: &Arc<SharedSource>,
) -> (ServiceHandle, Observer) {
    let mut catalogue = Catalogue::default();
    catalogue.provider(
        ProviderDescriptor::new("database", ProviderKind::Core)
            .with_schema(integer_schema("database", "pool_size")),
    );
    catalogue.provider(
        ProviderDescriptor::new("cache", ProviderKind::Core)
            .depends_on("database")
            .with_schema(integer_schema("cache", "ttl")),
    );
    catalogue.provider(
        ProviderDescriptor::new("reports", ProviderKind::Core)
            .depends_on("database")
            .depends_on_config_of("database")
            .with_schema(integer_schema("reports", "page_size")),
    );
    let observer = catalogue.observer();
    let handle = catalogue
        .bootstrap(sink)
        .shared_source(source.as_source())
        .start(&ServiceSpecification::builder("api").build())
        .expect("starts");
    (handle, observer)
}

fn settled_since(
    sink: &RecordingEventSink,
    mark: usize,
) -> Vec<(String, LifecycleState, LifecycleState)> {
    sink.transitions()
        .into_iter()
        .skip(mark)
        .map(|event| (event.provider, event.from, event.to))
        .collect()
}

#[rstest]
fn reload_touches_only_the_changed_provider(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let (handle, observer) = service(&sink, &source);
    let mark = sink.transitions().len();

    source.set("cache", "ttl", 30_i64);
    let report = handle.reload_now().expect("reload applies");

    assert_eq!(report.changed, BTreeSet::from(["cache".to_owned()]));
    assert_eq!(report.reloaded, vec!["cache".to_owned()]);
    assert_eq!(
        settled_since(&sink, mark),
        vec![
            ("cache".to_owned(), LifecycleState::Ready, LifecycleState::ReloadPending),
            ("cache".to_owned(), LifecycleState::ReloadPending, LifecycleState::Ready),
        ]
    );
    assert_eq!(observer.journal.count("database", Operation::Reload), 0);
    assert_eq!(observer.journal.count("reports", Operation::Reload), 0);
    let seen = observer.script("cache").last_config().expect("reload config");
    assert_eq!(seen.get_integer("ttl"), Some(30));
    assert_eq!(handle.provider_config("cache").get_integer("ttl"), Some(30));
}

#[rstest]
fn config_dependents_reload_after_their_source(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let (handle, observer) = service(&sink, &source);

    source.set("database", "pool_size", 8_i64);
    let report = handle.reload_now().expect("reload applies");

    assert_eq!(report.changed, BTreeSet::from(["database".to_owned()]));
    assert_eq!(report.reloaded, vec!["database".to_owned(), "reports".to_owned()]);
    assert_eq!(
        observer.journal.providers_for(Operation::Reload),
        vec!["database".to_owned(), "reports".to_owned()]
    );
    // cache depends on database at runtime only.
    assert_eq!(observer.journal.count("cache", Operation::Reload), 0);
}

#[rstest]
fn unchanged_sources_reload_nothing(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let (handle, observer) = service(&sink, &source);
    let mark = sink.transitions().len();

    let report = handle.reload_now().expect("reload applies");

    assert!(report.changed.is_empty());
    assert!(report.is_noop());
    assert!(settled_since(&sink, mark).is_empty());
    assert!(observer.journal.providers_for(Operation::Reload).is_empty());
}

#[rstest]
fn rejected_reload_fails_only_that_provider(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let (handle, observer) = service(&sink, &source);
    observer.script("cache").on_reload(Step::Fail("ttl too large"));

    source.set("cache", "ttl", 99_999_i64);
    let report = handle.reload_now().expect("pass completes");

    assert!(matches!(
        report.failed.get("cache"),
        Some(LifecycleError::ReloadFailure { .. })
    ));
    assert_eq!(handle.state_of("cache"), Some(LifecycleState::Failed));
    assert_eq!(handle.state_of("database"), Some(LifecycleState::Ready));
    assert_eq!(handle.state_of("reports"), Some(LifecycleState::Ready));
    assert!(!handle.is_live());
}

#[rstest]
fn invalid_configuration_keeps_the_previous_snapshot(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let (handle, observer) = service(&sink, &source);
    let before = handle.config();

    source.set_text("cache", "ttl", "forever");
    let error = handle.reload_now().expect_err("schema violation");

    assert!(matches!(error, ReloadError::Configuration(_)));
    assert_eq!(handle.config().as_ref(), before.as_ref());
    assert!(observer.journal.providers_for(Operation::Reload).is_empty());
    for state in handle.states().values() {
        assert_eq!(*state, LifecycleState::Ready);
    }
}

#[rstest]
fn engine_section_changes_are_not_applied_at_runtime(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let (handle, observer) = service(&sink, &source);
    let before = handle.settings().clone();

    source.set("engine", "degrade_after", 2_i64);
    let report = handle.reload_now().expect("reload applies");

    assert!(report.changed.is_empty());
    assert_eq!(handle.settings(), &before);
    assert!(observer.journal.providers_for(Operation::Reload).is_empty());
}

#[rstest]
fn degraded_providers_reload_and_reset_their_health(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let (handle, observer) = service(&sink, &source);
    observer
        .script("cache")
        .health([trellis_providers::HealthStatus::unhealthy("slow")]);
    handle.probe_now("cache");
    assert_eq!(handle.state_of("cache"), Some(LifecycleState::Degraded));

    source.set("cache", "ttl", 5_i64);
    handle.reload_now().expect("reload applies");

    assert_eq!(handle.state_of("cache"), Some(LifecycleState::Ready));
    assert_eq!(
        sink.path_of("cache").last(),
        Some(&(LifecycleState::ReloadPending, LifecycleState::Ready))
    );
}

#[rstest]
fn requested_reloads_run_on_the_reload_worker(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let (handle, observer) = service(&sink, &source);

    source.set("reports", "page_size", 50_i64);
    handle.request_reload().expect("queued");

    assert!(wait_until(Duration::from_secs(2), || {
        observer.journal.count("reports", Operation::Reload) == 1
    }));
    assert!(wait_until(Duration::from_secs(2), || !sink.reloads().is_empty()));
    handle.shutdown(Duration::from_secs(1)).expect("clean shutdown");
    assert!(matches!(handle.request_reload(), Err(ReloadError::ShuttingDown)));
}

#[rstest]
fn watcher_detects_source_changes(sink: Arc<RecordingEventSink>) {
    let source = SharedSource::new();
    let mut catalogue = Catalogue::default();
    catalogue.provider(
        ProviderDescriptor::new("cache", ProviderKind::Core)
            .with_schema(integer_schema("cache", "ttl")),
    );
    let journal = catalogue.journal.clone();
    let handle = catalogue
        .bootstrap(&sink)
        .shared_source(source.as_source())
        .source(MapSource::new("fast-watch", 40).with("engine", "watch_interval_ms", 10_i64))
        .start(&ServiceSpecification::builder("api").build())
        .expect("starts");

    source.set("cache", "ttl", 12_i64);

    assert!(wait_until(Duration::from_secs(2), || {
        journal.count("cache", Operation::Reload) == 1
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        handle.provider_config("cache").get_integer("ttl") == Some(12)
    }));
}
