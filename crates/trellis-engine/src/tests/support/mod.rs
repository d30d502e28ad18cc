//! Test doubles for engine scenarios.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use trellis_config::{
    ConfigKey, ConfigSource, MapSource, OptionValue, ProviderConfig, RawValue, SourceEntries,
    SourceError, WatchToken, priority,
};
use mockall::mock;
use trellis_providers::{
    Capability, CapabilityError, CapabilityRegistry, HealthStatus, ProviderDescriptor,
};

use crate::{
    Bootstrap, BootstrapError, DegradationAlert, EventSink, LifecycleEvent, LifecycleState,
    Operation, ReloadError, ReloadReport, ServiceHandle, StartupReport, TransitionEvent,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One capability call observed by the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub provider: String,
    pub operation: Operation,
}

/// Ordered record of every capability call across providers.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Journal {
    fn record(&self, provider: &str, operation: Operation) {
        guard(&self.calls).push(Call {
            provider: provider.to_owned(),
            operation,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        guard(&self.calls).clone()
    }

    /// Providers that received `operation`, in call order.
    pub fn providers_for(&self, operation: Operation) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.provider)
            .collect()
    }

    pub fn count(&self, provider: &str, operation: Operation) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.provider == provider && call.operation == operation)
            .count()
    }
}

/// Behaviour of one scripted operation.
#[derive(Debug, Clone, Default)]
pub enum Step {
    #[default]
    Succeed,
    Fail(&'static str),
    Sleep(Duration),
    /// Blocks until every party sharing the barrier arrives.
    Rendezvous(Arc<Barrier>),
    Panic,
}

impl Step {
    fn run(&self) -> Result<(), CapabilityError> {
        match self {
            Self::Succeed => Ok(()),
            Self::Fail(message) => Err(CapabilityError::new(*message)),
            Self::Sleep(duration) => {
                thread::sleep(*duration);
                Ok(())
            }
            Self::Rendezvous(barrier) => {
                barrier.wait();
                Ok(())
            }
            Self::Panic => panic!("scripted panic"),
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    init: Step,
    reload: Step,
    shutdown: Step,
    health: VecDeque<HealthStatus>,
    health_delay: Option<Duration>,
    last_config: Option<ProviderConfig>,
}

/// Shared, mutable behaviour of one [`RecordingCapability`].
#[derive(Debug, Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub fn on_init(&self, step: Step) -> &Self {
        guard(&self.state).init = step;
        self
    }

    pub fn on_reload(&self, step: Step) -> &Self {
        guard(&self.state).reload = step;
        self
    }

    pub fn on_shutdown(&self, step: Step) -> &Self {
        guard(&self.state).shutdown = step;
        self
    }

    /// Queues probe results; an empty queue reports healthy.
    pub fn health(&self, statuses: impl IntoIterator<Item = HealthStatus>) -> &Self {
        guard(&self.state).health.extend(statuses);
        self
    }

    /// Makes every probe block for `delay` before answering.
    pub fn slow_health(&self, delay: Duration) -> &Self {
        guard(&self.state).health_delay = Some(delay);
        self
    }

    /// Configuration slice passed to the latest `init` or `reload`.
    pub fn last_config(&self) -> Option<ProviderConfig> {
        guard(&self.state).last_config.clone()
    }
}

/// Capability that journals every call and follows its [`Script`].
pub struct RecordingCapability {
    name: String,
    script: Script,
    journal: Journal,
}

impl Capability for RecordingCapability {
    fn init(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError> {
        self.journal.record(&self.name, Operation::Init);
        let step = {
            let mut state = guard(&self.script.state);
            state.last_config = Some(config.clone());
            state.init.clone()
        };
        step.run()
    }

    fn health_check(&mut self) -> HealthStatus {
        self.journal.record(&self.name, Operation::HealthCheck);
        let (delay, status) = {
            let mut state = guard(&self.script.state);
            (state.health_delay, state.health.pop_front())
        };
        if let Some(duration) = delay {
            thread::sleep(duration);
        }
        status.unwrap_or(HealthStatus::Healthy)
    }

    fn reload(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError> {
        self.journal.record(&self.name, Operation::Reload);
        let step = {
            let mut state = guard(&self.script.state);
            state.last_config = Some(config.clone());
            state.reload.clone()
        };
        step.run()
    }

    fn shutdown(&mut self) -> Result<(), CapabilityError> {
        self.journal.record(&self.name, Operation::Shutdown);
        let step = guard(&self.script.state).shutdown.clone();
        step.run()
    }
}

/// Catalogue of recording providers sharing one journal.
#[derive(Default)]
pub struct Catalogue {
    pub registry: CapabilityRegistry,
    pub journal: Journal,
    scripts: BTreeMap<String, Script>,
}

impl Catalogue {
    /// Registers a recording provider and returns its script.
    pub fn provider(&mut self, descriptor: ProviderDescriptor) -> Script {
        let script = Script::default();
        let name = descriptor.name().to_owned();
        let factory_script = script.clone();
        let journal = self.journal.clone();
        let factory_name = name.clone();
        self.registry
            .register(descriptor, move || RecordingCapability {
                name: factory_name.clone(),
                script: factory_script.clone(),
                journal: journal.clone(),
            })
            .expect("test descriptor registers");
        self.scripts.insert(name, script.clone());
        script
    }

    pub fn script(&self, name: &str) -> Script {
        self.scripts.get(name).cloned().expect("scripted provider")
    }

    /// Keeps the journal and scripts reachable after the catalogue is
    /// consumed by a bootstrap.
    pub fn observer(&self) -> Observer {
        Observer {
            journal: self.journal.clone(),
            scripts: self.scripts.clone(),
        }
    }

    /// Bootstrap with fast engine timings, no telemetry and a recording sink.
    pub fn bootstrap(self, sink: &Arc<RecordingEventSink>) -> Bootstrap {
        Bootstrap::new(self.registry)
            .source(fast_engine())
            .shared_event_sink(Arc::clone(sink) as Arc<dyn EventSink>)
            .without_telemetry()
    }
}

/// Journal and scripts of a catalogue that has been started.
#[derive(Debug, Clone)]
pub struct Observer {
    pub journal: Journal,
    scripts: BTreeMap<String, Script>,
}

impl Observer {
    pub fn script(&self, name: &str) -> Script {
        self.scripts.get(name).cloned().expect("scripted provider")
    }
}

/// Engine settings suited to tests: short timeouts, probes only on demand.
pub fn fast_engine() -> MapSource {
    MapSource::new("test-engine", priority::DEFAULTS + 1)
        .with("engine", "init_timeout_ms", 400_i64)
        .with("engine", "health_timeout_ms", 200_i64)
        .with("engine", "reload_timeout_ms", 400_i64)
        .with("engine", "shutdown_timeout_ms", 1_000_i64)
        .with("engine", "health_interval_ms", 3_600_000_i64)
        .with("engine", "watch_interval_ms", 3_600_000_i64)
}

/// Event sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingEventSink {
    fn push(&self, event: LifecycleEvent) {
        guard(&self.events).push(event);
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        guard(&self.events).clone()
    }

    pub fn transitions(&self) -> Vec<TransitionEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::Transition(transition) => Some(transition),
                _ => None,
            })
            .collect()
    }

    /// `(from, to)` pairs observed for one provider.
    pub fn path_of(&self, provider: &str) -> Vec<(LifecycleState, LifecycleState)> {
        self.transitions()
            .into_iter()
            .filter(|event| event.provider == provider)
            .map(|event| (event.from, event.to))
            .collect()
    }

    /// Providers entering `state`, in order.
    pub fn entering(&self, state: LifecycleState) -> Vec<String> {
        self.transitions()
            .into_iter()
            .filter(|event| event.to == state)
            .map(|event| event.provider)
            .collect()
    }

    pub fn alerts(&self) -> Vec<DegradationAlert> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::PersistentDegradation(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }

    pub fn reloads(&self) -> Vec<ReloadReport> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::ReloadCompleted(report) => Some(report),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn bootstrap_starting(&self, service_type: &str) {
        self.push(LifecycleEvent::BootstrapStarting {
            service_type: service_type.to_owned(),
        });
    }

    fn bootstrap_succeeded(&self, service_type: &str, report: &StartupReport) {
        self.push(LifecycleEvent::BootstrapSucceeded {
            service_type: service_type.to_owned(),
            report: report.clone(),
        });
    }

    fn bootstrap_failed(&self, service_type: &str, error: &BootstrapError) {
        self.push(LifecycleEvent::BootstrapFailed {
            service_type: service_type.to_owned(),
            error: error.clone(),
        });
    }

    fn transition(&self, event: &TransitionEvent) {
        self.push(LifecycleEvent::Transition(event.clone()));
    }

    fn persistent_degradation(&self, alert: &DegradationAlert) {
        self.push(LifecycleEvent::PersistentDegradation(alert.clone()));
    }

    fn reload_completed(&self, report: &ReloadReport) {
        self.push(LifecycleEvent::ReloadCompleted(report.clone()));
    }

    fn reload_failed(&self, error: &ReloadError) {
        self.push(LifecycleEvent::ReloadFailed(error.clone()));
    }
}

/// Mutable in-memory source whose watch token changes on every write.
#[derive(Debug)]
pub struct SharedSource {
    entries: Mutex<SourceEntries>,
    revision: AtomicU64,
    priority: u32,
}

impl SharedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(SourceEntries::new()),
            revision: AtomicU64::new(0),
            priority: priority::FILE,
        })
    }

    pub fn set(&self, provider: &str, option: &str, value: impl Into<OptionValue>) {
        guard(&self.entries).insert(
            ConfigKey::new(provider, option),
            RawValue::Typed(value.into()),
        );
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_text(&self, provider: &str, option: &str, value: &str) {
        guard(&self.entries).insert(
            ConfigKey::new(provider, option),
            RawValue::Text(value.to_owned()),
        );
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    pub fn as_source(self: &Arc<Self>) -> Arc<dyn ConfigSource> {
        Arc::clone(self) as Arc<dyn ConfigSource>
    }
}

impl ConfigSource for SharedSource {
    fn name(&self) -> &str {
        "shared"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn load(&self) -> Result<SourceEntries, SourceError> {
        Ok(guard(&self.entries).clone())
    }

    fn watch_token(&self) -> Option<WatchToken> {
        Some(WatchToken::new(
            self.revision.load(Ordering::SeqCst).to_string(),
        ))
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Asserts every provider of `handle` is in `state`.
pub fn assert_all(handle: &ServiceHandle, state: LifecycleState) {
    for (name, current) in handle.states() {
        assert_eq!(current, state, "provider {name}");
    }
}

mock! {
    pub Provider {}
    impl Capability for Provider {
        fn init(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError>;
        fn health_check(&mut self) -> HealthStatus;
        fn reload(&mut self, config: &ProviderConfig) -> Result<(), CapabilityError>;
        fn shutdown(&mut self) -> Result<(), CapabilityError>;
    }
}

mock! {
    pub Sink {}
    impl EventSink for Sink {
        fn bootstrap_starting(&self, service_type: &str);
        fn bootstrap_succeeded(&self, service_type: &str, report: &StartupReport);
        fn bootstrap_failed(&self, service_type: &str, error: &BootstrapError);
        fn transition(&self, event: &TransitionEvent);
        fn persistent_degradation(&self, alert: &DegradationAlert);
        fn reload_completed(&self, report: &ReloadReport);
        fn reload_failed(&self, error: &ReloadError);
    }
}
