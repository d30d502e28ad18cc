//! Background health probing and configuration watching.
//!
//! The supervisor owns:
//!
//! - one probe thread per running provider, each on its own interval;
//! - a platform file notifier for file-backed sources;
//! - one poller for the watch tokens of sources that cannot be notified,
//!   started only when such a source exists;
//! - one reload worker draining the reload queue, so passes run one at a
//!   time in request order.
//!
//! Every thread blocks on a channel, so dropping the supervisor's senders
//! wakes and ends them immediately.

mod files;
mod reload;

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::RecommendedWatcher;
use tracing::{debug, info, warn};

use crate::error::ReloadError;
use crate::lifecycle::LifecycleState;
use crate::orchestrator::Orchestrator;

pub use reload::ReloadReport;
pub(crate) use reload::Reloader;

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

enum Command {
    Reload,
    Stop,
}

/// Running background threads of one service.
pub(crate) struct Supervisor {
    stops: Vec<Sender<()>>,
    commands: Sender<Command>,
    threads: Vec<JoinHandle<()>>,
    files: Option<RecommendedWatcher>,
}

impl Supervisor {
    /// Spawns the probe, watcher and reload threads and starts the file
    /// notifier.
    ///
    /// # Errors
    ///
    /// Returns the spawn error; threads already started are stopped first.
    pub(crate) fn start(
        orchestrator: &Arc<Orchestrator>,
        reloader: &Arc<Reloader>,
    ) -> Result<Self, io::Error> {
        let (commands, queue) = mpsc::channel();
        let mut supervisor = Self {
            stops: Vec::new(),
            commands,
            threads: Vec::new(),
            files: None,
        };
        if let Err(error) = supervisor.spawn_all(orchestrator, reloader, queue) {
            supervisor.stop();
            supervisor.join();
            return Err(error);
        }
        Ok(supervisor)
    }

    fn spawn_all(
        &mut self,
        orchestrator: &Arc<Orchestrator>,
        reloader: &Arc<Reloader>,
        queue: Receiver<Command>,
    ) -> Result<(), io::Error> {
        let worker = Arc::clone(reloader);
        self.threads.push(
            thread::Builder::new()
                .name("trellis-reload".to_owned())
                .spawn(move || drain_reloads(&worker, &queue))?,
        );

        let settings = orchestrator.settings();
        for instance in orchestrator.instances() {
            if !matches!(
                instance.state(),
                LifecycleState::Ready | LifecycleState::Degraded
            ) {
                continue;
            }
            let name = instance.name().to_owned();
            let interval = instance
                .descriptor()
                .health_interval()
                .unwrap_or(settings.health_interval);
            let probes = Arc::clone(orchestrator);
            let stop = self.stop_channel();
            self.threads.push(
                thread::Builder::new()
                    .name(format!("trellis-probe-{name}"))
                    .spawn(move || probe_loop(&probes, &name, interval, &stop))?,
            );
        }

        if settings.watch_files {
            self.files =
                files::watch_files(&reloader.resolver().watched_files(), self.commands.clone());
        }

        if !reloader.resolver().has_polled_sources() {
            return Ok(());
        }
        let watched = Arc::clone(reloader);
        let requests = self.commands.clone();
        let interval = settings.watch_interval;
        let stop = self.stop_channel();
        self.threads.push(
            thread::Builder::new()
                .name("trellis-watch".to_owned())
                .spawn(move || watch_loop(&watched, &requests, interval, &stop))?,
        );
        Ok(())
    }

    fn stop_channel(&mut self) -> Receiver<()> {
        let (sender, receiver) = mpsc::channel();
        self.stops.push(sender);
        receiver
    }

    /// Queues a reload pass.
    pub(crate) fn request_reload(&self) -> Result<(), ReloadError> {
        self.commands
            .send(Command::Reload)
            .map_err(|_| ReloadError::QueueClosed)
    }

    /// Signals every thread to finish without waiting for them.
    pub(crate) fn stop(&mut self) {
        self.files = None;
        self.stops.clear();
        drop(self.commands.send(Command::Stop));
    }

    /// Waits for every thread to finish.
    pub(crate) fn join(&mut self) {
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                warn!(
                    target: SUPERVISOR_TARGET,
                    thread = name.as_deref(),
                    "supervisor thread panicked"
                );
            }
        }
    }
}

fn probe_loop(orchestrator: &Orchestrator, name: &str, interval: Duration, stop: &Receiver<()>) {
    debug!(
        target: SUPERVISOR_TARGET,
        provider = name,
        interval_ms = interval.as_millis(),
        "health probing started"
    );
    while let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(interval) {
        if let Some(outcome) = orchestrator.probe(name) {
            debug!(
                target: SUPERVISOR_TARGET,
                provider = name,
                outcome = ?outcome,
                "health probe"
            );
        }
        if orchestrator
            .state_of(name)
            .is_some_and(LifecycleState::is_terminal)
        {
            break;
        }
    }
}

fn watch_loop(
    reloader: &Reloader,
    requests: &Sender<Command>,
    interval: Duration,
    stop: &Receiver<()>,
) {
    let mut last = reloader.resolver().watch_tokens();
    while let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(interval) {
        let current = reloader.resolver().watch_tokens();
        if current == last {
            continue;
        }
        info!(
            target: SUPERVISOR_TARGET,
            "configuration source change detected"
        );
        last = current;
        if requests.send(Command::Reload).is_err() {
            break;
        }
    }
}

fn drain_reloads(reloader: &Reloader, queue: &Receiver<Command>) {
    while let Ok(Command::Reload) = queue.recv() {
        // Coalesce requests that piled up while a pass was running.
        let mut stop_after = false;
        for pending in queue.try_iter() {
            if matches!(pending, Command::Stop) {
                stop_after = true;
                break;
            }
        }
        if let Err(error) = reloader.run() {
            debug!(
                target: SUPERVISOR_TARGET,
                error = %error,
                "queued reload not applied"
            );
        }
        if stop_after {
            break;
        }
    }
}
