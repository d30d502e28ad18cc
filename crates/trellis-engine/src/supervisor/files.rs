//! Platform file notifications for file-backed configuration sources.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::{Command, SUPERVISOR_TARGET};

/// Watches the directories holding `files` and queues a reload whenever one
/// of the files is created, written, renamed or removed.
///
/// Directories are watched instead of the files so that editors replacing a
/// file through a rename keep being noticed. Returns `None` when nothing
/// could be watched; the files are then only re-read on explicit reloads.
pub(super) fn watch_files(
    files: &[Utf8PathBuf],
    requests: Sender<Command>,
) -> Option<RecommendedWatcher> {
    if files.is_empty() {
        return None;
    }
    let names: BTreeSet<OsString> = files
        .iter()
        .filter_map(|file| file.file_name())
        .map(OsString::from)
        .collect();
    let directories: BTreeSet<PathBuf> = files.iter().map(|file| directory_of(file)).collect();

    let handler = move |result: notify::Result<Event>| match result {
        Ok(event) if is_relevant(&event, &names) => {
            debug!(
                target: SUPERVISOR_TARGET,
                paths = ?event.paths,
                "configuration file changed"
            );
            drop(requests.send(Command::Reload));
        }
        Ok(_) => {}
        Err(error) => warn!(
            target: SUPERVISOR_TARGET,
            error = %error,
            "configuration file notification failed"
        ),
    };
    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(error) => {
            warn!(
                target: SUPERVISOR_TARGET,
                error = %error,
                "file notifier unavailable; configuration files reload on request only"
            );
            return None;
        }
    };

    let mut watching = false;
    for directory in &directories {
        match watcher.watch(directory, RecursiveMode::NonRecursive) {
            Ok(()) => {
                watching = true;
                info!(
                    target: SUPERVISOR_TARGET,
                    directory = %directory.display(),
                    "watching configuration directory"
                );
            }
            Err(error) => warn!(
                target: SUPERVISOR_TARGET,
                directory = %directory.display(),
                error = %error,
                "cannot watch configuration directory"
            ),
        }
    }
    watching.then_some(watcher)
}

fn directory_of(file: &Utf8Path) -> PathBuf {
    file.parent()
        .filter(|parent| !parent.as_str().is_empty())
        .map_or_else(|| PathBuf::from("."), |parent| parent.as_std_path().to_path_buf())
}

fn is_relevant(event: &Event, names: &BTreeSet<OsString>) -> bool {
    !matches!(event.kind, EventKind::Access(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name().is_some_and(|name| names.contains(name)))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use rstest::rstest;

    use super::*;

    fn names() -> BTreeSet<OsString> {
        BTreeSet::from([OsString::from("service.toml")])
    }

    #[rstest]
    #[case::written(EventKind::Modify(ModifyKind::Any), "/etc/app/service.toml", true)]
    #[case::replaced(EventKind::Create(CreateKind::File), "/etc/app/service.toml", true)]
    #[case::sibling(EventKind::Modify(ModifyKind::Any), "/etc/app/other.toml", false)]
    #[case::read_only(EventKind::Access(AccessKind::Any), "/etc/app/service.toml", false)]
    fn filters_events_by_file_and_kind(
        #[case] kind: EventKind,
        #[case] path: &str,
        #[case] expected: bool,
    ) {
        let event = Event::new(kind).add_path(PathBuf::from(path));
        assert_eq!(is_relevant(&event, &names()), expected);
    }

    #[test]
    fn relative_files_are_watched_in_the_working_directory() {
        assert_eq!(directory_of(Utf8Path::new("service.toml")), PathBuf::from("."));
        assert_eq!(
            directory_of(Utf8Path::new("/etc/app/service.toml")),
            PathBuf::from("/etc/app")
        );
    }

    #[test]
    fn writing_a_watched_file_queues_a_reload() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = Utf8PathBuf::from_path_buf(dir.path().join("service.toml")).expect("utf-8");
        std::fs::write(&file, "[cache]\nttl = 1\n").expect("write config");
        let (requests, queue) = mpsc::channel();

        let watcher = watch_files(std::slice::from_ref(&file), requests).expect("watching");
        std::fs::write(&file, "[cache]\nttl = 2\n").expect("rewrite config");

        let command = queue
            .recv_timeout(Duration::from_secs(5))
            .expect("reload queued");
        assert!(matches!(command, Command::Reload));
        drop(watcher);
    }

    #[test]
    fn nothing_to_watch_without_files() {
        let (requests, _queue) = mpsc::channel();
        assert!(watch_files(&[], requests).is_none());
    }
}
