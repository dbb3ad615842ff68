use anyhow::{anyhow, Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Level-triggered "recompile owed" flag.
///
/// Written from the watcher's notification thread, read and cleared by the tick loop. Any number
/// of raises between two takes collapse into one.
#[derive(Debug, Clone, Default)]
pub struct DirtySignal {
    flag: Arc<AtomicBool>,
}

impl DirtySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clears the flag and reports whether it was set.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

/// Watches one file and raises a [`DirtySignal`] when it changes.
///
/// The watcher observes the parent directory, the way editors that save through a temporary file
/// and rename still produce a change for the target.
pub struct ChangeWatch {
    watcher: Option<RecommendedWatcher>,
    directory: PathBuf,
    target: PathBuf,
    signal: DirtySignal,
}

impl ChangeWatch {
    pub fn new(path: impl AsRef<Path>, signal: DirtySignal, poll_interval: Duration) -> Result<Self> {
        let target = normalize_watch_path(path.as_ref());
        let directory = target
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("'{}' has no parent directory to watch", target.display()))?;
        if !directory.is_dir() {
            anyhow::bail!("directory '{}' does not exist", directory.display());
        }

        let callback_signal = signal.clone();
        let callback_target = target.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event_touches(&event, &callback_target) {
                    callback_signal.raise();
                }
            }
            Err(err) => eprintln!("[watch] {} watcher error: {err}", callback_target.display()),
        })?;
        watcher
            .configure(NotifyConfig::default().with_compare_contents(false).with_poll_interval(poll_interval))
            .context("configure script watcher")?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", directory.display()))?;
        Ok(Self { watcher: Some(watcher), directory, target, signal })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn signal(&self) -> &DirtySignal {
        &self.signal
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Unsubscribes from the filesystem. Later changes no longer raise the signal.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(err) = watcher.unwatch(&self.directory) {
                eprintln!("[watch] failed to unwatch {}: {err}", self.directory.display());
            }
        }
    }
}

impl Drop for ChangeWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
    )
}

pub(crate) fn event_touches(event: &Event, target: &Path) -> bool {
    is_relevant(&event.kind)
        && event.paths.iter().any(|path| path == target || normalize_watch_path(path) == target)
}

pub(crate) fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    match fs::canonicalize(&absolute) {
        Ok(canonical) => canonical,
        Err(_) => {
            if let Some(parent) = absolute.parent() {
                if let Ok(parent_canon) = fs::canonicalize(parent) {
                    if let Some(name) = absolute.file_name() {
                        return parent_canon.join(name);
                    }
                    return parent_canon;
                }
            }
            absolute
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    fn target() -> PathBuf {
        normalize_watch_path(&env::temp_dir().join("kestrel_watch_target.rhai"))
    }

    #[test]
    fn raises_coalesce_into_one_take() {
        let signal = DirtySignal::new();
        signal.raise();
        signal.raise();
        signal.clone().raise();
        assert!(signal.is_raised());
        assert!(signal.take());
        assert!(!signal.take());
    }

    #[test]
    fn raise_from_another_thread_is_visible() {
        let signal = DirtySignal::new();
        let remote = signal.clone();
        std::thread::spawn(move || remote.raise()).join().expect("join");
        assert!(signal.take());
    }

    #[test]
    fn content_changes_to_the_target_are_relevant() {
        let target = target();
        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(target.clone());
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(target.clone());
        assert!(event_touches(&modify, &target));
        assert!(event_touches(&create, &target));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let target = target();
        let sibling = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(target.with_file_name("other.rhai"));
        let metadata =
            Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))).add_path(target.clone());
        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(target.clone());
        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(target.clone());
        for event in [sibling, metadata, access, removed] {
            assert!(!event_touches(&event, &target), "{event:?}");
        }
    }

    #[test]
    fn writing_the_file_raises_the_signal() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("watched.rhai");
        fs::write(&path, "class A : Behaviour {}").expect("seed file");
        let sibling = dir.path().join("sibling.rhai");
        let signal = DirtySignal::new();
        let watch = ChangeWatch::new(&path, signal.clone(), Duration::from_millis(50)).expect("watch");
        assert!(watch.is_watching());
        assert_eq!(watch.target(), normalize_watch_path(&path));

        fs::write(&path, "class A : Behaviour { let x = 1; }").expect("modify file");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !signal.is_raised() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(signal.is_raised(), "modification should raise the signal");

        // Let the burst of events from one write settle before checking the sibling.
        std::thread::sleep(Duration::from_millis(300));
        signal.take();
        fs::write(&sibling, "class B : Behaviour {}").expect("write sibling");
        std::thread::sleep(Duration::from_millis(300));
        assert!(!signal.is_raised(), "other files in the directory are ignored");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let missing = env::temp_dir().join("kestrel_missing_dir_for_watch").join("nested").join("a.rhai");
        assert!(ChangeWatch::new(&missing, DirtySignal::new(), Duration::from_millis(50)).is_err());
    }
}
