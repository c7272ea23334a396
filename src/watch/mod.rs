//! Filesystem watching.
//!
//! Wraps notify's recommended watcher and delivers change events onto a
//! crossbeam channel for the dispatcher. Delivery is at-least-once:
//! duplicates for one logical change are possible and tolerated
//! downstream. Targets that do not exist at setup time are skipped, not
//! fatal (the generator may create them later).

mod route;
mod targets;

pub use route::{EventRoute, EventRouter};
pub use targets::{TargetRegistry, collect_targets};

use crate::{debug, log};
use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;

/// Kind of a filesystem change. Routing never filters on it; it exists
/// for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
    Other,
}

impl From<&EventKind> for FsEventKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => Self::Created,
            EventKind::Modify(notify::event::ModifyKind::Name(_)) => Self::Moved,
            EventKind::Modify(_) => Self::Modified,
            EventKind::Remove(_) => Self::Deleted,
            _ => Self::Other,
        }
    }
}

/// One filesystem change delivered to the dispatcher.
#[derive(Debug, Clone)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
}

/// Live watcher over a registry of targets.
pub struct FsWatcher {
    /// Handle must be kept alive; dropping it detaches all observers.
    watcher: RecommendedWatcher,
    rx: Receiver<FsEvent>,
}

impl FsWatcher {
    /// Start watching every existing target. Failing to create the
    /// underlying watcher is fatal; a missing target directory is not.
    pub fn start(registry: &TargetRegistry) -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let kind = FsEventKind::from(&event.kind);
                    for path in event.paths {
                        if tx.send(FsEvent { path, kind }).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => log!("watch"; "notify error: {}", e),
            })
            .context("filesystem watch support is unavailable on this platform")?;

        let mut attached = 0usize;
        for target in registry.iter() {
            if !target.path.exists() {
                debug!("watch"; "skipping missing target: {}", target.path.display());
                continue;
            }
            let mode = if target.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher
                .watch(&target.path, mode)
                .with_context(|| format!("failed to watch {}", target.path.display()))?;
            attached += 1;
        }
        debug!("watch"; "watching {attached} of {} targets", registry.len());

        Ok(Self { watcher, rx })
    }

    /// Channel the dispatcher consumes. Closes once the watcher stops.
    pub fn events(&self) -> Receiver<FsEvent> {
        self.rx.clone()
    }

    /// Detach every observer. The event channel drains and closes,
    /// ending the dispatcher loop.
    pub fn stop(mut self, registry: &TargetRegistry) {
        for target in registry.iter() {
            let _ = self.watcher.unwatch(&target.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_missing_targets_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = TargetRegistry::new();
        registry.add(dir.path().join("does-not-exist"), true);
        registry.add(dir.path(), true);
        // Must not error out on the missing entry.
        let watcher = FsWatcher::start(&registry).unwrap();
        watcher.stop(&registry);
    }

    #[test]
    fn test_events_delivered_for_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = TargetRegistry::new();
        registry.add(dir.path(), true);

        let watcher = FsWatcher::start(&registry).unwrap();
        let events = watcher.events();

        fs::write(dir.path().join("page.html"), "<html></html>").unwrap();

        // At-least-once: any event for the path within the window passes.
        let received = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(received.path.starts_with(dir.path()));
        watcher.stop(&registry);
    }
}
