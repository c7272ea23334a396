//! Event routing.
//!
//! Classifies raw filesystem events into rebuild triggers and output
//! refreshes. Any event kind counts; deduplication of bursts is left to
//! the rebuild worker's coalescing.

use super::FsEvent;
use std::path::PathBuf;

/// Where one filesystem event should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// Source tree changed: run a rebuild.
    Rebuild(PathBuf),

    /// Output tree changed: refresh clients viewing `path`
    /// (relative to the output directory, `/`-separated).
    Refresh(String),

    /// Config-directory sibling or otherwise uninteresting event.
    Ignore,
}

/// Routes events by comparing their paths against the configured trees.
///
/// The config file is watched through its parent directory, so every
/// event from that directory is filtered by exact path equality against
/// the config file's absolute path. Sibling files must never trigger a
/// rebuild.
pub struct EventRouter {
    output: PathBuf,
    config_file: PathBuf,
    config_dir: PathBuf,
}

impl EventRouter {
    /// `output` and `config_file` must be absolute, matching the paths
    /// the watcher reports.
    pub fn new(output: PathBuf, config_file: PathBuf) -> Self {
        let config_dir = config_file
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        Self {
            output,
            config_file,
            config_dir,
        }
    }

    pub fn route(&self, event: &FsEvent) -> EventRoute {
        let path = &event.path;

        if *path == self.config_file {
            return EventRoute::Rebuild(path.clone());
        }
        if path.starts_with(&self.output) {
            let rel = path.strip_prefix(&self.output).unwrap_or(path);
            return EventRoute::Refresh(rel.to_string_lossy().replace('\\', "/"));
        }
        if path.parent() == Some(self.config_dir.as_path()) {
            return EventRoute::Ignore;
        }
        EventRoute::Rebuild(path.clone())
    }
}
