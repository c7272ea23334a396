//! Rebuild coordination.
//!
//! Source-tree changes funnel into a single worker thread that runs the
//! external build command. Builds never overlap; triggers arriving while
//! a build is in flight are coalesced into one follow-up run, so the
//! watch dispatcher is never blocked for the duration of a build.

use crate::{
    bus::{Notification, NotificationBus},
    log,
};
use anyhow::{Context, Result};
use crossbeam::channel::{self, Sender};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};

/// Result of one build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildOutcome {
    pub success: bool,
    /// Captured stderr: failure diagnostics, or warnings on success.
    pub diagnostics: String,
}

/// Runs the configured external build command to completion.
#[derive(Debug, Clone)]
pub struct Rebuilder {
    program: String,
    args: Vec<String>,
}

impl Rebuilder {
    pub fn new(argv: Vec<String>) -> Self {
        let mut iter = argv.into_iter();
        let program = iter.next().unwrap_or_default();
        Self {
            program,
            args: iter.collect(),
        }
    }

    /// Invoke the build process and block until it exits. Stdout passes
    /// through to the terminal; stderr is captured for the outcome.
    pub fn rebuild(&self) -> Result<RebuildOutcome> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to run build command `{}`", self.program))?;
        let output = child.wait_with_output()?;
        Ok(RebuildOutcome {
            success: output.status.success(),
            diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Publish policy for one outcome: failures alert connected clients,
/// warnings from a successful build are only logged. A build that
/// succeeds but warns must not raise a client-visible alert.
pub fn publish_outcome(outcome: &RebuildOutcome, bus: &NotificationBus) {
    if outcome.success {
        if !outcome.diagnostics.is_empty() {
            log!("rebuild"; "{}", outcome.diagnostics.trim_end());
        }
    } else {
        log!("error"; "{}", outcome.diagnostics.trim_end());
        bus.publish(Notification::Error(outcome.diagnostics.clone()));
    }
}

/// Clonable handle for requesting a rebuild.
#[derive(Clone)]
pub struct RebuildTrigger {
    tx: Sender<PathBuf>,
}

impl RebuildTrigger {
    /// Request a rebuild for a changed source path. Never blocks; if the
    /// worker is mid-build the request queues and is coalesced.
    pub fn trigger(&self, path: PathBuf) {
        let _ = self.tx.send(path);
    }
}

/// Single-slot rebuild worker. Owns the only thread that ever invokes
/// the build command.
pub struct RebuildWorker {
    tx: Sender<PathBuf>,
    handle: JoinHandle<()>,
}

impl RebuildWorker {
    pub fn spawn(rebuilder: Rebuilder, bus: NotificationBus) -> Self {
        let (tx, rx) = channel::unbounded::<PathBuf>();
        let handle = thread::spawn(move || {
            while let Ok(first) = rx.recv() {
                // Collapse every trigger that queued up behind this one.
                let mut latest = first;
                while let Ok(next) = rx.try_recv() {
                    latest = next;
                }
                log!("rebuild"; "rebuilding site (from {})", latest.display());
                match rebuilder.rebuild() {
                    Ok(outcome) => publish_outcome(&outcome, &bus),
                    Err(e) => {
                        log!("error"; "{e:#}");
                        bus.publish(Notification::Error(format!("{e:#}")));
                    }
                }
            }
        });
        Self { tx, handle }
    }

    pub fn trigger_handle(&self) -> RebuildTrigger {
        RebuildTrigger {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting triggers and wait for any in-flight build.
    /// All `RebuildTrigger` clones must be dropped first.
    pub fn shutdown(self) {
        drop(self.tx);
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn sh(script: &str) -> Rebuilder {
        Rebuilder::new(vec!["sh".into(), "-c".into(), script.into()])
    }

    #[cfg(unix)]
    #[test]
    fn test_success_captures_no_alert() {
        let bus = NotificationBus::new();
        let outcome = sh("exit 0").rebuild().unwrap();
        assert!(outcome.success);
        publish_outcome(&outcome, &bus);
        assert_eq!(bus.pending_len(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_success_with_warnings_publishes_nothing() {
        // stderr output from a successful build is informational.
        let bus = NotificationBus::new();
        let outcome = sh("echo 'warning: slow template' >&2; exit 0")
            .rebuild()
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.diagnostics.contains("slow template"));
        publish_outcome(&outcome, &bus);
        assert_eq!(bus.pending_len(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_publishes_one_alert_with_stderr() {
        let bus = NotificationBus::new();
        let outcome = sh("echo 'template error on line 3' >&2; exit 1")
            .rebuild()
            .unwrap();
        assert!(!outcome.success);
        publish_outcome(&outcome, &bus);
        let pending = bus.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0],
            Notification::Error(outcome.diagnostics.clone())
        );
        assert!(outcome.diagnostics.contains("template error on line 3"));
    }

    #[test]
    fn test_missing_command_is_an_error() {
        let rebuilder = Rebuilder::new(vec!["liveserve-no-such-binary".into()]);
        assert!(rebuilder.rebuild().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_worker_coalesces_and_shuts_down() {
        let bus = NotificationBus::new();
        let worker = RebuildWorker::spawn(sh("exit 0"), bus.clone());
        let trigger = worker.trigger_handle();
        for i in 0..10 {
            trigger.trigger(PathBuf::from(format!("src/{i}.md")));
        }
        drop(trigger);
        worker.shutdown();
        // No failures, so nothing reached the bus.
        assert_eq!(bus.pending_len(), 0);
    }
}
