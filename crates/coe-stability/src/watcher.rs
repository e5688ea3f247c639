//! File-system watcher feeding the stability gate

use coe_core::{CoeError, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::StabilityGate;

/// Reports writes under a root directory to a [`StabilityGate`]
///
/// Watching stops when this value is dropped.
pub struct FileWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Start watching `root` recursively
    ///
    /// Every create, content modify or remove event calls
    /// [`StabilityGate::report_file_change`] with the event's full path.
    pub fn start(root: impl Into<PathBuf>, gate: StabilityGate) -> Result<Self> {
        let root = root.into();

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                match res {
                    Ok(event) if is_write(&event.kind) => {
                        for path in &event.paths {
                            let path = path.to_string_lossy();
                            let reset = gate.report_file_change(&path);
                            if reset > 0 {
                                debug!(path = %path, sessions = reset, "File change reset sessions");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "File watch error"),
                }
            })
            .map_err(|e| CoeError::Watch(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| {
                CoeError::Watch(format!("Failed to watch {}: {e}", root.display()))
            })?;

        info!(root = %root.display(), "File watcher started");

        Ok(Self {
            root,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Whether an event represents a write to file content or existence
fn is_write(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    }
}
