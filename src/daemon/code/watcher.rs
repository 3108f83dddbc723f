use std::path::{Path, PathBuf};

use anyhow::Result;
use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::daemon::storage::entities::ChangeType;

use super::PathChange;

/// Canonicalizes the configured directories. Directories that don't exist are skipped.
pub fn resolve_watch_roots(directories: &[PathBuf]) -> Vec<PathBuf> {
    directories
        .iter()
        .filter_map(|dir| match dir.canonicalize() {
            Ok(root) if root.is_dir() => Some(root),
            Ok(_) => {
                warn!("Watch path {dir:?} is not a directory, skipping");
                None
            }
            Err(e) => {
                warn!("Watch directory {dir:?} is not available, skipping: {e}");
                None
            }
        })
        .collect()
}

fn changes_of(paths: &[PathBuf], change_type: ChangeType) -> Vec<PathChange> {
    paths
        .iter()
        .map(|v| PathChange::new(v, change_type))
        .collect()
}

fn rename_of_unknown_side(path: &Path) -> PathChange {
    if path.exists() {
        PathChange::new(path, ChangeType::Created)
    } else {
        PathChange::new(path, ChangeType::Deleted)
    }
}

/// Maps a raw notification into path changes. A rename becomes a delete of the source and a
/// create of the destination. Directory events and metadata-only changes produce nothing.
pub fn classify_event(event: &Event) -> Vec<PathChange> {
    let changes = match &event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => vec![],
        EventKind::Create(_) => changes_of(&event.paths, ChangeType::Created),
        EventKind::Remove(_) => changes_of(&event.paths, ChangeType::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                PathChange::new(from, ChangeType::Deleted),
                PathChange::new(to, ChangeType::Created),
            ],
            other => other.iter().map(|v| rename_of_unknown_side(v)).collect(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            changes_of(&event.paths, ChangeType::Deleted)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            changes_of(&event.paths, ChangeType::Created)
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|v| rename_of_unknown_side(v))
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => vec![],
        EventKind::Modify(_) => changes_of(&event.paths, ChangeType::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => vec![],
    };

    changes
        .into_iter()
        .filter(|v| v.change_type == ChangeType::Deleted || !v.path.is_dir())
        .collect()
}

/// Recursive watch over the configured roots. Notifications are delivered on the watcher's own
/// thread and forwarded into `sender`. Dropping the watcher stops the notifications and closes
/// the channel.
pub struct FsWatcher {
    watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl FsWatcher {
    pub fn start(roots: Vec<PathBuf>, sender: mpsc::Sender<PathChange>) -> Result<Self> {
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for change in classify_event(&event) {
                        debug!("Observed {change:?}");
                        if sender.blocking_send(change).is_err() {
                            debug!("Debouncer is gone, dropping notification");
                            return;
                        }
                    }
                }
                Err(e) => error!("Watch error {e:?}"),
            })?;

        for root in &roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!("Watching {root:?}");
        }

        Ok(Self { watcher, roots })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn stop(mut self) {
        for root in &self.roots {
            if let Err(e) = self.watcher.unwatch(root) {
                debug!("Failed to unwatch {root:?} {e:?}");
            }
        }
        info!("Stopped watching");
    }
}
