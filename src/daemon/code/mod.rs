//! Code change pipeline: the filesystem watcher feeds the debouncer, which hands settled changes
//! to the change processor.

use std::path::PathBuf;

use crate::daemon::storage::entities::ChangeType;

pub mod debounce;
pub mod diff;
pub mod filter;
pub mod processor;
pub mod watcher;

/// A single change of a path, as seen by the watcher or after debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub path: PathBuf,
    pub change_type: ChangeType,
}

impl PathChange {
    pub fn new(path: impl Into<PathBuf>, change_type: ChangeType) -> Self {
        Self {
            path: path.into(),
            change_type,
        }
    }
}
