use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::{
    daemon::storage::{
        entities::{ChangeType, CodeChangeEvent, Metadata},
        sink::{EventSink, SinkError},
    },
    utils::clock::Clock,
};

use super::{diff::unified_diff, filter::TrackingFilter, PathChange};

/// Text of a file, falling back to Latin-1 for files that aren't valid UTF-8.
fn decode(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| e.into_bytes().into_iter().map(char::from).collect())
}

/// Last known content of every tracked file.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    contents: HashMap<PathBuf, String>,
}

impl SnapshotCache {
    /// Walks `roots` and reads every tracked file. Ignored directories are not descended into.
    /// Only the part of a path below its root is checked against the ignored directories.
    pub fn seed(roots: &[PathBuf], filter: &TrackingFilter) -> Self {
        let mut cache = Self::default();
        for root in roots {
            let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry
                        .file_name()
                        .to_str()
                        .is_some_and(|v| filter.is_ignored_directory(v))
            });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("Skipping unreadable entry {e}");
                        continue;
                    }
                };
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                if !entry.file_type().is_file() || !filter.is_tracked(relative) {
                    continue;
                }
                match std::fs::read(entry.path()) {
                    Ok(bytes) => cache.insert(entry.into_path(), decode(bytes)),
                    Err(e) => debug!("Failed to read {:?} {e}", entry.path()),
                }
            }
        }
        info!("Loaded snapshots of {} files", cache.len());
        cache
    }

    /// [SnapshotCache::seed] on the blocking pool.
    pub async fn seed_blocking(roots: Vec<PathBuf>, filter: TrackingFilter) -> Result<Self> {
        Ok(tokio::task::spawn_blocking(move || Self::seed(&roots, &filter)).await?)
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.contents.get(path).map(String::as_str)
    }

    pub fn insert(&mut self, path: PathBuf, content: String) {
        self.contents.insert(path, content);
    }

    pub fn remove(&mut self, path: &Path) -> Option<String> {
        self.contents.remove(path)
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// Turns settled path changes into [CodeChangeEvent]s. Owns the snapshot cache, so there is
/// exactly one processor per pipeline.
pub struct ChangeProcessor {
    filter: TrackingFilter,
    roots: Vec<PathBuf>,
    cache: SnapshotCache,
    sink: Arc<dyn EventSink>,
    time_provider: Box<dyn Clock>,
}

impl ChangeProcessor {
    pub fn new(
        filter: TrackingFilter,
        roots: Vec<PathBuf>,
        cache: SnapshotCache,
        sink: Arc<dyn EventSink>,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            filter,
            roots,
            cache,
            sink,
            time_provider,
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Part of `path` below the watch root containing it.
    fn relative_path<'a>(&self, path: &'a Path) -> &'a Path {
        self.roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or(path)
    }

    fn event(
        &self,
        path: &Path,
        change_type: ChangeType,
        file_size: Option<u64>,
        diff_content: String,
    ) -> CodeChangeEvent {
        let mut metadata = Metadata::new();
        metadata.insert(
            "absolute_path".into(),
            path.to_string_lossy().into_owned().into(),
        );
        metadata.insert(
            "file_extension".into(),
            path.extension()
                .map(|v| format!(".{}", v.to_string_lossy().to_lowercase()))
                .unwrap_or_default()
                .into(),
        );

        CodeChangeEvent {
            file_path: self.relative_path(path).to_string_lossy().into(),
            change_type,
            file_size,
            diff_content,
            timestamp: self.time_provider.time(),
            metadata,
        }
    }

    /// Reads the current content along with its size on disk. `None` when the path is gone, is
    /// not a file or can't be read.
    async fn read_current(path: &Path) -> Option<(String, u64)> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => (),
            _ => return None,
        }
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                Some((decode(bytes), size))
            }
            Err(e) => {
                warn!("Failed to read {path:?} {e}");
                None
            }
        }
    }

    /// Computes the change of `path` against its snapshot and records it. Returns the recorded
    /// event, or `None` when nothing observable changed.
    pub async fn process(
        &mut self,
        path: &Path,
        change_type: ChangeType,
    ) -> Result<Option<CodeChangeEvent>, SinkError> {
        if !self.filter.is_tracked(self.relative_path(path)) {
            return Ok(None);
        }
        let name = path
            .file_name()
            .map(|v| v.to_string_lossy())
            .unwrap_or_default();

        let event = match change_type {
            ChangeType::Deleted => {
                let old = self.cache.remove(path).unwrap_or_default();
                let diff = unified_diff(&old, "", &name);
                if diff.is_empty() {
                    return Ok(None);
                }
                self.event(path, change_type, None, diff)
            }
            ChangeType::Created | ChangeType::Modified => {
                let Some((new, file_size)) = Self::read_current(path).await else {
                    return Ok(None);
                };
                let diff = unified_diff(self.cache.get(path).unwrap_or_default(), &new, &name);
                if diff.is_empty() {
                    return Ok(None);
                }
                self.cache.insert(path.to_path_buf(), new);
                self.event(path, change_type, Some(file_size), diff)
            }
        };

        debug!("Recording {} of {}", event.change_type, event.file_path);
        self.sink.record_code_change(event.clone()).await?;
        Ok(Some(event))
    }

    /// Processes changes until the debouncer closes the channel.
    pub async fn run(mut self, mut receiver: mpsc::Receiver<PathChange>) -> Result<()> {
        while let Some(PathChange { path, change_type }) = receiver.recv().await {
            if let Err(e) = self.process(&path, change_type).await {
                error!("Failed to record {change_type} of {path:?} {e:?}");
            }
        }
        info!("Change processor stopped");
        Ok(())
    }
}
