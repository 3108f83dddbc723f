use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::{
    sync::CancellationToken,
    time::{delay_queue, DelayQueue},
};
use tracing::{debug, info};

use crate::daemon::storage::entities::ChangeType;

use super::PathChange;

/// Pending changes keyed by path. Every path has at most one timer, which is pushed back on each
/// new change.
pub struct DebounceMap {
    entries: HashMap<PathBuf, (ChangeType, delay_queue::Key)>,
    queue: DelayQueue<PathBuf>,
    delay: Duration,
}

impl DebounceMap {
    pub fn new(delay: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            queue: DelayQueue::new(),
            delay,
        }
    }

    /// Records `change_type` as the latest change of `path` and restarts its quiet period.
    pub fn upsert(&mut self, path: PathBuf, change_type: ChangeType) {
        match self.entries.get_mut(&path) {
            Some((pending, key)) => {
                *pending = change_type;
                self.queue.reset(key, self.delay);
            }
            None => {
                let key = self.queue.insert(path.clone(), self.delay);
                self.entries.insert(path, (change_type, key));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Waits for the next path whose quiet period is over and clears its entry. Returns `None`
    /// when nothing is pending.
    pub async fn next_expired(&mut self) -> Option<PathChange> {
        let path = self.queue.next().await?.into_inner();
        let (change_type, _) = self.entries.remove(&path)?;
        Some(PathChange { path, change_type })
    }

    /// Removes every pending change regardless of its timer.
    pub fn drain(&mut self) -> Vec<PathChange> {
        self.queue.clear();
        let mut changes = self
            .entries
            .drain()
            .map(|(path, (change_type, _))| PathChange { path, change_type })
            .collect::<Vec<_>>();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }
}

/// Trailing debounce of raw watcher events. A burst of changes to a single path is forwarded
/// once, a quiet period after its last change, with the type of that last change.
pub struct Debouncer {
    receiver: mpsc::Receiver<PathChange>,
    next: mpsc::Sender<PathChange>,
    pending: DebounceMap,
    shutdown: CancellationToken,
}

impl Debouncer {
    pub fn new(
        receiver: mpsc::Receiver<PathChange>,
        next: mpsc::Sender<PathChange>,
        delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            next,
            pending: DebounceMap::new(delay),
            shutdown,
        }
    }

    /// Runs until shutdown or until the watcher goes away. Changes still waiting for their quiet
    /// period are forwarded right away before returning.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                // Expired changes are forwarded before new notifications are taken.
                Some(change) = self.pending.next_expired(), if !self.pending.is_empty() => {
                    if self.next.send(change).await.is_err() {
                        info!("Change processor is gone, stopping debouncer");
                        return Ok(());
                    }
                }
                change = self.receiver.recv() => match change {
                    Some(PathChange { path, change_type }) => {
                        debug!("Scheduling {change_type} of {path:?}");
                        self.pending.upsert(path, change_type);
                    }
                    None => break,
                },
            }
        }

        while let Ok(PathChange { path, change_type }) = self.receiver.try_recv() {
            self.pending.upsert(path, change_type);
        }
        let pending = self.pending.drain();
        if !pending.is_empty() {
            info!("Flushing {} pending changes", pending.len());
        }
        for change in pending {
            if self.next.send(change).await.is_err() {
                break;
            }
        }
        info!("Debouncer stopped");
        Ok(())
    }
}
