use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::pin,
};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use fs4::tokio::AsyncFileExt;
use futures::{stream, StreamExt};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::Mutex,
};
use tracing::{debug, warn};

use crate::utils::{clock::Clock, time::date_to_record_name};

use super::{
    entities::{ActivityEvent, CodeChangeEvent, Metadata, StoredEvent, SystemEventEntity},
    sink::{EventSink, SinkError},
};

/// The main realization of [EventSink]. Events are appended as json lines into a record file per
/// UTC day.
pub struct EventStorage {
    record_dir: PathBuf,
    clock: Box<dyn Clock>,
    // Serializes writers inside the process. The file lock only protects against other
    // processes.
    write_lock: Mutex<()>,
}

impl EventStorage {
    pub fn new(record_dir: PathBuf, clock: Box<dyn Clock>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&record_dir)?;

        Ok(Self {
            record_dir,
            clock,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, date: NaiveDate) -> PathBuf {
        self.record_dir.join(date_to_record_name(date))
    }

    async fn append(&self, event: StoredEvent) -> Result<(), SinkError> {
        let mut buffer = serde_json::to_vec(&event)?;
        buffer.push(b'\n');

        let path = self.record_path(event.timestamp().date_naive());

        let _guard = self.write_lock.lock().await;
        let mut file = File::options()
            .append(true)
            .create(true)
            .open(&path)
            .await?;

        // Semi-safe acquire-release for a file
        file.lock_exclusive()?;
        let result = Self::write_with_file(&mut file, &buffer).await;
        file.unlock_async().await?;
        debug!("Appended {} bytes to {path:?}", buffer.len());
        result
    }

    async fn write_with_file(file: &mut File, buffer: &[u8]) -> Result<(), SinkError> {
        file.write_all(buffer).await?;
        file.flush().await?;
        Ok(())
    }

    /// Retrieves every event stored for a certain day.
    pub async fn get_data_for(&self, date: NaiveDate) -> Result<Vec<StoredEvent>, SinkError> {
        async fn extract(path: &Path) -> Result<Vec<StoredEvent>, std::io::Error> {
            debug!("Extracting {path:?}");
            let file = File::open(path).await?;
            file.lock_shared()?;
            let buffer = BufReader::new(file);
            let mut lines = buffer.lines();
            let mut events = vec![];
            while let Ok(Some(v)) = lines.next_line().await {
                match serde_json::from_str::<StoredEvent>(&v) {
                    Ok(v) => events.push(v),
                    Err(e) => {
                        // ignore illegal values. Might happen after shutdowns
                        warn!(
                            "During parsing in path {:?} found illegal json string {}:  {e}",
                            path, &v
                        )
                    }
                }
            }

            lines.into_inner().into_inner().unlock_async().await?;

            Ok(events)
        }

        match extract(&self.record_path(date)).await {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventSink for EventStorage {
    async fn record_activity(&self, event: ActivityEvent) -> Result<(), SinkError> {
        self.append(StoredEvent::Activity(event)).await
    }

    async fn record_code_change(&self, event: CodeChangeEvent) -> Result<(), SinkError> {
        self.append(StoredEvent::CodeChange(event)).await
    }

    async fn record_system_event(&self, kind: &str, metadata: Metadata) -> Result<(), SinkError> {
        self.append(StoredEvent::System(SystemEventEntity {
            kind: kind.into(),
            timestamp: self.clock.time(),
            metadata,
        }))
        .await
    }

    async fn query_window(
        &self,
        days: u32,
    ) -> Result<(Vec<ActivityEvent>, Vec<CodeChangeEvent>), SinkError> {
        let end = self.clock.time();
        let start = end - Duration::days(days.into());

        let dates = start
            .date_naive()
            .iter_days()
            .take_while(|day| *day <= end.date_naive());

        let mut files = pin!(stream::iter(dates)
            .map(|day| self.get_data_for(day))
            .buffered(4));

        let mut events = vec![];
        while let Some(data) = files.next().await {
            events.extend(data?.into_iter().filter(|v| v.timestamp() >= start));
        }
        events.sort_by_key(StoredEvent::timestamp);

        let mut activity = vec![];
        let mut code_changes = vec![];
        for event in events {
            match event {
                StoredEvent::Activity(v) => activity.push(v),
                StoredEvent::System(v) => activity.push(v.into()),
                StoredEvent::CodeChange(v) => code_changes.push(v),
            }
        }
        Ok((activity, code_changes))
    }
}
