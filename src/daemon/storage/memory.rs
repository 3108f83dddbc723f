use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    entities::{ActivityEvent, CodeChangeEvent, Metadata},
    sink::{EventSink, SinkError},
};

/// Sink keeping everything in memory. Used by tests to inspect what the pipeline produced.
#[derive(Default)]
pub struct MemorySink {
    activity: Mutex<Vec<ActivityEvent>>,
    code_changes: Mutex<Vec<CodeChangeEvent>>,
    system_events: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn activity(&self) -> Vec<ActivityEvent> {
        self.activity.lock().unwrap().clone()
    }

    pub fn code_changes(&self) -> Vec<CodeChangeEvent> {
        self.code_changes.lock().unwrap().clone()
    }

    pub fn system_events(&self) -> Vec<String> {
        self.system_events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn record_activity(&self, event: ActivityEvent) -> Result<(), SinkError> {
        self.activity.lock().unwrap().push(event);
        Ok(())
    }

    async fn record_code_change(&self, event: CodeChangeEvent) -> Result<(), SinkError> {
        self.code_changes.lock().unwrap().push(event);
        Ok(())
    }

    async fn record_system_event(&self, kind: &str, _metadata: Metadata) -> Result<(), SinkError> {
        self.system_events.lock().unwrap().push(kind.to_string());
        Ok(())
    }

    async fn query_window(
        &self,
        _days: u32,
    ) -> Result<(Vec<ActivityEvent>, Vec<CodeChangeEvent>), SinkError> {
        Ok((self.activity(), self.code_changes()))
    }
}
