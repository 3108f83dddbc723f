use async_trait::async_trait;

use super::entities::{ActivityEvent, CodeChangeEvent, Metadata};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to access event storage: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for everything the capture pipeline observes. Implementations must be safe to
/// share between the activity tracker and the code change processor.
///
/// A failed record is reported to the caller and is not retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record_activity(&self, event: ActivityEvent) -> Result<(), SinkError>;

    async fn record_code_change(&self, event: CodeChangeEvent) -> Result<(), SinkError>;

    async fn record_system_event(&self, kind: &str, metadata: Metadata) -> Result<(), SinkError>;

    /// Returns events recorded during the last `days` days. System events are returned as
    /// [ActivityEvent]s of type
    /// [SystemEvent](super::entities::ActivityEventType::SystemEvent).
    async fn query_window(
        &self,
        days: u32,
    ) -> Result<(Vec<ActivityEvent>, Vec<CodeChangeEvent>), SinkError>;
}
