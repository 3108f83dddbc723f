use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form data attached to an event. Stored as a json object.
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEventType {
    AppFocus,
    WebsiteVisit,
    Idle,
    SystemEvent,
}

impl Display for ActivityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityEventType::AppFocus => write!(f, "app_focus"),
            ActivityEventType::WebsiteVisit => write!(f, "website_visit"),
            ActivityEventType::Idle => write!(f, "idle"),
            ActivityEventType::SystemEvent => write!(f, "system_event"),
        }
    }
}

/// A single observation of user activity. Only completed intervals (focus, idle) carry a
/// duration, everything else is a point in time.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct ActivityEvent {
    pub event_type: ActivityEventType,
    pub application: Option<Arc<str>>,
    pub window_title: Option<Arc<str>>,
    pub website_domain: Option<Arc<str>>,
    pub duration_seconds: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ActivityEvent {
    pub fn app_focus(
        application: Option<Arc<str>>,
        window_title: Option<Arc<str>>,
        website_domain: Option<Arc<str>>,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: ActivityEventType::AppFocus,
            application,
            window_title,
            website_domain,
            duration_seconds,
            timestamp,
            metadata: Metadata::new(),
        }
    }

    pub fn idle(duration_seconds: u64, timestamp: DateTime<Utc>, metadata: Metadata) -> Self {
        Self {
            event_type: ActivityEventType::Idle,
            application: None,
            window_title: None,
            website_domain: None,
            duration_seconds,
            timestamp,
            metadata,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

impl Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Created => write!(f, "created"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Deleted => write!(f, "deleted"),
        }
    }
}

/// Content change of a tracked file. `diff_content` is never empty.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct CodeChangeEvent {
    pub file_path: Arc<str>,
    pub change_type: ChangeType,
    pub file_size: Option<u64>,
    pub diff_content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct SystemEventEntity {
    // `kind` is taken by the record line tag.
    #[serde(rename = "event")]
    pub kind: Arc<str>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<SystemEventEntity> for ActivityEvent {
    fn from(SystemEventEntity { kind, timestamp, mut metadata }: SystemEventEntity) -> Self {
        metadata.insert("event".into(), kind.to_string().into());
        ActivityEvent {
            event_type: ActivityEventType::SystemEvent,
            application: None,
            window_title: None,
            website_domain: None,
            duration_seconds: 0,
            timestamp,
            metadata,
        }
    }
}

/// A line of a record file.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredEvent {
    Activity(ActivityEvent),
    CodeChange(CodeChangeEvent),
    System(SystemEventEntity),
}

impl StoredEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StoredEvent::Activity(v) => v.timestamp,
            StoredEvent::CodeChange(v) => v.timestamp,
            StoredEvent::System(v) => v.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_stored_event_is_tagged() -> Result<()> {
        let event = StoredEvent::Activity(ActivityEvent::app_focus(
            Some("code".into()),
            Some("main.rs".into()),
            None,
            12,
            Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap(),
        ));
        let line = serde_json::to_string(&event)?;
        assert!(line.contains(r#""kind":"activity""#));
        assert!(line.contains(r#""event_type":"app_focus""#));
        assert_eq!(serde_json::from_str::<StoredEvent>(&line)?, event);
        Ok(())
    }

    #[test]
    fn test_system_event_line() -> Result<()> {
        let event = StoredEvent::System(SystemEventEntity {
            kind: "session_end".into(),
            timestamp: Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap(),
            metadata: Metadata::new(),
        });
        let line = serde_json::to_string(&event)?;
        assert!(line.contains(r#""kind":"system""#));
        assert!(line.contains(r#""event":"session_end""#));
        assert_eq!(serde_json::from_str::<StoredEvent>(&line)?, event);
        Ok(())
    }

    #[test]
    fn test_system_event_conversion_keeps_kind() {
        let event: ActivityEvent = SystemEventEntity {
            kind: "session_start".into(),
            timestamp: Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap(),
            metadata: Metadata::new(),
        }
        .into();
        assert_eq!(event.event_type, ActivityEventType::SystemEvent);
        assert_eq!(event.duration_seconds, 0);
        assert_eq!(event.metadata["event"], "session_start");
    }
}
