use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::daemon::storage::entities::ActivityEvent;

/// What the user is looking at during a single tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Observation {
    pub application: Option<Arc<str>>,
    pub window_title: Option<Arc<str>>,
    pub website_domain: Option<Arc<str>>,
}

/// Focus the tracker currently attributes time to.
#[derive(Debug, Default, Clone)]
pub struct ActivityState {
    pub current: Observation,
    pub focus_start: Option<DateTime<Utc>>,
}

impl ActivityState {
    pub fn focused(current: Observation, focus_start: DateTime<Utc>) -> Self {
        Self {
            current,
            focus_start: Some(focus_start),
        }
    }

    pub fn differs_from(&self, observation: &Observation) -> bool {
        self.current != *observation
    }

    /// Closes the current interval at `now`. Intervals without an application or shorter than a
    /// second produce nothing.
    pub fn close(&self, now: DateTime<Utc>) -> Option<ActivityEvent> {
        let start = self.focus_start?;
        self.current.application.as_ref()?;

        let duration = (now - start).num_seconds();
        if duration <= 0 {
            return None;
        }

        Some(ActivityEvent::app_focus(
            self.current.application.clone(),
            self.current.window_title.clone(),
            self.current.website_domain.clone(),
            duration as u64,
            now,
        ))
    }
}
