use std::{collections::HashSet, path::Path, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, Local, Utc};

use crate::{
    daemon::storage::{
        entities::{ActivityEvent, ActivityEventType, CodeChangeEvent},
        event_storage::EventStorage,
        sink::EventSink,
    },
    utils::{
        clock::DefaultClock,
        time::{day_start, format_hours_minutes},
    },
};

/// Summary of a day of activity.
#[derive(Debug, PartialEq, Eq)]
pub struct DayStats {
    pub applications: usize,
    pub websites: usize,
    pub files_changed: usize,
    pub active_time: Duration,
}

fn distinct<'a>(
    events: &[&'a ActivityEvent],
    event_type: ActivityEventType,
    field: impl Fn(&'a ActivityEvent) -> Option<&'a str>,
) -> usize {
    events
        .iter()
        .filter(|v| v.event_type == event_type)
        .filter_map(|v| field(*v))
        .collect::<HashSet<_>>()
        .len()
}

/// Counts what happened since `since`. Active time is the total duration of everything that
/// isn't idle.
pub fn day_stats(
    activity: &[ActivityEvent],
    code_changes: &[CodeChangeEvent],
    since: DateTime<Utc>,
) -> DayStats {
    let activity = activity
        .iter()
        .filter(|v| v.timestamp >= since)
        .collect::<Vec<_>>();

    let active_seconds = activity
        .iter()
        .filter(|v| v.event_type != ActivityEventType::Idle)
        .map(|v| v.duration_seconds)
        .sum::<u64>();

    DayStats {
        applications: distinct(&activity, ActivityEventType::AppFocus, |v| {
            v.application.as_deref()
        }),
        websites: distinct(&activity, ActivityEventType::WebsiteVisit, |v| {
            v.website_domain.as_deref()
        }),
        files_changed: code_changes
            .iter()
            .filter(|v| v.timestamp >= since)
            .map(|v| &*v.file_path)
            .collect::<HashSet<_>>()
            .len(),
        active_time: Duration::seconds(active_seconds as i64),
    }
}

fn open_storage(app_dir: &Path) -> Result<EventStorage> {
    Ok(EventStorage::new(
        app_dir.join("records"),
        Box::new(DefaultClock),
    )?)
}

/// Prints today's statistics.
pub async fn print_status(app_dir: &Path) -> Result<()> {
    let storage = open_storage(app_dir)?;
    let (activity, code_changes) = storage.query_window(1).await?;
    let since = day_start(Local::now()).with_timezone(&Utc);

    let stats = day_stats(&activity, &code_changes, since);
    println!("Today");
    println!("Applications used\t{}", stats.applications);
    println!("Websites visited\t{}", stats.websites);
    println!("Files changed\t{}", stats.files_changed);
    println!("Active time\t{}", format_hours_minutes(stats.active_time));
    Ok(())
}

fn optional(value: &Option<Arc<str>>) -> &str {
    value.as_deref().unwrap_or("-")
}

/// Prints every event of the last `days` days.
pub async fn print_events(app_dir: &Path, days: u32) -> Result<()> {
    let storage = open_storage(app_dir)?;
    let (activity, code_changes) = storage.query_window(days).await?;
    let time_format = "%x %H:%M:%S";

    for event in &activity {
        println!(
            "{}\t{}\t{}s\t{}\t{}\t{}",
            event.timestamp.with_timezone(&Local).format(time_format),
            event.event_type,
            event.duration_seconds,
            optional(&event.application),
            optional(&event.website_domain),
            optional(&event.window_title),
        );
    }
    if !activity.is_empty() && !code_changes.is_empty() {
        println!();
    }
    for change in &code_changes {
        println!(
            "{}\t{}\t{}\t{}",
            change.timestamp.with_timezone(&Local).format(time_format),
            change.change_type,
            change
                .file_size
                .map(|v| format!("{v}B"))
                .unwrap_or_else(|| "-".into()),
            change.file_path,
        );
    }
    Ok(())
}
