use std::{path::PathBuf, sync::Arc};

use activity::{
    idle::{default_input_listener, InputListener},
    tracker::{ActivityTracker, TrackerSettings},
};
use anyhow::Result;
use code::{
    debounce::Debouncer, filter::TrackingFilter, processor::ChangeProcessor,
    processor::SnapshotCache, watcher::resolve_watch_roots, watcher::FsWatcher,
};
use storage::{event_storage::EventStorage, sink::EventSink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::Config,
    utils::clock::{Clock, DefaultClock},
    window_api::{platform_idle_source, GenericWindowSampler, WindowSampler},
};

pub mod activity;
pub mod args;
pub mod code;
pub mod shutdown;
pub mod storage;

/// Raw notifications can arrive in large bursts, for example during a checkout.
const RAW_CHANGE_BUFFER: usize = 1024;
const SETTLED_CHANGE_BUFFER: usize = 64;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf, config: Config) -> Result<()> {
    std::env::set_current_dir("/")?;

    let shutdown_token = CancellationToken::new();
    let sink = Arc::new(EventStorage::new(
        dir.join("records"),
        Box::new(DefaultClock),
    )?);

    let (_, capture_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        async {
            let result = run_capture(
                &config,
                sink,
                Box::new(GenericWindowSampler::new()),
                default_input_listener(
                    platform_idle_source(),
                    Arc::new(DefaultClock),
                    config.poll_interval(),
                ),
                DefaultClock,
                shutdown_token.clone(),
            )
            .await;
            // Stop waiting for signals once capture can't continue.
            shutdown_token.cancel();
            result
        }
    );

    if let Err(e) = &capture_result {
        error!("Capture stopped with an error {e:?}");
    }
    capture_result
}

/// Runs the activity tracker and the code change pipeline until `shutdown` is cancelled. Every
/// component drains before this returns: the tracker flushes the focus in progress, the
/// debouncer forwards pending changes and the processor handles them.
pub async fn run_capture(
    config: &Config,
    sink: Arc<dyn EventSink>,
    sampler: Box<dyn WindowSampler>,
    input: Box<dyn InputListener>,
    clock: impl Clock + Clone,
    shutdown: CancellationToken,
) -> Result<()> {
    let tracker = if config.activity_tracking.track_applications {
        Some(ActivityTracker::new(
            sampler,
            input,
            sink.clone(),
            TrackerSettings::from(config),
            Box::new(clock.clone()),
            shutdown.clone(),
        ))
    } else {
        info!("Application tracking is disabled");
        None
    };

    let filter = TrackingFilter::from(config);
    let roots = resolve_watch_roots(&config.watch_directories);

    let (raw_sender, raw_receiver) = mpsc::channel(RAW_CHANGE_BUFFER);
    let (settled_sender, settled_receiver) = mpsc::channel(SETTLED_CHANGE_BUFFER);

    // Watch first so that nothing is missed while the snapshots are being read. Notifications
    // wait in the channel until the processor starts.
    let watcher = FsWatcher::start(roots.clone(), raw_sender)?;
    let cache = SnapshotCache::seed_blocking(roots.clone(), filter.clone()).await?;

    let debouncer = Debouncer::new(
        raw_receiver,
        settled_sender,
        config.debounce_delay(),
        shutdown.clone(),
    );
    let processor = ChangeProcessor::new(filter, roots, cache, sink, Box::new(clock));

    let (_, tracking_result, debounce_result, processing_result) = tokio::join!(
        async {
            shutdown.cancelled().await;
            watcher.stop();
        },
        async {
            match tracker {
                Some(tracker) => tracker.run().await,
                None => Ok(()),
            }
        },
        debouncer.run(),
        processor.run(settled_receiver),
    );

    if let Err(e) = &tracking_result {
        error!("Activity tracker got an error {e:?}");
    }
    if let Err(e) = &debounce_result {
        error!("Debouncer got an error {e:?}");
    }
    if let Err(e) = &processing_result {
        error!("Change processor got an error {e:?}");
    }

    tracking_result.and(debounce_result).and(processing_result)
}

#[cfg(test)]
mod daemon_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        config::Config,
        daemon::{
            activity::{idle::NoopInputListener, tracker::SESSION_END},
            run_capture,
            storage::{
                entities::{ActivityEventType, ChangeType},
                event_storage::EventStorage,
                sink::EventSink,
            },
        },
        utils::{
            clock::{DefaultClock, TestClock},
            logging::TEST_LOGGING,
        },
        window_api::{MockWindowSampler, WindowSample},
    };

    /// Smoke test of the whole capture pipeline against real storage and a real watcher.
    #[tokio::test]
    async fn smoke_test_capture() -> Result<()> {
        *TEST_LOGGING;
        let project = tempdir()?;
        let records = tempdir()?;
        let tracked = project.path().join("main.py");
        std::fs::write(&tracked, "print(1)\n")?;

        let mut config = Config::default();
        config.set_watch_directories(vec![project.path().to_path_buf()]);
        config.activity_tracking.poll_interval_seconds = 1;
        config.debounce_delay_seconds = 0.2;

        let mut sampler = MockWindowSampler::new();
        sampler.expect_current_foreground_window().returning(|| {
            Ok(Some(WindowSample {
                window_title: "main.py - editor".into(),
                application: "code".into(),
            }))
        });

        let sink = Arc::new(EventStorage::new(
            records.path().to_path_buf(),
            Box::new(DefaultClock),
        )?);
        let shutdown = CancellationToken::new();

        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                tokio::fs::write(&tracked, "print(1)\nprint(2)\n")
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(2000)).await;
                shutdown.cancel()
            },
            run_capture(
                &config,
                sink.clone(),
                Box::new(sampler),
                Box::new(NoopInputListener),
                DefaultClock,
                shutdown.clone(),
            ),
        );
        result?;

        let (activity, code_changes) = sink.query_window(1).await?;

        assert_eq!(code_changes.len(), 1);
        assert_eq!(&*code_changes[0].file_path, "main.py");
        assert_eq!(code_changes[0].change_type, ChangeType::Modified);
        assert!(code_changes[0].diff_content.contains("+print(2)"));

        let focus = activity
            .iter()
            .filter(|v| v.event_type == ActivityEventType::AppFocus)
            .collect::<Vec<_>>();
        // The focus in progress is flushed on shutdown.
        assert_eq!(focus.len(), 1);
        assert_eq!(focus[0].application.as_deref(), Some("code"));
        assert!(focus[0].duration_seconds >= 2);
        let last = activity.last().unwrap();
        assert_eq!(last.event_type, ActivityEventType::SystemEvent);
        assert_eq!(last.metadata["event"], SESSION_END);
        Ok(())
    }

    #[tokio::test]
    async fn test_tracking_can_be_disabled() -> Result<()> {
        let project = tempdir()?;
        let mut config = Config::default();
        config.set_watch_directories(vec![project.path().to_path_buf()]);
        config.activity_tracking.track_applications = false;

        let sink = Arc::new(crate::daemon::storage::memory::MemorySink::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        run_capture(
            &config,
            sink.clone(),
            Box::new(MockWindowSampler::new()),
            Box::new(NoopInputListener),
            TestClock::new(Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap()),
            shutdown,
        )
        .await?;

        assert!(sink.activity().is_empty());
        assert!(sink.system_events().is_empty());
        Ok(())
    }
}
